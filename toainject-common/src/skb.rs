/// Socket buffer primitives the injector needs from its host.
///
/// Offsets are absolute from the start of the frame. Every value crossing
/// this trait is in wire byte order. Errors carry the host's negative errno,
/// the same way the kernel helpers report them.
pub trait SkbBuf {
    /// Current frame length.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load<const N: usize>(&self, off: usize) -> Result<[u8; N], i64>;

    fn store<const N: usize>(&mut self, off: usize, bytes: &[u8; N]) -> Result<(), i64>;

    /// Sets the frame length to `new_len`, adding or dropping bytes at the
    /// end only. Added bytes have unspecified content.
    fn change_tail(&mut self, new_len: usize) -> Result<(), i64>;

    /// Updates the IPv4 header checksum at `off` for a 16-bit word change.
    fn l3_csum_replace(&mut self, off: usize, from: [u8; 2], to: [u8; 2]) -> Result<(), i64>;

    /// Updates the layer 4 checksum at `off` for a 16-bit word change.
    /// `pseudo` marks a word that belongs to the pseudo header.
    fn l4_csum_replace(
        &mut self,
        off: usize,
        from: [u8; 2],
        to: [u8; 2],
        pseudo: bool,
    ) -> Result<(), i64>;
}

/// Longest tail [`open_at`] is willing to move.
pub const TAIL_MOVE_MAX: usize = 1536;

const WINDOW: usize = 8;

const EFAULT: i64 = -14;
const E2BIG: i64 = -7;

/// Opens `extra` bytes at `at`: the frame grows at its end and everything
/// from `at` on is moved back by `extra`, last window first.
///
/// Bytes in front of `at` stay where they are, so the host's idea of where
/// each header starts is still right afterwards. The opened bytes have
/// unspecified content. A tail longer than [`TAIL_MOVE_MAX`] is refused
/// before the frame changes.
#[inline(always)]
pub fn open_at<B: SkbBuf>(buf: &mut B, at: usize, extra: usize) -> Result<(), i64> {
    let len = buf.len();
    if at > len {
        return Err(EFAULT);
    }
    let tail = len - at;
    if tail > TAIL_MOVE_MAX {
        return Err(E2BIG);
    }
    buf.change_tail(len + extra)?;

    let mut left = tail;
    for _ in 0..TAIL_MOVE_MAX / WINDOW {
        if left < WINDOW {
            break;
        }
        left -= WINDOW;
        let window: [u8; WINDOW] = buf.load(at + left)?;
        buf.store(at + left + extra, &window)?;
    }
    for _ in 0..WINDOW {
        if left == 0 {
            break;
        }
        left -= 1;
        let byte: [u8; 1] = buf.load(at + left)?;
        buf.store(at + left + extra, &byte)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec_skb::VecSkb;

    fn opened(data: Vec<u8>, at: usize, extra: usize) -> Vec<u8> {
        let mut skb = VecSkb::new(data);
        open_at(&mut skb, at, extra).unwrap();
        skb.into_inner()
    }

    #[test]
    fn test_open_at_end() {
        let out = opened(vec![1, 2, 3, 4], 4, 8);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_open_moves_every_tail_length() {
        for tail in 0..=40usize {
            let head: Vec<u8> = (0..54).map(|b| b as u8).collect();
            let rest: Vec<u8> = (0..tail).map(|b| 0x80 | b as u8).collect();
            let mut data = head.clone();
            data.extend_from_slice(&rest);

            let out = opened(data, 54, 8);
            assert_eq!(out.len(), 54 + 8 + tail, "tail {tail}");
            assert_eq!(&out[..54], &head[..], "tail {tail}");
            assert_eq!(&out[62..], &rest[..], "tail {tail}");
        }
    }

    #[test]
    fn test_open_with_odd_extra() {
        let out = opened(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11], 2, 3);
        assert_eq!(&out[..2], &[1, 2]);
        assert_eq!(&out[5..], &[3, 4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_open_refuses_long_tail() {
        let mut skb = VecSkb::new(vec![0; 10 + TAIL_MOVE_MAX + 1]);
        assert_eq!(open_at(&mut skb, 10, 8), Err(E2BIG));
        assert_eq!(skb.len(), 10 + TAIL_MOVE_MAX + 1);

        let mut skb = VecSkb::new(vec![7; 10 + TAIL_MOVE_MAX]);
        assert_eq!(open_at(&mut skb, 10, 8), Ok(()));
        assert!(skb.as_bytes()[18..].iter().all(|&b| b == 7));
    }

    #[test]
    fn test_open_past_end_fails() {
        let mut skb = VecSkb::new(vec![0; 4]);
        assert_eq!(open_at(&mut skb, 6, 8), Err(EFAULT));
        assert_eq!(skb.len(), 4);
    }
}
