//! Internet checksum arithmetic (RFC 1071, RFC 1624).

/// Folds a wide one's complement sum into 16 bits.
#[inline(always)]
pub fn fold(sum: u64) -> u16 {
    let mut s = (sum & 0xffff_ffff) + (sum >> 32);
    s = (s & 0xffff) + (s >> 16);
    s = (s & 0xffff) + (s >> 16);
    s = (s & 0xffff) + (s >> 16);
    s as u16
}

/// Incrementally updates `check` after the 16-bit word `from` became `to`.
///
/// RFC 1624 eqn. 3: `HC' = ~(~HC + ~m + m')`. Replacing a word that did not
/// exist before is expressed with `from = [0, 0]`.
#[inline(always)]
pub fn replace2(check: [u8; 2], from: [u8; 2], to: [u8; 2]) -> [u8; 2] {
    let hc = u16::from_be_bytes(check);
    let m = u16::from_be_bytes(from);
    let m1 = u16::from_be_bytes(to);
    let sum = (!hc) as u64 + (!m) as u64 + m1 as u64;
    (!fold(sum)).to_be_bytes()
}

/// Sums `bytes` as big-endian 16-bit words on top of `initial`.
///
/// A trailing odd byte is padded with zero.
pub fn sum_words(bytes: &[u8], initial: u64) -> u64 {
    let mut sum = initial;
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u64;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u64;
    }
    sum
}

/// Sum of the IPv4 pseudo header used by TCP and UDP.
pub fn pseudo_sum_v4(saddr: [u8; 4], daddr: [u8; 4], proto: u8, l4_len: u16) -> u64 {
    let mut sum = sum_words(&saddr, 0);
    sum = sum_words(&daddr, sum);
    sum += proto as u64;
    sum + l4_len as u64
}

/// Full checksum over `bytes`. Over a region that already carries a valid
/// checksum the result is zero.
pub fn checksum(bytes: &[u8], initial: u64) -> u16 {
    !fold(sum_words(bytes, initial))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 20-byte IPv4 header from RFC 1071 style examples, checksum 0xb861
    const IP_HDR: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn test_checksum_of_valid_header_is_zero() {
        assert_eq!(checksum(&IP_HDR, 0), 0);
    }

    #[test]
    fn test_checksum_matches_known_value() {
        let mut hdr = IP_HDR;
        hdr[10] = 0;
        hdr[11] = 0;
        assert_eq!(checksum(&hdr, 0), 0xb861);
    }

    #[test]
    fn test_replace2_matches_recompute() {
        let mut hdr = IP_HDR;
        let old = [hdr[2], hdr[3]];
        let new = [0x00, 0x7b];
        let check = replace2([hdr[10], hdr[11]], old, new);
        hdr[2..4].copy_from_slice(&new);
        hdr[10..12].copy_from_slice(&check);
        assert_eq!(checksum(&hdr, 0), 0);
    }

    #[test]
    fn test_replace2_from_zero_adds_word() {
        // appending a word to a region is the same as replacing a zero word
        let mut region = vec![0x12, 0x34, 0x00, 0x00, 0xab, 0xcd];
        let c = checksum(&region, 0).to_be_bytes();
        region[2..4].copy_from_slice(&c);
        let c = replace2([region[2], region[3]], [0, 0], [0xfe, 0x08]);
        region[2..4].copy_from_slice(&c);
        region.extend_from_slice(&[0xfe, 0x08]);
        assert_eq!(checksum(&region, 0), 0);
    }

    #[test]
    fn test_odd_length_padding() {
        assert_eq!(sum_words(&[0x01], 0), 0x0100);
        assert_eq!(sum_words(&[0x01, 0x02, 0x03], 0), 0x0102 + 0x0300);
    }

    #[test]
    fn test_fold_carries() {
        assert_eq!(fold(0x1_fffe), 0xffff);
        assert_eq!(fold(0xffff_ffff), 0xffff);
        assert_eq!(fold(0), 0);
    }
}
