//! Heap backed [`SkbBuf`] for running the engine outside the kernel.

use crate::{csum, skb::SkbBuf};

const EFAULT: i64 = -14;
const ENOMEM: i64 = -12;

/// What bytes added by [`SkbBuf::change_tail`] hold. The kernel makes no
/// promise about them, so they are made easy to spot instead of zero.
pub const TAIL_FILL: u8 = 0xa5;

/// A frame in a `Vec<u8>` with full, always valid checksums.
///
/// Resizing behaves like `bpf_skb_change_tail`: the frame only ever grows or
/// shrinks at its end. Failures of the resize or of a given store can be
/// injected to walk the engine's error paths.
#[derive(Debug, Clone, Default)]
pub struct VecSkb {
    data: Vec<u8>,
    fail_grow: bool,
    fail_store: Option<usize>,
    stores: usize,
}

impl VecSkb {
    pub fn new(data: Vec<u8>) -> Self {
        VecSkb {
            data,
            ..Default::default()
        }
    }

    /// Makes [`SkbBuf::change_tail`] fail without touching the frame.
    pub fn fail_grow(mut self) -> Self {
        self.fail_grow = true;
        self
    }

    /// Makes the `n`-th call to [`SkbBuf::store`] fail, counting from zero.
    pub fn fail_store(mut self, n: usize) -> Self {
        self.fail_store = Some(n);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn replace(&mut self, off: usize, from: [u8; 2], to: [u8; 2]) -> Result<(), i64> {
        let check: [u8; 2] = self.load(off)?;
        let check = csum::replace2(check, from, to);
        self.data[off..off + 2].copy_from_slice(&check);
        Ok(())
    }
}

impl SkbBuf for VecSkb {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn load<const N: usize>(&self, off: usize) -> Result<[u8; N], i64> {
        let end = off.checked_add(N).ok_or(EFAULT)?;
        let src = self.data.get(off..end).ok_or(EFAULT)?;
        let mut out = [0u8; N];
        out.copy_from_slice(src);
        Ok(out)
    }

    fn store<const N: usize>(&mut self, off: usize, bytes: &[u8; N]) -> Result<(), i64> {
        let n = self.stores;
        self.stores += 1;
        if self.fail_store == Some(n) {
            return Err(EFAULT);
        }
        let end = off.checked_add(N).ok_or(EFAULT)?;
        let dst = self.data.get_mut(off..end).ok_or(EFAULT)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn change_tail(&mut self, new_len: usize) -> Result<(), i64> {
        if self.fail_grow {
            return Err(ENOMEM);
        }
        self.data.resize(new_len, TAIL_FILL);
        Ok(())
    }

    fn l3_csum_replace(&mut self, off: usize, from: [u8; 2], to: [u8; 2]) -> Result<(), i64> {
        self.replace(off, from, to)
    }

    fn l4_csum_replace(
        &mut self,
        off: usize,
        from: [u8; 2],
        to: [u8; 2],
        _pseudo: bool,
    ) -> Result<(), i64> {
        // the checksum field always holds a complete checksum here, so pseudo
        // header words fold in like any other word
        self.replace(off, from, to)
    }
}
