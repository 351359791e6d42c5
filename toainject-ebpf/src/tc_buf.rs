use aya_bpf::{
    bindings::{__sk_buff, BPF_F_PSEUDO_HDR},
    helpers::bpf_skb_change_tail,
    programs::TcContext,
    BpfContext,
};
use toainject_common::SkbBuf;

/// [`SkbBuf`] over the socket buffer of a TC program.
pub struct TcBuf<'a> {
    ctx: &'a mut TcContext,
}

impl<'a> TcBuf<'a> {
    pub fn new(ctx: &'a mut TcContext) -> Self {
        TcBuf { ctx }
    }
}

impl SkbBuf for TcBuf<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.ctx.len() as usize
    }

    #[inline(always)]
    fn load<const N: usize>(&self, off: usize) -> Result<[u8; N], i64> {
        self.ctx.load::<[u8; N]>(off)
    }

    #[inline(always)]
    fn store<const N: usize>(&mut self, off: usize, bytes: &[u8; N]) -> Result<(), i64> {
        self.ctx.store(off, bytes, 0)
    }

    /// Grows or shrinks at the end only; headers keep their offsets and so
    /// does the checksum start the stack recorded for them.
    #[inline(always)]
    fn change_tail(&mut self, new_len: usize) -> Result<(), i64> {
        let ret = unsafe {
            bpf_skb_change_tail(self.ctx.as_ptr() as *mut __sk_buff, new_len as u32, 0)
        };
        if ret == 0 {
            Ok(())
        } else {
            Err(ret)
        }
    }

    #[inline(always)]
    fn l3_csum_replace(&mut self, off: usize, from: [u8; 2], to: [u8; 2]) -> Result<(), i64> {
        self.ctx.l3_csum_replace(
            off,
            u16::from_ne_bytes(from) as u64,
            u16::from_ne_bytes(to) as u64,
            2,
        )
    }

    #[inline(always)]
    fn l4_csum_replace(
        &mut self,
        off: usize,
        from: [u8; 2],
        to: [u8; 2],
        pseudo: bool,
    ) -> Result<(), i64> {
        let flags = if pseudo {
            BPF_F_PSEUDO_HDR as u64 | 2
        } else {
            2
        };
        self.ctx.l4_csum_replace(
            off,
            u16::from_ne_bytes(from) as u64,
            u16::from_ne_bytes(to) as u64,
            flags,
        )
    }
}
