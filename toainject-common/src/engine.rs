//! Buffer surgery on a TCP SYN: append the TOA option after the TCP header.
//!
//! The work is split in stages that each return early with a [`Skip`]:
//!
//! ```text
//! parse -> syn -> space -> snapshot/plan -> grow -> revalidate -> finish
//! ```
//!
//! Offsets only exist inside a [`PacketView`]. Growing the frame consumes the
//! pre-resize view and hands back a [`Grown`] frame that has no offsets at
//! all; the only way to touch the frame again is to reparse it through
//! [`Grown::revalidate`]. Everything written after the resize comes from the
//! [`Plan`], which is computed from by-value [`Snapshot`]s before the first
//! byte changes.

use core::marker::PhantomData;

use crate::{
    hdr::{
        doff_len, ihl_len, is_syn, with_doff, L3, ETH_HDR_LEN, ETH_TYPE_OFF, IPPROTO_TCP,
        IPV4_CHECK_OFF, IPV4_HDR_LEN, IPV4_PROTO_OFF, IPV4_SADDR_OFF, IPV4_TOT_LEN_OFF,
        TCP_CHECK_OFF, TCP_FLAGS_OFF, TCP_HDR_LEN, TCP_HDR_MAX, TCP_SPORT_OFF,
    },
    option::{Toa, ToaV4},
    skb::{open_at, SkbBuf},
};

/// Why a frame was left alone (or only partly rewritten).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    TooShort,
    WrongEtherType,
    WrongProtocol,
    NotSyn,
    NoSpace,
    ResizeFailed,
    StoreFailed,
}

impl Skip {
    pub fn as_str(&self) -> &'static str {
        match self {
            Skip::TooShort => "too short",
            Skip::WrongEtherType => "not ipv4",
            Skip::WrongProtocol => "not tcp",
            Skip::NotSyn => "not syn",
            Skip::NoSpace => "no option space",
            Skip::ResizeFailed => "resize failed",
            Skip::StoreFailed => "store failed",
        }
    }
}

/// What the classifier tells its host. Both continue the packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Unmodified,
    Modified,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Frame is byte for byte what came in.
    Pass(Skip),
    Injected(ToaV4),
    /// The frame grew but a later step failed; every remaining write was still
    /// attempted.
    Degraded(Skip),
}

impl Verdict {
    pub fn action(&self) -> Action {
        match self {
            Verdict::Pass(_) => Action::Unmodified,
            Verdict::Injected(_) | Verdict::Degraded(_) => Action::Modified,
        }
    }
}

/// Header boundaries of one frame. Deliberately neither `Copy` nor `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct Headers {
    pub ip_len: usize,
    pub l4_off: usize,
    pub tcp_len: usize,
    pub flags: [u8; 2],
}

/// Walks Ethernet, IPv4 and TCP, checking each boundary before reading it.
pub fn parse_headers<B: SkbBuf>(buf: &B) -> Result<Headers, Skip> {
    if buf.len() < ETH_HDR_LEN {
        return Err(Skip::TooShort);
    }
    let ethertype: [u8; 2] = buf.load(ETH_TYPE_OFF).map_err(|_| Skip::TooShort)?;
    match L3::from_ethertype(ethertype) {
        Some(L3::Ipv4) => parse_ipv4_tcp(buf),
        // the 20 byte record is known, the rewrite for it is not
        Some(L3::Ipv6) => Err(Skip::WrongEtherType),
        None => Err(Skip::WrongEtherType),
    }
}

fn parse_ipv4_tcp<B: SkbBuf>(buf: &B) -> Result<Headers, Skip> {
    if buf.len() < ETH_HDR_LEN + IPV4_HDR_LEN {
        return Err(Skip::TooShort);
    }
    let [ver_ihl]: [u8; 1] = buf.load(ETH_HDR_LEN).map_err(|_| Skip::TooShort)?;
    let ip_len = ihl_len(ver_ihl);
    if ip_len < IPV4_HDR_LEN {
        return Err(Skip::TooShort);
    }
    let [proto]: [u8; 1] = buf
        .load(ETH_HDR_LEN + IPV4_PROTO_OFF)
        .map_err(|_| Skip::TooShort)?;
    if proto != IPPROTO_TCP {
        return Err(Skip::WrongProtocol);
    }

    let l4_off = ETH_HDR_LEN + ip_len;
    if buf.len() < l4_off + TCP_HDR_LEN {
        return Err(Skip::TooShort);
    }
    let flags: [u8; 2] = buf
        .load(l4_off + TCP_FLAGS_OFF)
        .map_err(|_| Skip::TooShort)?;
    let tcp_len = doff_len(flags);
    if tcp_len < TCP_HDR_LEN || buf.len() < l4_off + tcp_len {
        return Err(Skip::TooShort);
    }

    Ok(Headers {
        ip_len,
        l4_off,
        tcp_len,
        flags,
    })
}

/// Values read before the frame changes. Nothing in here points into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub saddr: [u8; 4],
    pub sport: [u8; 2],
    pub tot_len: [u8; 2],
    pub flags: [u8; 2],
    pub ip_len: usize,
    pub tcp_len: usize,
}

/// Every value written after the resize, old and new side by side so the
/// checksum deltas need nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plan {
    pub toa: ToaV4,
    pub old_tot_len: [u8; 2],
    pub new_tot_len: [u8; 2],
    pub old_flags: [u8; 2],
    pub new_flags: [u8; 2],
    /// TCP length as seen by the pseudo header.
    pub old_seg_len: [u8; 2],
    pub new_seg_len: [u8; 2],
}

impl Plan {
    /// Plan for the standard record: source port and address of the frame.
    pub fn new(snap: &Snapshot) -> Result<Plan, Skip> {
        Plan::build(snap, Toa::V4(ToaV4::new(snap.sport, snap.saddr)))
    }

    /// Only the IPv4 record can be written into an IPv4 frame.
    pub fn build(snap: &Snapshot, toa: Toa) -> Result<Plan, Skip> {
        let toa = match toa {
            Toa::V4(toa) => toa,
            Toa::V6(_) => return Err(Skip::WrongEtherType),
        };
        let tot_len = u16::from_be_bytes(snap.tot_len) as usize;
        if tot_len < snap.ip_len + snap.tcp_len {
            return Err(Skip::TooShort);
        }
        let new_tot_len = tot_len + ToaV4::LEN;
        if new_tot_len > u16::MAX as usize {
            return Err(Skip::NoSpace);
        }
        let seg_len = tot_len - snap.ip_len;
        let doff = ((snap.tcp_len + ToaV4::LEN) / 4) as u8;

        Ok(Plan {
            toa,
            old_tot_len: snap.tot_len,
            new_tot_len: (new_tot_len as u16).to_be_bytes(),
            old_flags: snap.flags,
            new_flags: with_doff(snap.flags, doff),
            old_seg_len: (seg_len as u16).to_be_bytes(),
            new_seg_len: ((seg_len + ToaV4::LEN) as u16).to_be_bytes(),
        })
    }
}

/// Offsets are valid.
pub struct PreResize;
/// Offsets were rederived after the resize.
pub struct PostResize;

/// A frame together with the header offsets derived from it.
pub struct PacketView<'a, B, S> {
    buf: &'a mut B,
    hdrs: Headers,
    _stage: PhantomData<S>,
}

impl<'a, B: SkbBuf, S> PacketView<'a, B, S> {
    pub fn headers(&self) -> &Headers {
        &self.hdrs
    }
}

impl<'a, B: SkbBuf> PacketView<'a, B, PreResize> {
    pub fn parse(buf: &'a mut B) -> Result<Self, Skip> {
        let hdrs = parse_headers(&*buf)?;
        Ok(PacketView {
            buf,
            hdrs,
            _stage: PhantomData,
        })
    }

    pub fn check_syn(&self) -> Result<(), Skip> {
        if is_syn(self.hdrs.flags) {
            Ok(())
        } else {
            Err(Skip::NotSyn)
        }
    }

    /// A TCP header of exactly 60 bytes after insertion is fine.
    pub fn check_space(&self) -> Result<(), Skip> {
        if self.hdrs.tcp_len + ToaV4::LEN <= TCP_HDR_MAX {
            Ok(())
        } else {
            Err(Skip::NoSpace)
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot, Skip> {
        let l4 = self.hdrs.l4_off;
        let saddr = self
            .buf
            .load(ETH_HDR_LEN + IPV4_SADDR_OFF)
            .map_err(|_| Skip::TooShort)?;
        let tot_len = self
            .buf
            .load(ETH_HDR_LEN + IPV4_TOT_LEN_OFF)
            .map_err(|_| Skip::TooShort)?;
        let sport = self
            .buf
            .load(l4 + TCP_SPORT_OFF)
            .map_err(|_| Skip::TooShort)?;
        Ok(Snapshot {
            saddr,
            sport,
            tot_len,
            flags: self.hdrs.flags,
            ip_len: self.hdrs.ip_len,
            tcp_len: self.hdrs.tcp_len,
        })
    }

    /// Opens `extra` bytes after the TCP header, consuming every offset.
    ///
    /// The frame grows at its end and whatever follows the TCP header is
    /// moved back, so no header changes position. A failed resize that still
    /// changed the frame length is reported as degraded, not as a clean pass.
    pub fn grow(self, extra: usize) -> Result<Grown<'a, B>, Verdict> {
        let before = self.buf.len();
        match open_at(self.buf, self.hdrs.l4_off + self.hdrs.tcp_len, extra) {
            Ok(()) => Ok(Grown {
                buf: self.buf,
                expected_len: before + extra,
                extra,
            }),
            Err(_) if self.buf.len() == before => Err(Verdict::Pass(Skip::ResizeFailed)),
            Err(_) => Err(Verdict::Degraded(Skip::ResizeFailed)),
        }
    }
}

/// A frame that was just resized. Carries no offsets.
pub struct Grown<'a, B> {
    buf: &'a mut B,
    expected_len: usize,
    extra: usize,
}

impl<'a, B: SkbBuf> Grown<'a, B> {
    /// Reparses from scratch and checks the headers still match what was
    /// snapshotted and that the new bytes are inside the frame.
    pub fn revalidate(self, snap: &Snapshot) -> Result<PacketView<'a, B, PostResize>, Skip> {
        if self.buf.len() != self.expected_len {
            return Err(Skip::TooShort);
        }
        let hdrs = parse_headers(&*self.buf)?;
        if hdrs.ip_len != snap.ip_len || hdrs.tcp_len != snap.tcp_len || hdrs.flags != snap.flags
        {
            return Err(Skip::TooShort);
        }
        if self.buf.len() < hdrs.l4_off + hdrs.tcp_len + self.extra {
            return Err(Skip::TooShort);
        }
        Ok(PacketView {
            buf: self.buf,
            hdrs,
            _stage: PhantomData,
        })
    }
}

impl<'a, B: SkbBuf> PacketView<'a, B, PostResize> {
    /// Writes the option, both length fields and all checksum deltas.
    ///
    /// Runs to the end whatever fails on the way; the frame cannot shrink back,
    /// so a half written header is worse than a best effort one. Returns the
    /// first failure.
    pub fn finish(self, plan: &Plan) -> Result<(), Skip> {
        let l4 = self.hdrs.l4_off;
        let opt_off = l4 + self.hdrs.tcp_len;
        let ip_check = ETH_HDR_LEN + IPV4_CHECK_OFF;
        let tcp_check = l4 + TCP_CHECK_OFF;
        let buf = self.buf;
        let mut failed = false;

        failed |= buf.store(opt_off, &plan.toa.to_bytes()).is_err();
        failed |= buf
            .store(ETH_HDR_LEN + IPV4_TOT_LEN_OFF, &plan.new_tot_len)
            .is_err();
        failed |= buf.store(l4 + TCP_FLAGS_OFF, &plan.new_flags).is_err();

        failed |= buf
            .l3_csum_replace(ip_check, plan.old_tot_len, plan.new_tot_len)
            .is_err();

        failed |= buf
            .l4_csum_replace(tcp_check, plan.old_flags, plan.new_flags, false)
            .is_err();
        let [w0, w1, w2, w3] = plan.toa.words();
        failed |= buf.l4_csum_replace(tcp_check, [0, 0], w0, false).is_err();
        failed |= buf.l4_csum_replace(tcp_check, [0, 0], w1, false).is_err();
        failed |= buf.l4_csum_replace(tcp_check, [0, 0], w2, false).is_err();
        failed |= buf.l4_csum_replace(tcp_check, [0, 0], w3, false).is_err();
        failed |= buf
            .l4_csum_replace(tcp_check, plan.old_seg_len, plan.new_seg_len, true)
            .is_err();

        if failed {
            Err(Skip::StoreFailed)
        } else {
            Ok(())
        }
    }
}

fn prepare<B: SkbBuf>(buf: &mut B) -> Result<(PacketView<'_, B, PreResize>, Snapshot), Skip> {
    let view = PacketView::parse(buf)?;
    view.check_syn()?;
    view.check_space()?;
    let snap = view.snapshot()?;
    Ok((view, snap))
}

/// Inserts the TOA option built from the frame's own source address and port.
#[inline(always)]
pub fn inject<B: SkbBuf>(buf: &mut B) -> Verdict {
    inject_planned(buf, Plan::new)
}

/// Same as [`inject`] with a caller supplied record.
#[inline(always)]
pub fn inject_with<B, F>(buf: &mut B, make: F) -> Verdict
where
    B: SkbBuf,
    F: FnOnce(&Snapshot) -> Toa,
{
    inject_planned(buf, |snap| Plan::build(snap, make(snap)))
}

#[inline(always)]
fn inject_planned<B, F>(buf: &mut B, plan: F) -> Verdict
where
    B: SkbBuf,
    F: FnOnce(&Snapshot) -> Result<Plan, Skip>,
{
    let (view, snap) = match prepare(buf) {
        Ok(v) => v,
        Err(skip) => return Verdict::Pass(skip),
    };
    let plan = match plan(&snap) {
        Ok(plan) => plan,
        Err(skip) => return Verdict::Pass(skip),
    };
    let grown = match view.grow(ToaV4::LEN) {
        Ok(grown) => grown,
        Err(verdict) => return verdict,
    };
    let view = match grown.revalidate(&snap) {
        Ok(view) => view,
        Err(skip) => return Verdict::Degraded(skip),
    };
    match view.finish(&plan) {
        Ok(()) => Verdict::Injected(plan.toa),
        Err(skip) => Verdict::Degraded(skip),
    }
}
