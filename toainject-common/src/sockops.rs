//! Connection callback variant: the kernel makes room in the header and asks
//! for the option bytes, so there is no resizing or checksum work here.

use crate::{
    hdr::TCP_FLAG_SYN,
    option::{ToaOverride, ToaV4},
};

// enum bpf_sock_ops_cb in uapi/linux/bpf.h
pub const BPF_SOCK_OPS_TCP_CONNECT_CB: u32 = 3;
pub const BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB: u32 = 5;
pub const BPF_SOCK_OPS_HDR_OPT_LEN_CB: u32 = 14;
pub const BPF_SOCK_OPS_WRITE_HDR_OPT_CB: u32 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockOp {
    /// Active open, before the SYN goes out.
    TcpConnect,
    PassiveEstablished,
    /// Kernel asks how many option bytes to reserve.
    HdrOptLen,
    /// Kernel asks for the option bytes.
    WriteHdrOpt,
    Other(u32),
}

impl SockOp {
    #[inline(always)]
    pub fn from_raw(op: u32) -> Self {
        match op {
            BPF_SOCK_OPS_TCP_CONNECT_CB => SockOp::TcpConnect,
            BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB => SockOp::PassiveEstablished,
            BPF_SOCK_OPS_HDR_OPT_LEN_CB => SockOp::HdrOptLen,
            BPF_SOCK_OPS_WRITE_HDR_OPT_CB => SockOp::WriteHdrOpt,
            other => SockOp::Other(other),
        }
    }
}

/// One lifecycle callback, with the peer as the kernel knows it at that point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockEvent {
    pub op: SockOp,
    pub remote_ip4: [u8; 4],
    pub remote_port: [u8; 2],
    /// Flags of the segment being built, only meaningful for the header
    /// option callbacks.
    pub tcp_flags: u8,
}

impl SockEvent {
    fn is_syn(&self) -> bool {
        self.tcp_flags & TCP_FLAG_SYN != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockReply {
    /// Turn on `BPF_SOCK_OPS_WRITE_HDR_OPT_CB_FLAG` for this socket.
    EnableHdrOptWrite,
    Reserve(u32),
    Write(ToaV4),
    Ignore,
}

/// Once header option writing is on, the kernel asks for every segment of the
/// connection. Only SYN and SYN-ACK get the record.
#[inline(always)]
pub fn on_sock_event(event: &SockEvent, ovr: Option<&ToaOverride>) -> SockReply {
    match event.op {
        SockOp::TcpConnect | SockOp::PassiveEstablished => SockReply::EnableHdrOptWrite,
        SockOp::HdrOptLen | SockOp::WriteHdrOpt if !event.is_syn() => SockReply::Ignore,
        SockOp::HdrOptLen => SockReply::Reserve(ToaV4::LEN as u32),
        SockOp::WriteHdrOpt => {
            let toa = ovr
                .and_then(ToaOverride::active)
                .unwrap_or_else(|| ToaV4::new(event.remote_port, event.remote_ip4));
            SockReply::Write(toa)
        }
        SockOp::Other(_) => SockReply::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYN: u8 = 0x02;
    const ACK: u8 = 0x10;
    const PSH: u8 = 0x08;

    fn event(op: u32) -> SockEvent {
        event_with_flags(op, SYN)
    }

    fn event_with_flags(op: u32, tcp_flags: u8) -> SockEvent {
        SockEvent {
            op: SockOp::from_raw(op),
            remote_ip4: [192, 168, 1, 7],
            remote_port: 8080u16.to_be_bytes(),
            tcp_flags,
        }
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(SockOp::from_raw(3), SockOp::TcpConnect);
        assert_eq!(SockOp::from_raw(5), SockOp::PassiveEstablished);
        assert_eq!(SockOp::from_raw(14), SockOp::HdrOptLen);
        assert_eq!(SockOp::from_raw(15), SockOp::WriteHdrOpt);
        // ACTIVE_ESTABLISHED_CB
        assert_eq!(SockOp::from_raw(4), SockOp::Other(4));
    }

    #[test]
    fn test_connection_setup_registers_interest() {
        assert_eq!(
            on_sock_event(&event(BPF_SOCK_OPS_TCP_CONNECT_CB), None),
            SockReply::EnableHdrOptWrite
        );
        assert_eq!(
            on_sock_event(&event(BPF_SOCK_OPS_PASSIVE_ESTABLISHED_CB), None),
            SockReply::EnableHdrOptWrite
        );
    }

    #[test]
    fn test_reserves_record_length() {
        assert_eq!(
            on_sock_event(&event(BPF_SOCK_OPS_HDR_OPT_LEN_CB), None),
            SockReply::Reserve(8)
        );
    }

    #[test]
    fn test_writes_remote_endpoint() {
        let reply = on_sock_event(&event(BPF_SOCK_OPS_WRITE_HDR_OPT_CB), None);
        let SockReply::Write(toa) = reply else {
            panic!("expected a write, got {reply:?}");
        };
        assert_eq!(toa.to_bytes(), [254, 8, 0x1f, 0x90, 192, 168, 1, 7]);
    }

    #[test]
    fn test_override_wins_when_enabled() {
        let ovr = ToaOverride::new([114, 114, 114, 114], 11451u16.to_be_bytes());
        assert_eq!(
            on_sock_event(&event(BPF_SOCK_OPS_WRITE_HDR_OPT_CB), Some(&ovr)),
            SockReply::Write(ToaV4::new(11451u16.to_be_bytes(), [114, 114, 114, 114]))
        );

        let off = ToaOverride::default();
        assert_eq!(
            on_sock_event(&event(BPF_SOCK_OPS_WRITE_HDR_OPT_CB), Some(&off)),
            SockReply::Write(ToaV4::new(8080u16.to_be_bytes(), [192, 168, 1, 7]))
        );
    }

    #[test]
    fn test_syn_ack_gets_record() {
        let reply = on_sock_event(
            &event_with_flags(BPF_SOCK_OPS_WRITE_HDR_OPT_CB, SYN | ACK),
            None,
        );
        assert!(matches!(reply, SockReply::Write(_)));
        assert_eq!(
            on_sock_event(&event_with_flags(BPF_SOCK_OPS_HDR_OPT_LEN_CB, SYN | ACK), None),
            SockReply::Reserve(8)
        );
    }

    #[test]
    fn test_later_segments_left_alone() {
        let ovr = ToaOverride::new([114, 114, 114, 114], 11451u16.to_be_bytes());
        for flags in [ACK, PSH | ACK, 0x11] {
            for op in [BPF_SOCK_OPS_HDR_OPT_LEN_CB, BPF_SOCK_OPS_WRITE_HDR_OPT_CB] {
                assert_eq!(
                    on_sock_event(&event_with_flags(op, flags), None),
                    SockReply::Ignore
                );
                assert_eq!(
                    on_sock_event(&event_with_flags(op, flags), Some(&ovr)),
                    SockReply::Ignore
                );
            }
        }
    }

    #[test]
    fn test_other_callbacks_ignored() {
        for op in [0, 1, 4, 10, 13] {
            assert_eq!(on_sock_event(&event(op), None), SockReply::Ignore);
        }
    }
}
