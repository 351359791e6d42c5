//! Fixed header layout of the frames the classifier looks at.
//!
//! Sizes, ethertypes, protocol numbers and field positions come from the
//! `network-types` header structs. The engine moves raw wire bytes through
//! [`SkbBuf`](crate::SkbBuf), so they are turned into byte offsets here once.

use core::mem::offset_of;

use network_types::{
    eth::{EthHdr, EtherType},
    ip::{IpProto, Ipv4Hdr},
    tcp::TcpHdr,
};

pub const ETH_HDR_LEN: usize = EthHdr::LEN;
pub const ETH_TYPE_OFF: usize = offset_of!(EthHdr, ether_type);
/// Ethertypes as they appear on the wire.
pub const ETH_P_IP: [u8; 2] = (EtherType::Ipv4 as u16).to_ne_bytes();
pub const ETH_P_IPV6: [u8; 2] = (EtherType::Ipv6 as u16).to_ne_bytes();

/// Fixed part of the IPv4 header.
pub const IPV4_HDR_LEN: usize = Ipv4Hdr::LEN;
pub const IPV4_TOT_LEN_OFF: usize = offset_of!(Ipv4Hdr, tot_len);
pub const IPV4_PROTO_OFF: usize = offset_of!(Ipv4Hdr, proto);
pub const IPV4_CHECK_OFF: usize = offset_of!(Ipv4Hdr, check);
pub const IPV4_SADDR_OFF: usize = offset_of!(Ipv4Hdr, src_addr);
pub const IPV4_DADDR_OFF: usize = offset_of!(Ipv4Hdr, dst_addr);
pub const IPPROTO_TCP: u8 = IpProto::Tcp as u8;

/// Fixed part of the TCP header.
pub const TCP_HDR_LEN: usize = TcpHdr::LEN;
/// Largest TCP header `doff` can describe.
pub const TCP_HDR_MAX: usize = 60;
pub const TCP_SPORT_OFF: usize = offset_of!(TcpHdr, source);
/// Data offset, reserved bits and flags share the 16-bit word before the
/// window.
pub const TCP_FLAGS_OFF: usize = offset_of!(TcpHdr, window) - 2;
pub const TCP_CHECK_OFF: usize = offset_of!(TcpHdr, check);
pub const TCP_FLAG_SYN: u8 = 0x02;

/// Network layer protocol selected by the ethertype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L3 {
    Ipv4,
    Ipv6,
}

impl L3 {
    #[inline(always)]
    pub fn from_ethertype(ethertype: [u8; 2]) -> Option<Self> {
        match ethertype {
            ETH_P_IP => Some(L3::Ipv4),
            ETH_P_IPV6 => Some(L3::Ipv6),
            _ => None,
        }
    }
}

/// IPv4 header length in bytes from the version/IHL byte.
#[inline(always)]
pub fn ihl_len(ver_ihl: u8) -> usize {
    (ver_ihl & 0x0f) as usize * 4
}

/// TCP header length in bytes from the data offset/flags word.
#[inline(always)]
pub fn doff_len(flags: [u8; 2]) -> usize {
    (flags[0] >> 4) as usize * 4
}

#[inline(always)]
pub fn is_syn(flags: [u8; 2]) -> bool {
    flags[1] & TCP_FLAG_SYN != 0
}

/// Rewrites the data offset nibble of the whole flags word.
///
/// The word is handled as one 16-bit unit so the NS bit and the flag byte
/// come back untouched.
#[inline(always)]
pub fn with_doff(flags: [u8; 2], doff_words: u8) -> [u8; 2] {
    let word = u16::from_be_bytes(flags);
    let word = (word & 0x0fff) | (((doff_words & 0x0f) as u16) << 12);
    word.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_wire() {
        assert_eq!(ETH_HDR_LEN, 14);
        assert_eq!(ETH_TYPE_OFF, 12);
        assert_eq!(ETH_P_IP, [0x08, 0x00]);
        assert_eq!(ETH_P_IPV6, [0x86, 0xdd]);

        assert_eq!(IPV4_HDR_LEN, 20);
        assert_eq!(
            (IPV4_TOT_LEN_OFF, IPV4_PROTO_OFF, IPV4_CHECK_OFF),
            (2, 9, 10)
        );
        assert_eq!((IPV4_SADDR_OFF, IPV4_DADDR_OFF), (12, 16));
        assert_eq!(IPPROTO_TCP, 6);

        assert_eq!(TCP_HDR_LEN, 20);
        assert_eq!((TCP_SPORT_OFF, TCP_FLAGS_OFF, TCP_CHECK_OFF), (0, 12, 16));
    }

    #[test]
    fn test_doff_and_flags() {
        // doff=5, SYN|ACK
        let flags = [0x50, 0x12];
        assert_eq!(doff_len(flags), 20);
        assert!(is_syn(flags));
        assert!(!is_syn([0x50, 0x10]));
    }

    #[test]
    fn test_with_doff_keeps_flags() {
        // doff=13 with NS set, all flag bits set
        let flags = [0xd1, 0xff];
        let updated = with_doff(flags, 15);
        assert_eq!(updated, [0xf1, 0xff]);
        assert_eq!(doff_len(updated), 60);

        assert_eq!(with_doff([0x50, 0x02], 7), [0x70, 0x02]);
    }

    #[test]
    fn test_ihl_ignores_version() {
        assert_eq!(ihl_len(0x45), 20);
        assert_eq!(ihl_len(0x4f), 60);
        assert_eq!(ihl_len(0x43), 12);
    }

    #[test]
    fn test_l3_from_ethertype() {
        assert_eq!(L3::from_ethertype(ETH_P_IP), Some(L3::Ipv4));
        assert_eq!(L3::from_ethertype(ETH_P_IPV6), Some(L3::Ipv6));
        assert_eq!(L3::from_ethertype([0x08, 0x06]), None);
    }
}
