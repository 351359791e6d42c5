//! The TOA (TCP Option Address) records.
//!
//! Port and address are copied verbatim from headers that are already in
//! network byte order, so they are stored as byte arrays and never swapped.

/// Option kind of the IPv4 record.
pub const TOA_KIND: u8 = 254;
/// Option kind of the IPv6 record.
pub const TOA_V6_KIND: u8 = 253;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToaV4 {
    pub kind: u8,
    pub len: u8,
    pub port: [u8; 2],
    pub ip: [u8; 4],
}

impl ToaV4 {
    pub const LEN: usize = 8;

    #[inline(always)]
    pub fn new(port: [u8; 2], ip: [u8; 4]) -> Self {
        ToaV4 {
            kind: TOA_KIND,
            len: Self::LEN as u8,
            port,
            ip,
        }
    }

    #[inline(always)]
    pub fn to_bytes(&self) -> [u8; 8] {
        let [p0, p1] = self.port;
        let [a, b, c, d] = self.ip;
        [self.kind, self.len, p0, p1, a, b, c, d]
    }

    /// The record as the four 16-bit words it adds to a TCP checksum.
    #[inline(always)]
    pub fn words(&self) -> [[u8; 2]; 4] {
        let b = self.to_bytes();
        [[b[0], b[1]], [b[2], b[3]], [b[4], b[5]], [b[6], b[7]]]
    }

    /// Port in host order, for display.
    pub fn port(&self) -> u16 {
        u16::from_be_bytes(self.port)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToaV6 {
    pub kind: u8,
    pub len: u8,
    pub port: [u8; 2],
    pub ip6: [u8; 16],
}

impl ToaV6 {
    pub const LEN: usize = 20;

    pub fn new(port: [u8; 2], ip6: [u8; 16]) -> Self {
        ToaV6 {
            kind: TOA_V6_KIND,
            len: Self::LEN as u8,
            port,
            ip6,
        }
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[0] = self.kind;
        out[1] = self.len;
        out[2..4].copy_from_slice(&self.port);
        out[4..].copy_from_slice(&self.ip6);
        out
    }
}

/// Either TOA shape, picked by the network layer seen while parsing.
///
/// The engine only has a rewrite path for [`Toa::V4`] and turns a V6 record
/// away before touching the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toa {
    V4(ToaV4),
    V6(ToaV6),
}

impl From<ToaV4> for Toa {
    fn from(t: ToaV4) -> Self {
        Toa::V4(t)
    }
}

impl From<ToaV6> for Toa {
    fn from(t: ToaV6) -> Self {
        Toa::V6(t)
    }
}

/// Fixed endpoint the sock_ops program advertises instead of the connection's
/// remote address. Stored at index 0 of the `TOA_OVERRIDE` map; an all-zero
/// entry means "no override".
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToaOverride {
    pub enabled: u8,
    pub _pad: u8,
    pub port: [u8; 2],
    pub ip: [u8; 4],
}

impl ToaOverride {
    pub fn new(ip: [u8; 4], port: [u8; 2]) -> Self {
        ToaOverride {
            enabled: 1,
            _pad: 0,
            port,
            ip,
        }
    }

    #[inline(always)]
    pub fn active(&self) -> Option<ToaV4> {
        if self.enabled == 0 {
            return None;
        }
        Some(ToaV4::new(self.port, self.ip))
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for ToaOverride {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_wire_layout() {
        let toa = ToaV4::new(51234u16.to_be_bytes(), [1, 2, 3, 4]);
        assert_eq!(toa.to_bytes(), [254, 8, 0xc8, 0x22, 1, 2, 3, 4]);
        assert_eq!(toa.port(), 51234);
        assert_eq!(core::mem::size_of::<ToaV4>(), ToaV4::LEN);
    }

    #[test]
    fn test_v4_words() {
        let toa = ToaV4::new([0xc8, 0x22], [10, 0, 0, 1]);
        assert_eq!(
            toa.words(),
            [[254, 8], [0xc8, 0x22], [10, 0], [0, 1]]
        );
    }

    #[test]
    fn test_v6_wire_layout() {
        let mut ip6 = [0u8; 16];
        ip6[0] = 0x20;
        ip6[1] = 0x01;
        ip6[15] = 0x88;
        let toa = ToaV6::new(8080u16.to_be_bytes(), ip6);
        let bytes = toa.to_bytes();
        assert_eq!(&bytes[..4], &[253, 20, 0x1f, 0x90]);
        assert_eq!(&bytes[4..], &ip6);
        assert_eq!(core::mem::size_of::<ToaV6>(), ToaV6::LEN);
    }

    #[test]
    fn test_toa_from_shapes() {
        let v4 = ToaV4::new([0, 80], [127, 0, 0, 1]);
        let v6 = ToaV6::new([0, 80], [0; 16]);
        assert_eq!(Toa::from(v4), Toa::V4(v4));
        assert_eq!(Toa::from(v6), Toa::V6(v6));
    }

    #[test]
    fn test_override() {
        assert_eq!(ToaOverride::default().active(), None);
        let ovr = ToaOverride::new([114, 114, 114, 114], 11451u16.to_be_bytes());
        assert_eq!(
            ovr.active(),
            Some(ToaV4::new(11451u16.to_be_bytes(), [114, 114, 114, 114]))
        );
        assert_eq!(core::mem::size_of::<ToaOverride>(), 8);
    }
}
