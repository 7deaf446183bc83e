//! Address prefixes: an address family, a significant bit length and the
//! address bytes, stored as a canonical left-aligned key.

use crate::constants::{V4_BITS, V6_BITS};
use crate::helpers::{canonical, comp_with_mask, get_bit, key_from_bytes};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub const fn max_bits(self) -> u8 {
        match self {
            Family::V4 => V4_BITS,
            Family::V6 => V6_BITS,
        }
    }

    pub const fn addr_len(self) -> usize {
        match self {
            Family::V4 => 4,
            Family::V6 => 16,
        }
    }

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// An immutable CIDR-style key.
///
/// Bits past `bitlen` are zeroed on construction, so two prefixes that differ
/// only in host bits compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    family: Family,
    bitlen: u8,
    key: u128,
}

impl Prefix {
    /// Build a prefix from raw big-endian address bytes.
    ///
    /// Returns `None` when `bytes` is shorter than the family's address or
    /// `bitlen` is wider than the family.
    pub fn new(family: Family, bytes: &[u8], bitlen: u8) -> Option<Self> {
        if bitlen > family.max_bits() {
            return None;
        }
        // only the bytes that carry significant bits are copied
        let needed = (bitlen as usize).div_ceil(8);
        if bytes.len() < family.addr_len() {
            return None;
        }
        Some(Self {
            family,
            bitlen,
            key: canonical(key_from_bytes(&bytes[..needed]), bitlen),
        })
    }

    /// Full-length prefix for a single host address.
    pub fn host(family: Family, bytes: &[u8]) -> Option<Self> {
        Self::new(family, bytes, family.max_bits())
    }

    /// Full-length prefix for `ip`. IPv4-mapped IPv6 addresses are folded
    /// into their IPv4 form so both spellings land on the same key.
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip.to_canonical() {
            IpAddr::V4(v4) => Self::from_v4(v4, V4_BITS),
            IpAddr::V6(v6) => Self::from_v6(v6, V6_BITS),
        }
    }

    fn from_v4(addr: Ipv4Addr, bitlen: u8) -> Self {
        let bitlen = bitlen.min(V4_BITS);
        Self {
            family: Family::V4,
            bitlen,
            key: canonical(key_from_bytes(&addr.octets()), bitlen),
        }
    }

    fn from_v6(addr: Ipv6Addr, bitlen: u8) -> Self {
        let bitlen = bitlen.min(V6_BITS);
        Self {
            family: Family::V6,
            bitlen,
            key: canonical(u128::from(addr), bitlen),
        }
    }

    /// Parse `"addr"` or `"addr/bitlen"`.
    ///
    /// The family is taken from the syntax (a `:` means IPv6); a `hint` that
    /// disagrees with it yields `None`. A missing bit length means a host
    /// prefix, and an out-of-range one is clamped to `0..=width`.
    /// IPv4-mapped addresses (`::ffff:a.b.c.d/n`, `n >= 96`) fold into the
    /// IPv4 family as `a.b.c.d/(n - 96)` unless the hint asks for IPv6.
    pub fn from_text(hint: Option<Family>, text: &str) -> Option<Self> {
        let text = text.trim();
        let (addr, len) = match text.split_once('/') {
            Some((a, l)) => (a.trim(), Some(l.trim())),
            None => (text, None),
        };
        if !addr.contains(':') {
            if hint == Some(Family::V6) {
                return None;
            }
            let bitlen = match len {
                None => V4_BITS,
                Some(l) => clamp_bitlen(l, V4_BITS)?,
            };
            return addr.parse().ok().map(|a| Self::from_v4(a, bitlen));
        }
        let bitlen = match len {
            None => V6_BITS,
            Some(l) => clamp_bitlen(l, V6_BITS)?,
        };
        let v6: Ipv6Addr = addr.parse().ok()?;
        match v6.to_ipv4_mapped() {
            Some(v4) if hint != Some(Family::V6) && bitlen >= V6_BITS - V4_BITS => {
                Some(Self::from_v4(v4, bitlen - (V6_BITS - V4_BITS)))
            }
            _ if hint == Some(Family::V4) => None,
            _ => Some(Self::from_v6(v6, bitlen)),
        }
    }

    #[inline]
    pub fn family(&self) -> Family {
        self.family
    }

    #[inline]
    pub fn bitlen(&self) -> u8 {
        self.bitlen
    }

    /// Canonical left-aligned key (host bits zeroed).
    #[inline]
    pub fn key(&self) -> u128 {
        self.key
    }

    /// Address bytes; only the first `ceil(bitlen / 8)` are meaningful.
    pub fn bytes(&self) -> [u8; 16] {
        self.key.to_be_bytes()
    }

    #[inline]
    pub fn bit(&self, index: u8) -> bool {
        index < self.family.max_bits() && get_bit(self.key, index) == 1
    }

    /// True when `other` lies inside this prefix.
    pub fn covers(&self, other: &Prefix) -> bool {
        self.family == other.family
            && self.bitlen <= other.bitlen
            && comp_with_mask(self.key, other.key, self.bitlen)
    }

    pub fn is_host(&self) -> bool {
        self.bitlen == self.family.max_bits()
    }

    pub fn addr(&self) -> IpAddr {
        match self.family {
            Family::V4 => IpAddr::V4(Ipv4Addr::from((self.key >> 96) as u32)),
            Family::V6 => IpAddr::V6(Ipv6Addr::from(self.key)),
        }
    }

    pub fn to_net(&self) -> IpNet {
        match self.addr() {
            IpAddr::V4(a) => IpNet::V4(
                Ipv4Net::new(a, self.bitlen).expect("bitlen bounded by the IPv4 width"),
            ),
            IpAddr::V6(a) => IpNet::V6(
                Ipv6Net::new(a, self.bitlen).expect("bitlen bounded by the IPv6 width"),
            ),
        }
    }
}

/// Optional sign and decimal digits, saturated into `0..=width`.
fn clamp_bitlen(text: &str, width: u8) -> Option<u8> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if negative {
        return Some(0);
    }
    // all digits, so the only parse failure left is overflow
    Some(digits.parse::<u64>().map_or(width, |n| n.min(width as u64) as u8))
}

impl From<IpNet> for Prefix {
    fn from(net: IpNet) -> Self {
        match net {
            IpNet::V4(n) => Self::from_v4(n.addr(), n.prefix_len()),
            IpNet::V6(n) => Self::from_v6(n.addr(), n.prefix_len()),
        }
    }
}

impl From<IpAddr> for Prefix {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.bitlen)
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Prefix {
        Prefix::from_text(None, s).unwrap()
    }

    #[test]
    fn host_bits_are_ignored() {
        assert_eq!(p("10.1.2.3/8"), p("10.0.0.0/8"));
        assert_eq!(p("10.1.2.3/8").to_string(), "10.0.0.0/8");
        assert_ne!(p("10.0.0.0/8"), p("10.0.0.0/9"));
    }

    #[test]
    fn text_defaults_and_clamps() {
        assert_eq!(p("1.2.3.4").bitlen(), 32);
        assert_eq!(p("2001:db8::1").bitlen(), 128);
        assert_eq!(p("1.2.3.4/40").bitlen(), 32);
        assert_eq!(p("1.2.3.4/-3").bitlen(), 0);
        assert_eq!(p("2001:db8::/300").bitlen(), 128);
        assert_eq!(p(" 192.168.0.0 / 16 ").to_string(), "192.168.0.0/16");
        assert_eq!(p("10.0.0.0/99999999999999999999").bitlen(), 32);
        assert_eq!(p("2001:db8::/+64").bitlen(), 64);
        assert_eq!(p("10.0.0.0/-99999999999999999999").bitlen(), 0);
        assert!(Prefix::from_text(None, "10.0.0.0/").is_none());
        assert!(Prefix::from_text(None, "10.0.0.0/1e3").is_none());
    }

    #[test]
    fn text_rejects_garbage() {
        assert!(Prefix::from_text(None, "1.2.3").is_none());
        assert!(Prefix::from_text(None, "1.2.3.4/abc").is_none());
        assert!(Prefix::from_text(None, "nonsense").is_none());
        assert!(Prefix::from_text(Some(Family::V6), "1.2.3.4").is_none());
        assert!(Prefix::from_text(Some(Family::V4), "::1").is_none());
        assert!(Prefix::from_text(Some(Family::V4), "1.2.3.4/24").is_some());
    }

    #[test]
    fn raw_constructor_validates() {
        let v4 = Prefix::new(Family::V4, &[10, 0, 0, 0], 8).unwrap();
        assert_eq!(v4, p("10.0.0.0/8"));
        assert!(Prefix::new(Family::V4, &[10, 0, 0, 0], 33).is_none());
        assert!(Prefix::new(Family::V6, &[0; 4], 64).is_none());
        let h = Prefix::host(Family::V6, &[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1])
            .unwrap();
        assert_eq!(h, p("2001:db8::1"));
    }

    #[test]
    fn mapped_addresses_fold_to_v4() {
        let mapped: IpAddr = "::ffff:1.2.3.4".parse().unwrap();
        let plain: IpAddr = "1.2.3.4".parse().unwrap();
        assert_eq!(Prefix::from_ip(mapped), Prefix::from_ip(plain));
        assert_eq!(Prefix::from_ip(mapped).family(), Family::V4);
    }

    #[test]
    fn mapped_text_folds_to_v4() {
        assert_eq!(p("::ffff:192.0.2.7"), p("192.0.2.7"));
        assert_eq!(p("::ffff:192.0.2.0/120"), p("192.0.2.0/24"));
        assert_eq!(p("::ffff:0.0.0.0/96"), p("0.0.0.0/0"));
        assert_eq!(p("::ffff:0:0/80").family(), Family::V6);
        assert_eq!(
            Prefix::from_text(Some(Family::V4), "::ffff:10.0.0.1"),
            Some(p("10.0.0.1"))
        );
        let kept = Prefix::from_text(Some(Family::V6), "::ffff:10.0.0.1").unwrap();
        assert_eq!(kept.family(), Family::V6);
        assert_eq!(kept.bitlen(), 128);
    }

    #[test]
    fn coverage_uses_the_shorter_mask() {
        assert!(p("10.0.0.0/8").covers(&p("10.200.1.1")));
        assert!(!p("10.0.0.0/8").covers(&p("11.0.0.0/8")));
        assert!(!p("10.1.0.0/16").covers(&p("10.0.0.0/8")));
        assert!(p("0.0.0.0/0").covers(&p("255.255.255.255")));
        assert!(!p("::/0").covers(&p("1.2.3.4")));
    }

    #[test]
    fn ipnet_round_trip() {
        let net: IpNet = "2001:db8::/32".parse().unwrap();
        let prefix = Prefix::from(net);
        assert_eq!(prefix.to_net(), net);
        assert!(prefix.bit(2));
        assert!(!prefix.bit(0));
    }
}
