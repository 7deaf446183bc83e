//! Bit helpers for prefix keys.
//!
//! Keys are the big-endian address bytes packed into a `u128`, left aligned:
//! bit 0 is the most significant bit of the first address byte, so an IPv4
//! address occupies bits 0..32 and the remaining 96 bits are zero.

/// Pack up to 16 big-endian bytes into a left-aligned key.
#[inline]
pub fn key_from_bytes(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    let n = bytes.len().min(16);
    buf[..n].copy_from_slice(&bytes[..n]);
    u128::from_be_bytes(buf)
}

/// First bit at which `key1` and `key2` differ, bounded above by `max_len`.
pub fn common_prefix_len(key1: u128, key2: u128, max_len: u8) -> u8 {
    if max_len == 0 {
        return 0;
    }
    let diff = (key1 ^ key2) & mask(max_len);
    if diff == 0 {
        return max_len;
    }
    (diff.leading_zeros() as u8).min(max_len)
}

/// Value of bit `index` (0 = most significant); bits past 127 read as zero.
#[inline]
pub fn get_bit(key: u128, index: u8) -> u8 {
    if index > 127 {
        return 0;
    }
    ((key >> (127 - index)) & 1) as u8
}

#[inline]
pub fn mask(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= 128 {
        !0u128
    } else {
        !(!0u128 >> prefix_len)
    }
}

// Canonicalise a key: zero host bits beyond `plen`.
#[inline(always)]
pub fn canonical(key: u128, plen: u8) -> u128 {
    key & mask(plen)
}

/// True when `a` and `b` agree on their first `len` bits.
#[inline]
pub fn comp_with_mask(a: u128, b: u128, len: u8) -> bool {
    (a ^ b) & mask(len) == 0
}
