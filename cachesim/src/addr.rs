use std::fmt;

/// A 64-bit memory address as it appears in a trace.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(u64);

impl Addr {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }
    pub const fn inner(self) -> u64 {
        self.0
    }
    pub const fn disp(self, amount: u64) -> Self {
        Self(self.0.wrapping_add(amount))
    }
}

impl From<u64> for Addr {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// mask covering the lowest `width` bits. `width` may be 64.
#[inline]
pub const fn bit_range_lower(width: u32) -> u64 {
    if width >= u64::BITS {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

/// shifts right, yielding 0 once every bit has been shifted out.
#[inline]
pub const fn shr(bin: u64, amount: u32) -> u64 {
    match bin.checked_shr(amount) {
        Some(v) => v,
        None => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAddr {
    pub tag: u64,
    pub set: usize,
    pub offset: u64,
}

/// Splits an address into `tag | set index | block offset`.
///
/// The widths come from a validated [`CacheConfig`](crate::config::CacheConfig),
/// so `set_bits + offset_bits <= 64` always holds here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressDecoder {
    set_bits: u32,
    offset_bits: u32,
}

impl AddressDecoder {
    pub const fn new(set_bits: u32, offset_bits: u32) -> Self {
        Self {
            set_bits,
            offset_bits,
        }
    }
    #[inline]
    pub fn tag(&self, addr: Addr) -> u64 {
        shr(addr.inner(), self.set_bits + self.offset_bits)
    }
    #[inline]
    pub fn set_index(&self, addr: Addr) -> usize {
        // masking by `2^s - 1` is `mod num_sets`
        (shr(addr.inner(), self.offset_bits) & bit_range_lower(self.set_bits)) as usize
    }
    #[inline]
    pub fn decode(&self, addr: Addr) -> DecodedAddr {
        DecodedAddr {
            tag: self.tag(addr),
            set: self.set_index(addr),
            offset: addr.inner() & bit_range_lower(self.offset_bits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_range_lower() {
        assert_eq!(0, bit_range_lower(0));
        assert_eq!(0b1111, bit_range_lower(4));
        assert_eq!(u64::MAX, bit_range_lower(64));
    }

    #[test]
    fn test_decode() {
        // s=2, b=2: 16 = 0b1_00_00 -> tag 1, set 0
        let d = AddressDecoder::new(2, 2);
        assert_eq!(
            DecodedAddr {
                tag: 1,
                set: 0,
                offset: 0
            },
            d.decode(Addr::new(16))
        );
        let got = d.decode(Addr::new(0xdead_beef));
        assert_eq!(0xdead_beef >> 4, got.tag);
        assert_eq!((0xdead_beef >> 2) % 4, got.set as u64);
        assert_eq!(0xdead_beef & 0b11, got.offset);
    }

    #[test]
    fn test_decode_is_pure_and_in_range() {
        let d = AddressDecoder::new(5, 3);
        for a in (0..100_000u64).step_by(97).chain([u64::MAX, u64::MAX - 31]) {
            let first = d.decode(Addr::new(a));
            assert_eq!(first, d.decode(Addr::new(a)));
            assert!(first.set < 32, "set {} out of range for {a:#x}", first.set);
        }
    }

    #[test]
    fn test_decode_whole_address_consumed() {
        // no tag bits left: every address has tag 0
        let d = AddressDecoder::new(0, 64);
        let got = d.decode(Addr::new(u64::MAX));
        assert_eq!(0, got.tag);
        assert_eq!(0, got.set);
        assert_eq!(u64::MAX, got.offset);

        let d = AddressDecoder::new(60, 4);
        let got = d.decode(Addr::new(u64::MAX));
        assert_eq!(0, got.tag);
        assert_eq!(bit_range_lower(60) as usize, got.set);
    }
}
