//! Write protection range decoding

use super::types::{RangeDecoder, WpBits, WpRange};

/// A protected range in the flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectedRange {
    /// Start address of protected region
    pub start: u32,
    /// End address of protected region (exclusive)
    pub end: u32,
}

impl ProtectedRange {
    /// Create a new protected range
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Create a range representing no protection
    pub const fn none() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Create a range representing full chip protection
    pub const fn full(size: u32) -> Self {
        Self {
            start: 0,
            end: size,
        }
    }

    /// Check if this range protects any part of the chip
    pub const fn is_protected(&self) -> bool {
        self.end > self.start
    }

    /// Get the size of the protected region
    pub const fn size(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Check if an address is within the protected range
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Check if a range overlaps with the protected region
    pub const fn overlaps(&self, start: u32, len: u32) -> bool {
        let range_end = start + len;
        !(range_end <= self.start || start >= self.end)
    }
}

/// Decode write protection status for standard BP0-BP2 + TB + SEC + CMP scheme
///
/// This is the most common write protection scheme used by Winbond, GigaDevice,
/// and many other manufacturers.
pub fn decode_spi25_wp(
    sr1: u8,
    sr2: u8,
    total_size: u32,
    has_tb: bool,
    has_sec: bool,
    has_cmp: bool,
) -> ProtectedRange {
    use crate::spi::opcodes::{SR1_BP0, SR1_BP1, SR1_BP2, SR1_SEC, SR1_TB};

    let bp = ((sr1 & SR1_BP0) >> 2) | ((sr1 & SR1_BP1) >> 2) | ((sr1 & SR1_BP2) >> 2);

    let tb = has_tb && (sr1 & SR1_TB) != 0;
    let sec = has_sec && (sr1 & SR1_SEC) != 0;
    let cmp = has_cmp && (sr2 & 0x40) != 0; // CMP is usually bit 6 of SR2

    // Calculate protected size based on BP bits
    let protected_size = match bp {
        0 => 0,
        1 => {
            if sec {
                4 * 1024
            } else {
                64 * 1024
            }
        }
        2 => {
            if sec {
                8 * 1024
            } else {
                128 * 1024
            }
        }
        3 => {
            if sec {
                16 * 1024
            } else {
                256 * 1024
            }
        }
        4 => {
            if sec {
                32 * 1024
            } else {
                512 * 1024
            }
        }
        5 => {
            if sec {
                64 * 1024
            } else {
                1024 * 1024
            }
        }
        6 => {
            if sec {
                128 * 1024
            } else {
                2 * 1024 * 1024
            }
        }
        _ => total_size,
    };

    // Clamp to chip size
    let protected_size = core::cmp::min(protected_size, total_size);

    // Calculate the range
    let (start, end) = if tb {
        // Bottom protection
        (0, protected_size)
    } else {
        // Top protection
        (total_size.saturating_sub(protected_size), total_size)
    };

    // Apply CMP bit (inverts the protected range)
    let (start, end) = if cmp {
        if start == 0 && end == 0 {
            (0, total_size)
        } else if start == 0 {
            (end, total_size)
        } else {
            (0, start)
        }
    } else {
        (start, end)
    };

    ProtectedRange::new(start, end)
}

/// Compute the protected size for a single BP value under a given decoder
///
/// `multiplier` scales the base block unit; used by [`RangeDecoder::Spi25_2xBlock`]
/// for chips whose BP ladder covers twice the address range per step.
fn block_size(bp: u8, max_bp: u8, sec: bool, total_size: u32, multiplier: u32) -> u32 {
    if bp == 0 {
        0
    } else if max_bp != 0 && bp >= max_bp {
        total_size
    } else {
        let base = if sec { 4 * 1024 } else { 64 * 1024 };
        core::cmp::min(base.saturating_mul(multiplier) << (bp - 1), total_size)
    }
}

/// Split a protected size into a (start, end) pair based on the TB (top/bottom) bit
fn tb_split(protected_size: u32, total_size: u32, tb: bool) -> (u32, u32) {
    if tb {
        (0, protected_size)
    } else {
        (total_size.saturating_sub(protected_size), total_size)
    }
}

/// Apply the CMP (complement) bit, which inverts the protected range across the chip
fn apply_cmp(start: u32, end: u32, total_size: u32, cmp: bool) -> WpRange {
    let (start, end) = if cmp {
        if start == 0 && end == 0 {
            (0, total_size)
        } else if start == 0 {
            (end, total_size)
        } else {
            (0, start)
        }
    } else {
        (start, end)
    };
    WpRange::new(start, end.saturating_sub(start))
}

/// Decode write protection bits into a protected address range
///
/// Generalizes [`decode_spi25_wp`] to an arbitrary BP bit count and to the
/// decoder variants chip definitions select via `RangeDecoder`.
pub fn decode_range(bits: &WpBits, total_size: u32, decoder: RangeDecoder) -> WpRange {
    let bp = bits.bp_value();
    let bp_count = bits.bp_count;
    let max_bp: u8 = if bp_count == 0 {
        0
    } else {
        ((1u32 << bp_count) - 1) as u8
    };
    let tb = bits.tb.unwrap_or(0) != 0;
    let sec = bits.sec.unwrap_or(0) != 0;
    let cmp = bits.cmp.unwrap_or(0) != 0;

    match decoder {
        RangeDecoder::Spi25 => {
            let protected_size = block_size(bp, max_bp, sec, total_size, 1);
            let (start, end) = tb_split(protected_size, total_size, tb);
            apply_cmp(start, end, total_size, cmp)
        }
        RangeDecoder::Spi25_64kBlock => {
            let protected_size = block_size(bp, max_bp, false, total_size, 1);
            let (start, end) = tb_split(protected_size, total_size, tb);
            apply_cmp(start, end, total_size, cmp)
        }
        RangeDecoder::Spi25_2xBlock => {
            let protected_size = block_size(bp, max_bp, sec, total_size, 2);
            let (start, end) = tb_split(protected_size, total_size, tb);
            apply_cmp(start, end, total_size, cmp)
        }
        RangeDecoder::Spi25BitCmp => {
            // Here CMP inverts the BP ladder itself instead of the final range.
            let effective_bp = if cmp { max_bp.saturating_sub(bp) } else { bp };
            let protected_size = block_size(effective_bp, max_bp, sec, total_size, 1);
            let (start, end) = tb_split(protected_size, total_size, tb);
            WpRange::new(start, end.saturating_sub(start))
        }
    }
}

/// Search for a combination of write protection bits that produces `range`
///
/// `template` supplies which optional bits (TB, SEC, CMP) are present on the
/// chip and how many BP bits it has; only those dimensions are searched.
/// Returns `None` if no combination under `decoder` produces exactly `range`.
pub fn find_bits_for_range(
    range: &WpRange,
    total_size: u32,
    template: &WpBits,
    decoder: RangeDecoder,
) -> Option<WpBits> {
    let bp_count = template.bp_count;
    let max_bp: u32 = if bp_count == 0 {
        0
    } else {
        (1u32 << bp_count) - 1
    };

    let tb_options: &[u8] = if template.tb.is_some() { &[0, 1] } else { &[0] };
    let sec_options: &[u8] = if template.sec.is_some() { &[0, 1] } else { &[0] };
    let cmp_options: &[u8] = if template.cmp.is_some() { &[0, 1] } else { &[0] };

    for &cmp in cmp_options {
        for &sec in sec_options {
            for &tb in tb_options {
                for bp in 0..=max_bp {
                    let candidate = candidate_bits(template, bp as u8, tb, sec, cmp);
                    let decoded = decode_range(&candidate, total_size, decoder);
                    if decoded.start == range.start && decoded.len == range.len {
                        return Some(candidate);
                    }
                }
            }
        }
    }

    None
}

/// Enumerate every distinct protected range reachable under `decoder`
#[cfg(feature = "alloc")]
pub fn get_all_ranges(
    template: &WpBits,
    total_size: u32,
    decoder: RangeDecoder,
) -> alloc::vec::Vec<WpRange> {
    let bp_count = template.bp_count;
    let max_bp: u32 = if bp_count == 0 {
        0
    } else {
        (1u32 << bp_count) - 1
    };

    let tb_options: &[u8] = if template.tb.is_some() { &[0, 1] } else { &[0] };
    let sec_options: &[u8] = if template.sec.is_some() { &[0, 1] } else { &[0] };
    let cmp_options: &[u8] = if template.cmp.is_some() { &[0, 1] } else { &[0] };

    let mut ranges = alloc::vec::Vec::new();
    for &cmp in cmp_options {
        for &sec in sec_options {
            for &tb in tb_options {
                for bp in 0..=max_bp {
                    let candidate = candidate_bits(template, bp as u8, tb, sec, cmp);
                    let decoded = decode_range(&candidate, total_size, decoder);
                    if !ranges.contains(&decoded) {
                        ranges.push(decoded);
                    }
                }
            }
        }
    }
    ranges
}

fn candidate_bits(template: &WpBits, bp: u8, tb: u8, sec: u8, cmp: u8) -> WpBits {
    let mut bits = WpBits::empty();
    bits.bp_count = template.bp_count;
    bits.set_bp_value(bp, template.bp_count);
    if template.tb.is_some() {
        bits.tb = Some(tb);
    }
    if template.sec.is_some() {
        bits.sec = Some(sec);
    }
    if template.cmp.is_some() {
        bits.cmp = Some(cmp);
    }
    bits
}

#[cfg(test)]
mod generalized_tests {
    use super::*;

    #[test]
    fn decode_range_no_protection() {
        let bits = WpBits {
            bp_count: 3,
            ..WpBits::empty()
        };
        let range = decode_range(&bits, 16 * 1024 * 1024, RangeDecoder::Spi25);
        assert!(!range.is_protected());
    }

    #[test]
    fn decode_range_full_chip_protection() {
        let mut bits = WpBits::empty();
        bits.set_bp_value(0b111, 3);
        let range = decode_range(&bits, 16 * 1024 * 1024, RangeDecoder::Spi25);
        assert_eq!(range, WpRange::new(0, 16 * 1024 * 1024));
    }

    #[test]
    fn find_bits_for_range_round_trips_decode() {
        let total_size = 16 * 1024 * 1024;
        let mut template = WpBits::empty();
        template.bp_count = 3;
        template.tb = Some(0);

        let mut bits = WpBits::empty();
        bits.bp_count = 3;
        bits.set_bp_value(0b001, 3);
        bits.tb = Some(0);
        let range = decode_range(&bits, total_size, RangeDecoder::Spi25);

        let found = find_bits_for_range(&range, total_size, &template, RangeDecoder::Spi25)
            .expect("a matching bit combination should exist");
        assert_eq!(decode_range(&found, total_size, RangeDecoder::Spi25), range);
    }
}
