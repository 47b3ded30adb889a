//! Write protection support
//!
//! This module provides types and functions for working with flash chip
//! write protection.

mod ops;
mod ranges;
mod types;

pub use ops::{
    disable_wp, read_wp_bits, read_wp_config, set_wp_mode, set_wp_range, write_wp_bits,
    write_wp_config, WpError, WpResult, WriteOptions,
};
#[cfg(feature = "alloc")]
pub use ops::get_available_ranges;
pub use ranges::{decode_range, decode_spi25_wp, find_bits_for_range, ProtectedRange};
#[cfg(feature = "alloc")]
pub use ranges::get_all_ranges;
pub use types::{
    BitWritability, RangeDecoder, RegBitInfo, StatusRegister, WpBits, WpConfig, WpMode, WpRange,
    WpRegBitMap, MAX_BP_BITS,
};
