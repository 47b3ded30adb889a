//! High-level flash operations
//!
//! This module provides high-level operations for reading, writing,
//! and erasing flash chips.

mod context;
mod device;
mod operations;
mod opaque_device;
mod spi_device;
#[cfg(feature = "alloc")]
pub mod unified;

pub use context::FlashContext;
pub use device::FlashDevice;
#[cfg(feature = "alloc")]
pub use device::FlashDeviceExt;
pub use opaque_device::OpaqueFlashDevice;
pub use operations::*;
pub use spi_device::{OwnedSpiFlashDevice, SpiFlashDevice};

// `unified` duplicates a few names with `operations` (`erase_by_layout`,
// `read_by_layout`, `verify_by_layout`, `erase_region`, `verify`) because it
// operates on a `FlashDevice` trait object instead of a raw `SpiMaster` +
// `FlashContext` pair. Only re-export the names that don't collide; callers
// that want the `FlashDevice`-based layout helpers use `flash::unified::`.
#[cfg(feature = "alloc")]
pub use unified::{
    get_all_write_ranges, need_erase, need_write, read_with_progress, smart_write,
    smart_write_by_layout, smart_write_region, NoProgress, WriteProgress, WriteRange, WriteStats,
};
