//! Flash chip type definitions

#[cfg(feature = "alloc")]
use alloc::{string::String, vec, vec::Vec};

use super::features::Features;
use crate::wp::{BitWritability, RangeDecoder, RegBitInfo, StatusRegister, WpRegBitMap};
use bitflags::bitflags;

bitflags! {
    /// Bus types a chip can be attached to.
    ///
    /// Only `SPI` is populated by any registry entry in this workspace;
    /// the others exist so the data model matches parallel/LPC/FWH parts
    /// without requiring a breaking change to add them later.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
    #[cfg_attr(feature = "std", serde(transparent))]
    pub struct BusType: u8 {
        /// Parallel flash bus
        const PARALLEL = 1 << 0;
        /// LPC (Low Pin Count) bus
        const LPC       = 1 << 1;
        /// Firmware Hub bus
        const FWH       = 1 << 2;
        /// Serial Peripheral Interface bus
        const SPI       = 1 << 3;
    }
}

impl Default for BusType {
    fn default() -> Self {
        BusType::SPI
    }
}

/// Which identification routine the registry probe workflow should run
/// for a chip. A tagged variant rather than a function pointer, per the
/// chip-registry redesign: dispatch is a `match`, not an indirect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum ProbeKind {
    /// Standard JEDEC RDID (0x9F): 3-byte manufacturer+device ID
    #[default]
    Rdid,
    /// Legacy REMS (0x90): 2-byte manufacturer+device ID
    Rems,
    /// Oldest RES (0xAB): 1-byte device ID only
    Res,
    /// Atmel AT45 status-byte probe
    At45Status,
    /// Identify via SFDP presence/content rather than a device ID match
    Sfdp,
}

/// Replay-protected monotonic counter parameters, populated only via an
/// SFDP RPMC parameter table (id=3); no static registry entry sets this
/// by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct RpmcContext {
    /// Opcode used to write the RPMC root/HMAC key and increment counters
    pub op1: u8,
    /// Opcode used to read counters and verify HMACs
    pub op2: u8,
    /// Number of independent monotonic counters (1-4)
    pub counter_count: u8,
    /// Whether busy state is polled via RDSR (false) or an op2 read (true)
    pub busy_polling_via_op2: bool,
    /// Counter-read delay, decoded as `(bits & 0xF) * {1,16,128,1000}` us
    pub read_delay_us: u32,
    /// Counter-write (increment) delay, same decoding
    pub write_delay_us: u32,
}

/// A single `{size, count}` pair within an erase strategy's region list.
///
/// A chip may erase different-sized sectors under the *same* opcode
/// (e.g. a boot-sector part with eight 4 KiB sectors followed by 64 KiB
/// blocks, all erased with the same sector-erase opcode but at
/// different addresses). `regions`, in order, tile the chip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct EraseRegion {
    /// Size in bytes of each block in this region
    pub size: u32,
    /// Number of consecutive blocks of this size
    pub count: u16,
}

impl EraseRegion {
    /// Create a new erase region
    pub const fn new(size: u32, count: u16) -> Self {
        Self { size, count }
    }

    /// Total bytes covered by this region (`size * count`)
    pub const fn total_bytes(&self) -> u32 {
        self.size * self.count as u32
    }
}

/// Erase block definition
///
/// Represents one erase strategy (opcode) supported by a flash chip, as
/// an ordered list of `{size, count}` regions. For the common case of a
/// uniform erase granularity across the whole chip, this list has a
/// single region.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg(feature = "alloc")]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct EraseBlock {
    /// SPI opcode for this erase strategy
    pub opcode: u8,
    /// Ordered list of regions; empty means this slot is unused
    pub regions: Vec<EraseRegion>,
}

/// Erase block definition (static/const version for no_std)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg(not(feature = "alloc"))]
pub struct EraseBlock {
    /// SPI opcode for this erase strategy
    pub opcode: u8,
    /// Ordered list of regions; empty means this slot is unused
    pub regions: &'static [EraseRegion],
}

impl EraseBlock {
    /// Create a uniform erase block definition: one opcode, `count` blocks
    /// of `size` bytes each, covering `size * count` bytes in total.
    #[cfg(feature = "alloc")]
    pub fn new(opcode: u8, size: u32) -> Self {
        Self {
            opcode,
            regions: vec![EraseRegion::new(size, 1)],
        }
    }

    /// Create an erase block definition from an explicit region list
    #[cfg(feature = "alloc")]
    pub fn with_regions(opcode: u8, regions: &[EraseRegion]) -> Self {
        Self {
            opcode,
            regions: regions.to_vec(),
        }
    }

    /// Create a uniform erase block covering `total_size` bytes with
    /// `total_size / size` blocks of `size` bytes each.
    #[cfg(feature = "alloc")]
    pub fn uniform(opcode: u8, size: u32, total_size: u32) -> Self {
        let count = if size == 0 { 0 } else { total_size / size };
        Self {
            opcode,
            regions: vec![EraseRegion::new(size, count as u16)],
        }
    }

    /// Regions as a slice
    pub fn regions(&self) -> &[EraseRegion] {
        &self.regions
    }

    /// The erase granularity of this strategy: the size of its first
    /// (smallest-address) region. For uniform erasers this is the only
    /// size. Returns 0 for an unused (empty-regions) slot.
    pub fn size(&self) -> u32 {
        self.regions().first().map(|r| r.size).unwrap_or(0)
    }

    /// Whether every region in this eraser uses the same block size
    pub fn is_uniform(&self) -> bool {
        match self.regions().split_first() {
            None => true,
            Some((first, rest)) => rest.iter().all(|r| r.size == first.size),
        }
    }

    /// Total bytes tiled by this eraser (sum of `size * count` over regions)
    pub fn total_bytes(&self) -> u32 {
        self.regions().iter().map(|r| r.total_bytes()).sum()
    }

    /// Whether this eraser slot is unused (no regions)
    pub fn is_empty(&self) -> bool {
        self.regions().is_empty()
    }
}

/// Write granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteGranularity {
    /// Can write individual bits (1->0 only)
    Bit,
    /// Can write individual bytes
    Byte,
    /// Must write full pages
    #[default]
    Page,
}

/// Test status for a chip operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum TestStatus {
    /// Not tested
    #[default]
    Untested,
    /// Tested and working
    Ok,
    /// Tested but has issues
    Bad,
    /// Not applicable for this chip
    Na,
}

/// Test results for various chip operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct ChipTestStatus {
    /// Probe/identification
    pub probe: TestStatus,
    /// Read operation
    pub read: TestStatus,
    /// Erase operation
    pub erase: TestStatus,
    /// Write/program operation
    pub write: TestStatus,
    /// Write protection
    pub wp: TestStatus,
}

/// Flash chip definition (owned version for runtime use)
///
/// This structure contains all the information needed to identify and
/// interact with a specific flash chip model. Uses owned types (String, Vec)
/// for runtime flexibility.
#[derive(Debug, Clone)]
#[cfg(feature = "alloc")]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashChip {
    /// Vendor name (e.g., "Winbond")
    pub vendor: String,
    /// Chip model name (e.g., "W25Q128FV")
    pub name: String,
    /// JEDEC manufacturer ID (first byte of RDID response)
    pub jedec_manufacturer: u8,
    /// JEDEC device ID (second and third bytes of RDID response)
    pub jedec_device: u16,
    /// Total flash size in bytes
    pub total_size: u32,
    /// Page size in bytes (for programming)
    pub page_size: u16,
    /// Feature flags
    #[cfg_attr(feature = "std", serde(default))]
    pub features: Features,
    /// Minimum operating voltage in millivolts
    #[cfg_attr(feature = "std", serde(default = "default_voltage_min"))]
    pub voltage_min_mv: u16,
    /// Maximum operating voltage in millivolts
    #[cfg_attr(feature = "std", serde(default = "default_voltage_max"))]
    pub voltage_max_mv: u16,
    /// Write granularity
    #[cfg_attr(feature = "std", serde(default))]
    pub write_granularity: WriteGranularity,
    /// Available erase block sizes (smallest to largest)
    pub erase_blocks: Vec<EraseBlock>,
    /// Bus type(s) this chip is attached through
    #[cfg_attr(feature = "std", serde(default))]
    pub bustype: BusType,
    /// Identification routine to run during probe
    #[cfg_attr(feature = "std", serde(default))]
    pub probe: ProbeKind,
    /// Replay-protected monotonic counter parameters, if SFDP advertised one
    #[cfg_attr(feature = "std", serde(default))]
    pub rpmc_ctx: Option<RpmcContext>,
    /// Test status
    #[cfg_attr(feature = "std", serde(default))]
    pub tested: ChipTestStatus,
}

#[cfg(feature = "std")]
fn default_voltage_min() -> u16 {
    2700
}

#[cfg(feature = "std")]
fn default_voltage_max() -> u16 {
    3600
}

/// Flash chip definition (static/const version for no_std)
///
/// This structure uses static references for zero-cost embedded use.
#[derive(Debug, Clone, Copy)]
#[cfg(not(feature = "alloc"))]
pub struct FlashChip {
    /// Vendor name (e.g., "Winbond")
    pub vendor: &'static str,
    /// Chip model name (e.g., "W25Q128FV")
    pub name: &'static str,
    /// JEDEC manufacturer ID (first byte of RDID response)
    pub jedec_manufacturer: u8,
    /// JEDEC device ID (second and third bytes of RDID response)
    pub jedec_device: u16,
    /// Total flash size in bytes
    pub total_size: u32,
    /// Page size in bytes (for programming)
    pub page_size: u16,
    /// Feature flags
    pub features: Features,
    /// Minimum operating voltage in millivolts
    pub voltage_min_mv: u16,
    /// Maximum operating voltage in millivolts
    pub voltage_max_mv: u16,
    /// Write granularity
    pub write_granularity: WriteGranularity,
    /// Available erase block sizes (smallest to largest)
    pub erase_blocks: &'static [EraseBlock],
    /// Bus type(s) this chip is attached through
    pub bustype: BusType,
    /// Identification routine to run during probe
    pub probe: ProbeKind,
    /// Replay-protected monotonic counter parameters, if SFDP advertised one
    pub rpmc_ctx: Option<RpmcContext>,
    /// Test status
    pub tested: ChipTestStatus,
}

impl FlashChip {
    /// Get the JEDEC ID as a 24-bit value (manufacturer << 16 | device)
    pub fn jedec_id(&self) -> u32 {
        ((self.jedec_manufacturer as u32) << 16) | (self.jedec_device as u32)
    }

    /// Check if this chip matches the given JEDEC ID
    pub fn matches_jedec_id(&self, manufacturer: u8, device: u16) -> bool {
        self.jedec_manufacturer == manufacturer && self.jedec_device == device
    }

    /// Check if this chip requires 4-byte addressing
    pub fn requires_4byte_addr(&self) -> bool {
        self.total_size > 16 * 1024 * 1024
    }

    /// Get the smallest erase block size across all non-empty erasers
    pub fn min_erase_size(&self) -> Option<u32> {
        self.erase_blocks()
            .iter()
            .filter(|eb| !eb.is_empty())
            .map(|eb| eb.size())
            .min()
    }

    /// Get the largest erase block size (excluding whole-chip erase)
    pub fn max_erase_size(&self) -> Option<u32> {
        self.erase_blocks()
            .iter()
            .filter(|eb| !eb.is_empty() && eb.size() < self.total_size)
            .map(|eb| eb.size())
            .max()
    }

    /// Find an erase block whose granularity matches the given size
    pub fn erase_block_for_size(&self, size: u32) -> Option<&EraseBlock> {
        self.erase_blocks()
            .iter()
            .find(|eb| !eb.is_empty() && eb.size() == size)
    }

    /// Check if a given address and length are aligned to an erase block boundary
    pub fn is_erase_aligned(&self, addr: u32, len: u32) -> bool {
        if let Some(min_erase) = self.min_erase_size() {
            addr.is_multiple_of(min_erase) && len.is_multiple_of(min_erase)
        } else {
            false
        }
    }

    /// Build the write-protection register bit map implied by this chip's
    /// `Features` flags, following the standard Winbond-style SR1/SR2
    /// layout every vendor file in the registry uses.
    ///
    /// Returns `None` if the chip advertises no write-protection features
    /// at all (no BP/TB/SEC/CMP/SRL bit), meaning WP is unsupported.
    pub fn wp_bit_map(&self) -> Option<WpRegBitMap> {
        if !self.features.intersects(
            Features::WP_TB
                | Features::WP_SEC
                | Features::WP_CMP
                | Features::WP_SRL
                | Features::WP_BP3
                | Features::WP_WPS,
        ) {
            return None;
        }

        let mut map = WpRegBitMap {
            srp: RegBitInfo::new(StatusRegister::Status1, 7, BitWritability::ReadWrite),
            bp: [
                RegBitInfo::new(StatusRegister::Status1, 2, BitWritability::ReadWrite),
                RegBitInfo::new(StatusRegister::Status1, 3, BitWritability::ReadWrite),
                RegBitInfo::new(StatusRegister::Status1, 4, BitWritability::ReadWrite),
                RegBitInfo::not_present(),
            ],
            ..WpRegBitMap::empty()
        };

        if self.features.contains(Features::WP_TB) {
            map.tb = RegBitInfo::new(StatusRegister::Status1, 5, BitWritability::ReadWrite);
        }
        if self.features.contains(Features::WP_SEC) {
            map.sec = RegBitInfo::new(StatusRegister::Status1, 6, BitWritability::ReadWrite);
        }
        if self.features.contains(Features::STATUS_REG_2) {
            if self.features.contains(Features::WP_SRL) {
                map.srl = RegBitInfo::new(StatusRegister::Status2, 0, BitWritability::ReadWrite);
            }
            if self.features.contains(Features::WP_CMP) {
                map.cmp = RegBitInfo::new(StatusRegister::Status2, 6, BitWritability::ReadWrite);
            }
            if self.features.contains(Features::WP_BP3) {
                map.bp[3] =
                    RegBitInfo::new(StatusRegister::Status2, 2, BitWritability::ReadWrite);
            }
        }
        if self.features.contains(Features::WP_WPS) {
            map.wps = RegBitInfo::new(StatusRegister::Status2, 2, BitWritability::ReadWrite);
        }

        Some(map)
    }

    /// Range-decoding algorithm to pair with [`wp_bit_map`](Self::wp_bit_map).
    ///
    /// Every chip in the registry uses the standard variable-block-size
    /// SPI25 scheme; a chip needing one of the other `RangeDecoder`
    /// variants would need a registry field to select it, which no vendor
    /// file currently requires.
    pub fn wp_decoder(&self) -> RangeDecoder {
        RangeDecoder::Spi25
    }

    /// Get vendor name as a string slice
    #[cfg(feature = "alloc")]
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Get chip name as a string slice
    #[cfg(feature = "alloc")]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get erase blocks as a slice
    #[cfg(feature = "alloc")]
    pub fn erase_blocks(&self) -> &[EraseBlock] {
        &self.erase_blocks
    }

    /// Adjust an AT45-family chip's geometry for the "power of 2" status
    /// bit read during probe. The registry stores the binary (power-of-2)
    /// geometry as baseline; when the chip reports it is *not* in
    /// power-of-2 mode, every size scales by 33/32 to the native
    /// 264/528/1056-byte segmented page geometry.
    #[cfg(feature = "alloc")]
    pub fn adjust_at45_geometry(mut self, power_of_two: bool) -> Self {
        if power_of_two || self.probe != ProbeKind::At45Status {
            return self;
        }
        self.total_size = self.total_size / 32 * 33;
        self.page_size = (self.page_size as u32 / 32 * 33) as u16;
        for eb in &mut self.erase_blocks {
            for region in &mut eb.regions {
                region.size = region.size / 32 * 33;
            }
        }
        self
    }

    /// Get vendor name as a string slice
    #[cfg(not(feature = "alloc"))]
    pub fn vendor(&self) -> &str {
        self.vendor
    }

    /// Get chip name as a string slice
    #[cfg(not(feature = "alloc"))]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Get erase blocks as a slice
    #[cfg(not(feature = "alloc"))]
    pub fn erase_blocks(&self) -> &[EraseBlock] {
        self.erase_blocks
    }
}

/// JEDEC manufacturer IDs
pub mod manufacturer {
    /// AMD/Spansion
    pub const AMD: u8 = 0x01;
    /// Atmel
    pub const ATMEL: u8 = 0x1F;
    /// EON
    pub const EON: u8 = 0x1C;
    /// Fujitsu
    pub const FUJITSU: u8 = 0x04;
    /// GigaDevice
    pub const GIGADEVICE: u8 = 0xC8;
    /// Intel
    pub const INTEL: u8 = 0x89;
    /// ISSI
    pub const ISSI: u8 = 0x9D;
    /// Macronix
    pub const MACRONIX: u8 = 0xC2;
    /// Micron
    pub const MICRON: u8 = 0x20;
    /// PMC
    pub const PMC: u8 = 0x9D;
    /// Sanyo
    pub const SANYO: u8 = 0x62;
    /// SST
    pub const SST: u8 = 0xBF;
    /// ST (now Micron)
    pub const ST: u8 = 0x20;
    /// Winbond
    pub const WINBOND: u8 = 0xEF;
    /// XMC
    pub const XMC: u8 = 0x20;
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use alloc::{string::ToString, vec};

    fn at45_chip() -> FlashChip {
        FlashChip {
            vendor: "Atmel".to_string(),
            name: "AT45DB321D".to_string(),
            jedec_manufacturer: manufacturer::ATMEL,
            jedec_device: 0x2700,
            total_size: 4 * 1024 * 1024,
            page_size: 512,
            features: Features::empty(),
            voltage_min_mv: 2700,
            voltage_max_mv: 3600,
            write_granularity: WriteGranularity::Page,
            erase_blocks: vec![
                EraseBlock::new(0x81, 512),
                EraseBlock::new(0xC7, 4 * 1024 * 1024),
            ],
            bustype: BusType::SPI,
            probe: ProbeKind::At45Status,
            rpmc_ctx: None,
            tested: ChipTestStatus::default(),
        }
    }

    #[test]
    fn at45_power_of_two_leaves_geometry_unchanged() {
        let chip = at45_chip().adjust_at45_geometry(true);
        assert_eq!(chip.page_size, 512);
        assert_eq!(chip.total_size, 4 * 1024 * 1024);
    }

    #[test]
    fn at45_native_mode_scales_by_33_over_32() {
        let chip = at45_chip().adjust_at45_geometry(false);
        assert_eq!(chip.page_size, 528);
        assert_eq!(chip.total_size, 4325376);
        assert_eq!(chip.erase_blocks[0].regions()[0].size, 528);
        assert_eq!(chip.erase_blocks[1].regions()[0].size, 4325376);
    }

    #[test]
    fn adjust_is_noop_for_non_at45_chips() {
        let mut chip = at45_chip();
        chip.probe = ProbeKind::Rdid;
        let adjusted = chip.clone().adjust_at45_geometry(false);
        assert_eq!(adjusted.page_size, chip.page_size);
        assert_eq!(adjusted.total_size, chip.total_size);
    }
}
