//! Type definitions for ETMEM operations
//!
//! This module contains data structures, constants, and type definitions
//! for the ETMEM (Enhanced Tiered Memory) subsystem.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{EtmemError, Result};
use crate::geometry::PageGeometry;

/// Maximum buffer size for idle page kernel buffer
pub const PAGE_IDLE_KBUF_SIZE: usize = 8000;

/// Minimum buffer size for page scan operations
pub const PAGE_IDLE_BUF_MIN: usize = std::mem::size_of::<u64>() * 2 + 3;

/// Invalid page constant (used when address is not found)
pub const INVALID_PAGE: u64 = !0u64;

/// Watermark maximum percentage
pub const WATERMARK_MAX: u32 = 100;

/// IOCTL magic numbers for ETMEM operations
pub const IDLE_SCAN_MAGIC: u8 = 0x66;
pub const RECLAIM_SWAPCACHE_MAGIC: u8 = 0x77;

/// Maximum number of pages to scan per iteration
pub const SWAP_SCAN_NUM_MAX: u32 = 32;

/// Flag to trigger rescan
pub const RET_RESCAN_FLAG: u32 = 0x10000;

/// Fan-out of a PMD hole: the number of PTE-idle entries one
/// `PmdIdlePtes` record expands to.
pub const PMD_IDLE_PTES_FANOUT: u32 = 512;

/// Floor for the per-VMA decoder buffer size, in bytes. The scanner sizes
/// its read buffer as `(walk_end - walk_start) / (8 * PTE_size)` -- the
/// kernel's one-record-byte-per-eight-PTEs encoding ratio -- but never
/// smaller than this, so a short VMA still gets a buffer the kernel module
/// considers usable. Mirrors `EPT_IDLE_BUF_MIN` from the kernel module's
/// header (not reproduced in `original_source/`, so pinned here as a
/// deployment constant rather than derived).
pub const EPT_IDLE_BUF_MIN: usize = 100;

/// Marker byte for the "set current address" directive in the idle-page
/// stream.
pub const PIP_CMD_SET_HVA: u8 = 0xA0;

/// Granularity of a page-table entry. Byte sizes are derived from the
/// host's page size at runtime (see [`crate::geometry::PageGeometry`]),
/// not hardcoded -- the same stream can carry 4 KiB, 2 MiB, or 1 GiB
/// records depending on which translation level reported idle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageType {
    /// Page-table-entry granularity (4 KiB on most hosts).
    Pte,
    /// Page-middle-directory granularity (2 MiB on most hosts).
    Pmd,
    /// Page-upper-directory granularity (1 GiB on most hosts).
    Pud,
}

impl PageType {
    /// Byte size of this granularity, read from the process-wide
    /// geometry singleton.
    ///
    /// # Panics
    /// Panics if [`PageGeometry::init`] has not run yet.
    pub fn page_size(&self) -> u64 {
        let geometry = PageGeometry::get();
        match self {
            PageType::Pte => geometry.pte_size(),
            PageType::Pmd => geometry.pmd_size(),
            PageType::Pud => geometry.pud_size(),
        }
    }

    /// True for the two huge-page granularities.
    pub const fn is_huge(&self) -> bool {
        matches!(self, PageType::Pmd | PageType::Pud)
    }
}

/// Access weight class an idle-kind record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClass {
    /// Hardware access bit clear: the page has not been touched this scan.
    Idle,
    /// Hardware dirty bit set: the page was written.
    Written,
    /// Present but neither idle nor dirty (e.g. PUD-present): treated as read.
    Read,
}

/// The raw classification a decoded idle-page record carries.
///
/// Indices 0..=9 are pinned to the kernel module's documented layout
/// (reproduced in `original_source/etmemd_scan.c`'s `g_page_idle_kind`
/// table); index 9 is the PMD-hole marker. Modeled as an exhaustive
/// tagged enum so a missing case in the page-type/weight tables below is
/// a compile-time error rather than a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IdleKind {
    /// 4 KiB page was accessed (A bit set in PTE).
    PteAccessed = 0,
    /// 2 MiB page was accessed (A bit set in PMD).
    PmdAccessed = 1,
    /// 1 GiB page is present (PUD present bit).
    PudPresent = 2,
    /// 4 KiB page is dirty (D bit set in PTE).
    PteDirty = 3,
    /// 2 MiB page is dirty (D bit set in PMD).
    PmdDirty = 4,
    /// 4 KiB page is idle (A bit not set in PTE).
    PteIdle = 5,
    /// 2 MiB page is idle (A bit not set in PMD).
    PmdIdle = 6,
    /// 2 MiB PMD entry is a hole (not present): recorded at idle weight,
    /// same as any other idle observation -- an unmapped range is, for
    /// tiering purposes, maximally idle.
    PmdHole = 7,
    /// 4 KiB page table entry is a hole (not present); see [`Self::PmdHole`].
    PteHole = 8,
    /// All PTEs within a PMD are idle: expands to `nr * 512` individual
    /// PTE-idle entries rather than being recorded as one PMD-sized run.
    PmdIdlePtes = 9,
}

impl IdleKind {
    /// Convert from the raw nibble value in a decoded record.
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PteAccessed),
            1 => Some(Self::PmdAccessed),
            2 => Some(Self::PudPresent),
            3 => Some(Self::PteDirty),
            4 => Some(Self::PmdDirty),
            5 => Some(Self::PteIdle),
            6 => Some(Self::PmdIdle),
            7 => Some(Self::PmdHole),
            8 => Some(Self::PteHole),
            9 => Some(Self::PmdIdlePtes),
            _ => None,
        }
    }

    /// The page-table granularity this idle-kind reports on. `PmdIdlePtes`
    /// reports on PMD-sized ranges but the entries it *expands to* are
    /// PTE-granularity idle records -- see [`IdleKind::hole_expansion_type`].
    pub const fn page_type(&self) -> PageType {
        match self {
            IdleKind::PteAccessed | IdleKind::PteDirty | IdleKind::PteIdle | IdleKind::PteHole => {
                PageType::Pte
            }
            IdleKind::PmdAccessed
            | IdleKind::PmdDirty
            | IdleKind::PmdIdle
            | IdleKind::PmdIdlePtes
            | IdleKind::PmdHole => PageType::Pmd,
            IdleKind::PudPresent => PageType::Pud,
        }
    }

    /// The page type emitted entries expand to when this is a hole
    /// record (always PTE: the kernel only emits `PmdIdlePtes` for
    /// PMD-sized ranges of idle PTEs).
    pub const fn hole_expansion_type() -> PageType {
        PageType::Pte
    }

    /// Access weight class. Pinned against ordinal index, not name.
    pub const fn access_class(&self) -> AccessClass {
        let idx = *self as u8;
        if idx >= IdleKind::PteIdle as u8 {
            AccessClass::Idle
        } else if idx >= IdleKind::PteDirty as u8 {
            AccessClass::Written
        } else {
            AccessClass::Read
        }
    }

    /// True for the hole-expansion kind.
    pub const fn is_hole_expansion(&self) -> bool {
        matches!(self, IdleKind::PmdIdlePtes)
    }
}

/// Per-access-class weights added into an accumulator entry's `count`
/// on each observation. Configuration constants, not fixed by the
/// protocol -- tune to taste per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Added for a read-class (present, neither idle nor dirty) observation.
    pub w_read: i64,
    /// Added for a written (dirty) observation.
    pub w_write: i64,
    /// Added for an idle observation.
    pub w_idle: i64,
}

impl WeightConfig {
    /// Weight to add for a given idle-kind.
    pub const fn weight_for(&self, kind: IdleKind) -> i64 {
        match kind.access_class() {
            AccessClass::Read => self.w_read,
            AccessClass::Written => self.w_write,
            AccessClass::Idle => self.w_idle,
        }
    }
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            w_read: 1,
            w_write: 2,
            w_idle: 0,
        }
    }
}

/// PIP (Proc Idle Page) encoding helpers
///
/// The kernel encodes idle page information in a compact byte format:
/// - Upper 4 bits: idle-kind
/// - Lower 4 bits: count of consecutive pages (1..15, 0 is reserved for
///   the `PIP_CMD_SET_HVA` marker byte)
pub struct PipEncoding;

impl PipEncoding {
    /// Extract idle-kind nibble from encoded byte
    #[inline]
    pub const fn extract_kind(encoded: u8) -> u8 {
        (encoded >> 4) & 0xf
    }

    /// Extract the `nr` nibble (1..15) from encoded byte
    #[inline]
    pub const fn extract_nr(encoded: u8) -> u8 {
        encoded & 0xf
    }

    /// Compose an idle-kind and `nr` into one encoded byte.
    #[inline]
    pub const fn compose(idle_kind: u8, nr: u8) -> u8 {
        ((idle_kind & 0xf) << 4) | (nr & 0xf)
    }

    /// Decode an encoded byte into (idle-kind, nr)
    pub const fn decode(encoded: u8) -> (u8, u8) {
        (Self::extract_kind(encoded), Self::extract_nr(encoded))
    }
}

/// Idle page scan flags
///
/// These flags control the behavior of page scanning operations.
/// They can be combined using bitwise OR.
bitflags! {
    // `Serialize`/`Deserialize` come from bitflags' own `serde` feature;
    // deriving them again here would conflict with that blanket impl.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScanFlags: u32 {
        /// Only scan huge pages (maps to O_NONBLOCK)
        const SCAN_HUGE_PAGE = libc::O_NONBLOCK as u32;
        /// Stop on PMD_IDLE_PTES (maps to O_NOFOLLOW)
        const SCAN_SKIM_IDLE = libc::O_NOFOLLOW as u32;
        /// Report PTE/PMD dirty bit (maps to O_NOATIME)
        const SCAN_DIRTY_PAGE = libc::O_NOATIME as u32;
        /// Treat normal pages as huge in VM context
        const SCAN_AS_HUGE = 0o100000000;
        /// Ignore host access when scanning VM
        const SCAN_IGN_HOST = 0o200000000;
        /// Internal: scanning host for VM hole detection
        const VM_SCAN_HOST = 0o400000000;
        /// Scan specific VMA with flag
        const VMA_SCAN_FLAG = 0x1000;
    }
}

impl ScanFlags {
    /// Check if flags are valid (no reserved bits set)
    pub fn is_valid(&self) -> bool {
        let valid_mask = Self::SCAN_HUGE_PAGE.bits()
            | Self::SCAN_SKIM_IDLE.bits()
            | Self::SCAN_DIRTY_PAGE.bits()
            | Self::SCAN_AS_HUGE.bits()
            | Self::SCAN_IGN_HOST.bits()
            | Self::VM_SCAN_HOST.bits()
            | Self::VMA_SCAN_FLAG.bits();
        self.bits() & !valid_mask == 0
    }
}

/// Swapcache watermark levels
///
/// Watermarks control when proactive swapcache reclaim starts and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SwapcacheWatermark {
    /// Low watermark - start reclaiming when swapcache exceeds this
    Low = 0,
    /// High watermark - stop reclaiming when swapcache drops to this
    High = 1,
}

impl SwapcacheWatermark {
    /// Convert from raw u8 value
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Low),
            1 => Some(Self::High),
            _ => None,
        }
    }
}

/// Virtual address range, used for VMA bounds and scan windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
    /// Start address (inclusive)
    pub start: u64,
    /// End address (exclusive)
    pub end: u64,
}

impl AddressRange {
    /// Create a new address range
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Create a range from start with given size
    pub const fn with_size(start: u64, size: u64) -> Self {
        Self {
            start,
            end: start + size,
        }
    }

    /// Check if an address is within this range
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Get the size of this range in bytes
    pub const fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Check if the range is valid (start < end)
    pub const fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Check if this range overlaps with another
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl Default for AddressRange {
    fn default() -> Self {
        Self { start: 0, end: 0 }
    }
}

/// Watermark configuration for swapcache reclaim
///
/// Controls when the kernel proactively reclaims swapcache pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Low watermark percentage (0-100)
    pub low_percent: u8,
    /// High watermark percentage (0-100)
    pub high_percent: u8,
}

impl WatermarkConfig {
    /// Create a new watermark configuration
    pub const fn new(low_percent: u8, high_percent: u8) -> Self {
        Self {
            low_percent,
            high_percent,
        }
    }

    /// Validate the watermark configuration
    pub fn validate(&self) -> Result<()> {
        if self.low_percent > 100 || self.high_percent > 100 {
            return Err(EtmemError::WatermarkOutOfRange);
        }
        if self.low_percent >= self.high_percent {
            return Err(EtmemError::InvalidWatermarkOrder);
        }
        Ok(())
    }
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self::new(30, 70)
    }
}

/// Kernel buffer status after scan operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferStatus {
    /// Operation completed successfully
    Success = 0,
    /// Kernel buffer full, more data available
    KbufFull = 1,
    /// User buffer full
    BufFull = 2,
}

impl BufferStatus {
    /// Convert from raw u8 value
    pub const fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::KbufFull),
            2 => Some(Self::BufFull),
            _ => None,
        }
    }

    /// Check if more data is available
    pub const fn has_more(&self) -> bool {
        matches!(self, Self::KbufFull | Self::BufFull)
    }
}

/// ETMEM scan session configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Scan flags controlling scan behavior
    pub flags: ScanFlags,
    /// Buffer size for reading idle page data
    pub buffer_size: usize,
}

impl ScanConfig {
    /// Create a new scan configuration with default values
    pub const fn new() -> Self {
        Self {
            flags: ScanFlags::empty(),
            buffer_size: PAGE_IDLE_KBUF_SIZE,
        }
    }

    /// Set scan flags
    pub const fn with_flags(mut self, flags: ScanFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set buffer size
    pub const fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.flags.is_valid() {
            return Err(EtmemError::InvalidFlags);
        }
        if self.buffer_size < PAGE_IDLE_BUF_MIN {
            return Err(EtmemError::BufferTooSmall);
        }
        if self.buffer_size > PAGE_IDLE_KBUF_SIZE {
            return Err(EtmemError::BufferTooSmall);
        }
        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Page swap configuration
#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Enable proactive swapcache reclaim
    pub proactive_reclaim: bool,
    /// Watermark configuration for reclaim
    pub watermark: WatermarkConfig,
    /// Maximum number of pages to swap per operation
    pub max_pages: u32,
}

impl SwapConfig {
    /// Create a new swap configuration with defaults
    pub const fn new() -> Self {
        Self {
            proactive_reclaim: false,
            watermark: WatermarkConfig::new(30, 70),
            max_pages: SWAP_SCAN_NUM_MAX,
        }
    }

    /// Enable proactive reclaim
    pub const fn with_proactive_reclaim(mut self, enable: bool) -> Self {
        self.proactive_reclaim = enable;
        self
    }

    /// Set watermark configuration
    pub const fn with_watermark(mut self, watermark: WatermarkConfig) -> Self {
        self.watermark = watermark;
        self
    }

    /// Set maximum pages per operation
    pub const fn with_max_pages(mut self, max: u32) -> Self {
        self.max_pages = max;
        self
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_geometry() {
        let _ = PageGeometry::init();
    }

    #[test]
    fn test_pip_encoding() {
        let encoded = PipEncoding::compose(IdleKind::PteIdle as u8, 5);
        assert_eq!(PipEncoding::extract_kind(encoded), IdleKind::PteIdle as u8);
        assert_eq!(PipEncoding::extract_nr(encoded), 5);

        let (k, nr) = PipEncoding::decode(encoded);
        assert_eq!(k, IdleKind::PteIdle as u8);
        assert_eq!(nr, 5);
    }

    #[test]
    fn test_idle_kind_table() {
        assert_eq!(IdleKind::PmdAccessed.page_type(), PageType::Pmd);
        assert_eq!(IdleKind::PteIdle.page_type(), PageType::Pte);
        assert_eq!(IdleKind::PudPresent.page_type(), PageType::Pud);
        assert_eq!(IdleKind::PteIdle.access_class(), AccessClass::Idle);
        assert_eq!(IdleKind::PmdIdlePtes.access_class(), AccessClass::Idle);
        assert_eq!(IdleKind::PteDirty.access_class(), AccessClass::Written);
        assert_eq!(IdleKind::PteAccessed.access_class(), AccessClass::Read);
        assert_eq!(IdleKind::PudPresent.access_class(), AccessClass::Read);
        assert!(IdleKind::PmdIdlePtes.is_hole_expansion());
        assert!(!IdleKind::PteIdle.is_hole_expansion());
    }

    #[test]
    fn test_idle_kind_from_raw() {
        assert_eq!(IdleKind::from_raw(0), Some(IdleKind::PteAccessed));
        assert_eq!(IdleKind::from_raw(7), Some(IdleKind::PmdHole));
        assert_eq!(IdleKind::from_raw(9), Some(IdleKind::PmdIdlePtes));
        assert_eq!(IdleKind::from_raw(10), None);
        assert_eq!(IdleKind::from_raw(255), None);
    }

    #[test]
    fn test_page_type_sizes() {
        init_geometry();
        assert_eq!(PageType::Pte.page_size(), PageGeometry::get().pte_size());
        assert!(PageType::Pmd.is_huge());
        assert!(!PageType::Pte.is_huge());
    }

    #[test]
    fn test_scan_flags() {
        let flags = ScanFlags::SCAN_HUGE_PAGE | ScanFlags::SCAN_DIRTY_PAGE;
        assert!(flags.is_valid());
        assert!(flags.contains(ScanFlags::SCAN_HUGE_PAGE));
        assert!(flags.contains(ScanFlags::SCAN_DIRTY_PAGE));
    }

    #[test]
    fn test_address_range() {
        let range = AddressRange::new(0x1000, 0x5000);
        assert!(range.contains(0x2000));
        assert!(!range.contains(0x5000));
        assert_eq!(range.size(), 0x4000);
        assert!(range.is_valid());

        let with_size = AddressRange::with_size(0x1000, 0x4000);
        assert_eq!(with_size, range);
    }

    #[test]
    fn test_watermark_config() {
        let config = WatermarkConfig::new(30, 70);
        assert!(config.validate().is_ok());

        let invalid = WatermarkConfig::new(70, 30);
        assert!(invalid.validate().is_err());

        let out_of_range = WatermarkConfig::new(0, 101);
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_scan_config_validation() {
        let config = ScanConfig::default();
        assert!(config.validate().is_ok());

        let invalid = ScanConfig::default().with_buffer_size(10);
        assert!(invalid.validate().is_err());
    }
}
