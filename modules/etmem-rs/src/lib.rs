//! ETMEM idle-page scan and classification engine
//!
//! This crate provides the daemon's memory-tiering core: it observes the
//! virtual-memory access behavior of a target process and classifies its
//! anonymous pages as "hot" or "cold" so that cold pages can later be
//! demoted to slower tiers (swap, persistent memory).
//!
//! # Architecture
//!
//! - **`geometry`**: host page-size derived PTE/PMD/PUD byte sizes
//! - **`vma`**: `/proc/<pid>/maps` parsing and anonymous-VMA filtering
//! - **`decoder`**: the idle-page byte-stream grammar
//! - **`accumulator`**: the ordered, deduplicated page-reference map
//! - **`scan`**: drives the per-VMA walk and the sampling loop
//! - **`classification`**: hot/cold bucketing of a scan's output
//! - **`swap`**: writes cold-page addresses to the kernel's reclaim interface
//! - **`sys`**: low-level FFI bindings to kernel procfs/IOCTL (unsafe)
//! - **`types`**: shared data structures and constants
//! - **`error`**: the crate's error type
//! - **`util`**: address alignment, formatting, and summary statistics
//!
//! # Requirements
//!
//! - Linux kernel with the ETMEM out-of-tree module loaded
//! - CAP_SYS_ADMIN capability (root access) to scan other processes
//!
//! # Example: scanning a process
//!
//! ```no_run
//! use etmem_rs::scan::Scanner;
//! use etmem_rs::types::WeightConfig;
//!
//! etmem_rs::geometry::PageGeometry::init().expect("host page size");
//! let scanner = Scanner::new(WeightConfig::default());
//! let refs = scanner.scan(std::process::id(), 3, 1, None)
//!     .expect("scan failed");
//! for r in refs.as_slice() {
//!     println!("{:#x}: weight {}", r.addr, r.count);
//! }
//! ```
//!
//! # Safety
//!
//! `unsafe` is confined to the `sys` module's FFI calls; every other
//! public API is safe Rust.

#![warn(missing_docs)]
#![warn(unsafe_op_in_unsafe_fn)]

pub mod accumulator;
pub mod classification;
pub mod decoder;
pub mod error;
pub mod geometry;
pub mod scan;
pub mod swap;
pub mod sys;
pub mod types;
pub mod util;
pub mod vma;

pub use accumulator::{PageRef, PageRefAccumulator};
pub use classification::{
    classify_by_threshold, clean_memory_grade_unexpected, clean_page_refs_unexpected, MemoryGrade,
};
pub use decoder::{decode_buffer, DecodeSummary};
pub use error::{EtmemError, Result};
pub use geometry::PageGeometry;
pub use scan::{IdlePageSource, Scanner, WalkState};
pub use swap::{PageSwapper, SwapSession, SwapcacheConfig};
pub use types::{
    AccessClass, AddressRange, BufferStatus, IdleKind, PageType, PipEncoding, ScanConfig,
    ScanFlags, SwapConfig, SwapcacheWatermark, WatermarkConfig, WeightConfig, IDLE_SCAN_MAGIC,
    INVALID_PAGE, PAGE_IDLE_BUF_MIN, PAGE_IDLE_KBUF_SIZE, RECLAIM_SWAPCACHE_MAGIC,
    RET_RESCAN_FLAG, SWAP_SCAN_NUM_MAX, WATERMARK_MAX,
};
pub use util::{
    bytes_to_pages, filter_huge_pages, format_bytes, group_by_type, huge_page_align_down,
    is_etmem_available, is_huge_page_aligned, is_page_aligned, is_root, page_align_down,
    page_align_up, pages_to_bytes, suggest_page_size, total_memory_size, GradeStats,
};
pub use vma::{Vma, VmaList, VmaPerms};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if the ETMEM subsystem's procfs entries are present for the
/// calling process.
pub fn is_available() -> bool {
    util::is_etmem_available()
}

/// Check if the current process has the permissions ETMEM operations
/// require (CAP_SYS_ADMIN, i.e. effectively root).
pub fn has_permission() -> bool {
    util::is_root()
}

/// Verify the host is ready to run ETMEM operations: page geometry must
/// be derivable, the kernel module's procfs entries must exist, and the
/// caller must hold the required permission.
///
/// # Errors
/// Returns [`EtmemError::GeometryUnavailable`] if the host page size
/// can't be queried, [`EtmemError::NotSupported`] if the kernel module
/// isn't loaded.
pub fn init() -> Result<()> {
    geometry::PageGeometry::init()?;
    if !is_available() {
        return Err(EtmemError::NotSupported);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_available_does_not_panic() {
        let _ = is_available();
    }

    #[test]
    fn re_exports_compile() {
        let _: AddressRange = AddressRange::default();
        let _: ScanFlags = ScanFlags::empty();
        let _: IdleKind = IdleKind::PteIdle;
        let _: MemoryGrade = MemoryGrade::new();
    }
}
