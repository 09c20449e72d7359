//! Page geometry for the host architecture
//!
//! PTE/PMD/PUD byte sizes are not architecture constants: on arm64 the
//! host page size can be 4 KiB, 16 KiB, or 64 KiB, which shifts every
//! other translation level. This module queries the host once via
//! `sysconf(_SC_PAGESIZE)` and derives the rest using the same radix-tree
//! arithmetic the kernel module uses, then publishes the result as a
//! process-wide, read-after-init singleton.

use std::sync::OnceLock;

use crate::error::{EtmemError, Result};

/// PTE / PMD / PUD byte sizes derived from the host page size.
///
/// Immutable once constructed. `init()` publishes exactly one instance
/// per process; every later caller reads the same value lock-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    /// log2 of the host page size.
    page_shift: u32,
    pte_size: u64,
    pmd_size: u64,
    pud_size: u64,
}

static GEOMETRY: OnceLock<PageGeometry> = OnceLock::new();

impl PageGeometry {
    /// Derive geometry from an explicit page size, bypassing `sysconf`.
    ///
    /// `page_size` must be a positive power of two. Exposed so tests (and
    /// callers probing non-default architectures) can construct geometry
    /// without depending on the host's actual page size.
    pub fn from_page_size(page_size: u64) -> Result<Self> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(EtmemError::InvalidPageSize(page_size));
        }
        let page_shift = page_size.trailing_zeros();
        // PMD covers (page_shift - 3) * 2 + 3 bits; PUD covers (page_shift - 3) * 3 + 3.
        // Four translation levels, (page_shift - 3) index bits per intermediate level,
        // 3 offset bits, matching the kernel's radix-tree layout.
        let index_bits = page_shift.saturating_sub(3);
        let pmd_shift = index_bits * 2 + 3;
        let pud_shift = index_bits * 3 + 3;
        Ok(Self {
            page_shift,
            pte_size: 1u64 << page_shift,
            pmd_size: 1u64 << pmd_shift,
            pud_size: 1u64 << pud_shift,
        })
    }

    /// Query the host's page size and derive geometry from it.
    fn from_host() -> Result<Self> {
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw <= 0 {
            return Err(EtmemError::GeometryUnavailable);
        }
        Self::from_page_size(raw as u64)
    }

    /// Initialize the process-wide geometry singleton. Idempotent: a
    /// second call returns the already-published value instead of
    /// re-querying the host.
    ///
    /// # Errors
    /// Returns `EtmemError::GeometryUnavailable` if the OS cannot report a
    /// page size, per spec.md §4.1 ("fails with a fatal configuration
    /// error").
    pub fn init() -> Result<&'static PageGeometry> {
        if let Some(g) = GEOMETRY.get() {
            return Ok(g);
        }
        let geometry = Self::from_host()?;
        Ok(GEOMETRY.get_or_init(|| geometry))
    }

    /// Read the already-initialized singleton.
    ///
    /// # Panics
    /// Panics if `init()` was never called; this is a programming error,
    /// not a runtime condition callers should recover from.
    pub fn get() -> &'static PageGeometry {
        GEOMETRY
            .get()
            .expect("PageGeometry::init() must run before PageGeometry::get()")
    }

    /// log2 of the host page size.
    pub const fn page_shift(&self) -> u32 {
        self.page_shift
    }

    /// PTE (4 KiB on most hosts) size in bytes.
    pub const fn pte_size(&self) -> u64 {
        self.pte_size
    }

    /// PMD (2 MiB on most hosts) size in bytes.
    pub const fn pmd_size(&self) -> u64 {
        self.pmd_size
    }

    /// PUD (1 GiB on most hosts) size in bytes.
    pub const fn pud_size(&self) -> u64 {
        self.pud_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_4k_geometry() {
        let g = PageGeometry::from_page_size(4096).unwrap();
        assert_eq!(g.page_shift(), 12);
        assert_eq!(g.pte_size(), 4096);
        assert_eq!(g.pmd_size(), 2 * 1024 * 1024);
        assert_eq!(g.pud_size(), 1024 * 1024 * 1024);
    }

    #[test]
    fn derives_64k_geometry() {
        // arm64 with CONFIG_ARM64_64K_PAGES
        let g = PageGeometry::from_page_size(65536).unwrap();
        assert_eq!(g.page_shift(), 16);
        assert_eq!(g.pte_size(), 65536);
        // (16-3)*2+3 = 29 -> 512 MiB
        assert_eq!(g.pmd_size(), 1 << 29);
        // (16-3)*3+3 = 42 -> 4 TiB
        assert_eq!(g.pud_size(), 1 << 42);
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(PageGeometry::from_page_size(0).is_err());
        assert!(PageGeometry::from_page_size(4097).is_err());
    }
}
