//! Utility functions and helpers for ETMEM operations
//!
//! Common helpers used across the crate: address alignment against the
//! runtime page geometry, human-readable byte formatting, environment
//! probes, and summary statistics over accumulated page references and
//! classified memory grades.

use std::collections::HashMap;

use crate::accumulator::PageRef;
use crate::classification::MemoryGrade;
use crate::types::PageType;

/// True if `addr` is aligned to the host's PTE size.
pub fn is_page_aligned(addr: u64) -> bool {
    addr % PageType::Pte.page_size() == 0
}

/// True if `addr` is aligned to the host's PMD (huge page) size.
pub fn is_huge_page_aligned(addr: u64) -> bool {
    addr % PageType::Pmd.page_size() == 0
}

/// Round `addr` down to the nearest PTE boundary.
pub fn page_align_down(addr: u64) -> u64 {
    let size = PageType::Pte.page_size();
    addr & !(size - 1)
}

/// Round `addr` up to the nearest PTE boundary.
pub fn page_align_up(addr: u64) -> u64 {
    let size = PageType::Pte.page_size();
    (addr + size - 1) & !(size - 1)
}

/// Round `addr` down to the nearest PMD (huge page) boundary.
pub fn huge_page_align_down(addr: u64) -> u64 {
    let size = PageType::Pmd.page_size();
    addr & !(size - 1)
}

/// Suggest the largest page type whose alignment and size both fit a
/// range, for callers deciding how to log or report a span of memory.
pub fn suggest_page_size(start: u64, size: u64) -> u64 {
    let pud_size = PageType::Pud.page_size();
    let pmd_size = PageType::Pmd.page_size();
    if size >= pud_size && start % pud_size == 0 {
        pud_size
    } else if size >= pmd_size && start % pmd_size == 0 {
        pmd_size
    } else {
        PageType::Pte.page_size()
    }
}

/// Total byte footprint of a set of accumulated page references.
pub fn total_memory_size(refs: &[PageRef]) -> u64 {
    refs.iter().map(|r| r.page_type.page_size()).sum()
}

/// Group page references by their granularity.
pub fn group_by_type(refs: &[PageRef]) -> HashMap<PageType, Vec<PageRef>> {
    let mut groups: HashMap<PageType, Vec<PageRef>> = HashMap::new();
    for r in refs {
        groups.entry(r.page_type).or_default().push(*r);
    }
    groups
}

/// Keep only the huge-page-granularity references.
pub fn filter_huge_pages(refs: &[PageRef]) -> Vec<PageRef> {
    refs.iter().filter(|r| r.page_type.is_huge()).copied().collect()
}

/// Summary statistics over a classified [`MemoryGrade`], for daemon-side
/// reporting of how much of a task's footprint got judged cold.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradeStats {
    /// Number of hot-bucket page references.
    pub hot_pages: usize,
    /// Number of cold-bucket page references.
    pub cold_pages: usize,
    /// Byte footprint of the hot bucket.
    pub hot_bytes: u64,
    /// Byte footprint of the cold bucket.
    pub cold_bytes: u64,
}

impl GradeStats {
    /// Compute stats from a grade's two buckets.
    pub fn from_grade(grade: &MemoryGrade) -> Self {
        Self {
            hot_pages: grade.hot_pages.len(),
            cold_pages: grade.cold_pages.len(),
            hot_bytes: total_memory_size(&grade.hot_pages),
            cold_bytes: total_memory_size(&grade.cold_pages),
        }
    }

    /// Fraction of total bytes judged cold, in `[0.0, 1.0]`.
    pub fn cold_ratio(&self) -> f64 {
        let total = self.hot_bytes + self.cold_bytes;
        if total == 0 {
            0.0
        } else {
            self.cold_bytes as f64 / total as f64
        }
    }
}

/// Convert bytes to a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Check if running as root (required for most ETMEM operations).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check if the ETMEM kernel module's procfs entries are present for
/// the calling process.
pub fn is_etmem_available() -> bool {
    std::path::Path::new("/proc/self/idle_pages").exists()
        && std::path::Path::new("/proc/self/swap_pages").exists()
}

/// Convert a page count to bytes at a given page size.
#[inline]
pub const fn pages_to_bytes(pages: u64, page_size: u64) -> u64 {
    pages * page_size
}

/// Convert a byte count to the number of pages it spans at a given page
/// size, rounding up.
#[inline]
pub const fn bytes_to_pages(bytes: u64, page_size: u64) -> u64 {
    (bytes + page_size - 1) / page_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PageGeometry;

    fn init_geometry() {
        let _ = PageGeometry::init();
    }

    #[test]
    fn page_alignment_checks() {
        init_geometry();
        let pte = PageType::Pte.page_size();
        assert!(is_page_aligned(0));
        assert!(is_page_aligned(pte));
        assert!(!is_page_aligned(pte + 1));
    }

    #[test]
    fn page_align_round_trip() {
        init_geometry();
        let pte = PageType::Pte.page_size();
        assert_eq!(page_align_down(pte + 1), pte);
        assert_eq!(page_align_up(pte + 1), pte * 2);
        assert_eq!(page_align_down(pte * 2), pte * 2);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn group_by_type_buckets_correctly() {
        init_geometry();
        let refs = vec![
            PageRef { addr: 0x1000, count: 1, page_type: PageType::Pte },
            PageRef { addr: 0x2000, count: 1, page_type: PageType::Pte },
            PageRef { addr: 0x200000, count: 1, page_type: PageType::Pmd },
        ];
        let groups = group_by_type(&refs);
        assert_eq!(groups[&PageType::Pte].len(), 2);
        assert_eq!(groups[&PageType::Pmd].len(), 1);
    }

    #[test]
    fn filter_huge_pages_excludes_pte() {
        init_geometry();
        let refs = vec![
            PageRef { addr: 0x1000, count: 1, page_type: PageType::Pte },
            PageRef { addr: 0x200000, count: 1, page_type: PageType::Pmd },
        ];
        assert_eq!(filter_huge_pages(&refs).len(), 1);
    }

    #[test]
    fn grade_stats_cold_ratio() {
        init_geometry();
        let grade = MemoryGrade {
            hot_pages: vec![PageRef { addr: 0x1000, count: 5, page_type: PageType::Pte }],
            cold_pages: vec![
                PageRef { addr: 0x2000, count: 1, page_type: PageType::Pte },
                PageRef { addr: 0x3000, count: 1, page_type: PageType::Pte },
            ],
        };
        let stats = GradeStats::from_grade(&grade);
        assert_eq!(stats.hot_pages, 1);
        assert_eq!(stats.cold_pages, 2);
        assert!((stats.cold_ratio() - (2.0 / 3.0)).abs() < 0.001);
    }

    #[test]
    fn page_conversions() {
        assert_eq!(pages_to_bytes(10, 4096), 40960);
        assert_eq!(bytes_to_pages(4097, 4096), 2);
    }
}
