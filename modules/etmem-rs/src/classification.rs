//! Classification output: hot/cold page-reference buckets
//!
//! [`MemoryGrade`] is what a scan invocation's accumulated [`PageRef`]s
//! turn into once a threshold decides which addresses are worth
//! migrating. The threshold *policy* is explicitly out of scope for this
//! engine (spec.md §1); what belongs here is the container and the
//! cleanup contract callers holding a partially built grade must use on
//! every failure path, mirroring `clean_page_refs_unexpected` /
//! `clean_memory_grade_unexpected`.

use crate::accumulator::PageRef;

/// Hot/cold split of a scan's accumulated page references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryGrade {
    /// Pages judged worth keeping resident.
    pub hot_pages: Vec<PageRef>,
    /// Pages judged worth demoting.
    pub cold_pages: Vec<PageRef>,
}

impl MemoryGrade {
    /// An empty grade.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total page references across both buckets.
    pub fn total_len(&self) -> usize {
        self.hot_pages.len() + self.cold_pages.len()
    }
}

/// Release a PageRef list, idempotent on an already-empty `Option`.
///
/// `Vec`'s own `Drop` already frees the backing storage; this function
/// exists so a caller building a `MemoryGrade` across several fallible
/// steps has one named release point to call on every early-return path,
/// instead of relying on scope exit to do the right thing implicitly.
/// Mirrors `clean_page_refs_unexpected`'s null-safe free-and-clear.
pub fn clean_page_refs_unexpected(refs: &mut Option<Vec<PageRef>>) {
    refs.take();
}

/// Release both buckets of a partially built grade, idempotent on
/// `None`. Mirrors `clean_memory_grade_unexpected`.
pub fn clean_memory_grade_unexpected(grade: &mut Option<MemoryGrade>) {
    grade.take();
}

/// Placeholder threshold classifier: splits accumulated page references
/// into hot/cold buckets on `count >= threshold`.
///
/// This is not the classification policy spec.md excludes from scope --
/// it is the minimal split the daemon needs before it can hand a
/// `MemoryGrade` to the migration collaborator (SPEC_FULL.md §4.9). A
/// real deployment is expected to replace this with something that
/// accounts for page type and recency, not a single global cutoff.
pub fn classify_by_threshold(refs: &[PageRef], threshold: i64) -> MemoryGrade {
    let mut grade = MemoryGrade::new();
    for r in refs {
        if r.count >= threshold {
            grade.hot_pages.push(*r);
        } else {
            grade.cold_pages.push(*r);
        }
    }
    grade
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageType;

    fn page_ref(addr: u64, count: i64) -> PageRef {
        PageRef {
            addr,
            count,
            page_type: PageType::Pte,
        }
    }

    #[test]
    fn splits_on_threshold_inclusive() {
        let refs = vec![page_ref(0x1000, 5), page_ref(0x2000, 10), page_ref(0x3000, 1)];
        let grade = classify_by_threshold(&refs, 5);
        assert_eq!(grade.hot_pages.len(), 2);
        assert_eq!(grade.cold_pages.len(), 1);
        assert_eq!(grade.cold_pages[0].addr, 0x3000);
    }

    #[test]
    fn empty_input_yields_empty_grade() {
        let grade = classify_by_threshold(&[], 5);
        assert_eq!(grade.total_len(), 0);
    }

    #[test]
    fn clean_page_refs_is_idempotent_on_none() {
        let mut refs: Option<Vec<PageRef>> = None;
        clean_page_refs_unexpected(&mut refs);
        assert!(refs.is_none());
    }

    #[test]
    fn clean_memory_grade_clears_both_buckets() {
        let mut grade = Some(MemoryGrade {
            hot_pages: vec![page_ref(0x1000, 5)],
            cold_pages: vec![page_ref(0x2000, 1)],
        });
        clean_memory_grade_unexpected(&mut grade);
        assert!(grade.is_none());
    }
}
