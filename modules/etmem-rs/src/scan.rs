//! The idle-page scanner
//!
//! Drives one scan invocation for a pid: parse its VMAs, walk each
//! anonymous mapping's share of `/proc/<pid>/idle_pages`, and merge the
//! decoded records into a [`PageRefAccumulator`]. Repeated `loop` times
//! with `sleep` seconds in between, per spec.md §4.5.
//!
//! The byte source is abstracted behind [`IdlePageSource`] so the walking
//! logic -- which VMAs to skip, how the buffer is sized, how
//! `last_walk_end` advances -- can be exercised in tests without a real
//! `/proc/<pid>/idle_pages` file (which requires the out-of-tree kernel
//! module and CAP_SYS_ADMIN to exist at all).

use std::time::Duration;

use crate::accumulator::PageRefAccumulator;
use crate::decoder::decode_buffer;
use crate::error::{EtmemError, Result};
use crate::sys::ProcfsHandle;
use crate::types::{PageType, WeightConfig, EPT_IDLE_BUF_MIN};
use crate::vma::{parse_maps, Vma, VmaList};

/// Per-VMA scan cursor. `last_walk_end` persists across VMA iterations
/// within one pass so a decoder run that overshot `vma.end` isn't
/// re-scanned when the next VMA is visited.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkState {
    /// Start of the range being walked this iteration.
    pub walk_start: u64,
    /// End of the range being walked this iteration (the VMA's end).
    pub walk_end: u64,
    /// End of the last decoded run, carried forward from the previous VMA.
    pub last_walk_end: u64,
}

/// Something that can be asked for the idle-page byte stream starting at
/// a given virtual address. [`ProcfsHandle`] implements this against the
/// real kernel interface; tests substitute an in-memory fake.
pub trait IdlePageSource {
    /// Fill `buf` from the idle-page stream at `offset`, returning the
    /// number of bytes actually read (0 at end of stream).
    fn read_idle_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

impl IdlePageSource for ProcfsHandle {
    fn read_idle_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let n = unsafe { self.read_at(buf, offset as i64) }.map_err(EtmemError::from)?;
        Ok(n as usize)
    }
}

/// Buffer size for one VMA's idle-page read: the kernel's one-record-
/// byte-per-eight-PTEs encoding ratio, floored at [`EPT_IDLE_BUF_MIN`].
fn decoder_buffer_size(walk_start: u64, walk_end: u64) -> usize {
    let pte_size = PageType::Pte.page_size();
    let span = walk_end.saturating_sub(walk_start);
    let ratio = (span >> 3) / pte_size;
    ratio.max(EPT_IDLE_BUF_MIN as u64) as usize
}

/// Drives one scan pass over a pre-parsed VMA list, recording every
/// anonymous page reference into `acc`. Exposed separately from
/// [`Scanner::scan`] so tests can supply a fake [`IdlePageSource`] and a
/// hand-built [`VmaList`] without touching `/proc`.
///
/// # Errors
/// Propagates a decoder structural error ([`EtmemError::DecoderCursorUnset`])
/// or a source read error, aborting the pass -- this is the caller's job
/// to translate into "free the accumulator", which in Rust simply means
/// dropping it.
pub fn scan_pass(
    vmas: &VmaList,
    source: &mut impl IdlePageSource,
    acc: &mut PageRefAccumulator,
    weights: &WeightConfig,
    mut rss: Option<&mut u64>,
) -> Result<()> {
    let mut last_walk_end: u64 = 0;
    let mut buf = Vec::new();

    for vma in vmas.iter() {
        if is_skippable(last_walk_end, vma) {
            continue;
        }

        let state = WalkState {
            walk_start: last_walk_end.max(vma.start),
            walk_end: vma.end,
            last_walk_end,
        };

        let buf_size = decoder_buffer_size(state.walk_start, state.walk_end);
        buf.clear();
        buf.resize(buf_size, 0);

        let n = source.read_idle_bytes(state.walk_start, &mut buf)?;
        if n == 0 {
            // Short read: clean end-of-stream for this VMA, not an error.
            continue;
        }

        let summary = decode_buffer(&buf[..n], acc, weights)?;
        last_walk_end = summary.cursor_end.max(state.walk_start);
        if let Some(counter) = rss.as_deref_mut() {
            *counter += summary.rss_pages;
        }
    }

    Ok(())
}

fn is_skippable(last_walk_end: u64, vma: &Vma) -> bool {
    last_walk_end >= vma.end || !vma.is_anonymous()
}

/// Drives a full scan invocation (`loop` passes, `sleep` seconds apart)
/// for one pid, producing the accumulated [`PageRefAccumulator`] the
/// caller (a classifier, not part of this crate) turns into a
/// [`crate::classification::MemoryGrade`].
#[derive(Debug, Clone)]
pub struct Scanner {
    weights: WeightConfig,
}

impl Scanner {
    /// Build a scanner using the given per-access-class weights.
    pub fn new(weights: WeightConfig) -> Self {
        Self { weights }
    }

    /// Run one scan pass against the real `/proc/<pid>/maps` and
    /// `/proc/<pid>/idle_pages`, merging into `acc`.
    ///
    /// # Errors
    /// Per spec.md §7: an open failure on either procfs file fails the
    /// pass; a VMA parse error frees the (local) partial list and fails;
    /// a decoder structural error aborts the pass.
    pub fn scan_pass_once(
        &self,
        pid: u32,
        acc: &mut PageRefAccumulator,
        rss: Option<&mut u64>,
    ) -> Result<()> {
        let vmas = parse_maps(pid)?;
        let mut handle = unsafe { ProcfsHandle::open_idle_pages(pid) }.map_err(EtmemError::from)?;
        scan_pass(&vmas, &mut handle, acc, &self.weights, rss)
    }

    /// Run a full scan invocation: `loop_count` passes (minimum 1),
    /// sleeping `sleep_secs` between each, accumulating weights across
    /// passes into one [`PageRefAccumulator`].
    ///
    /// `rss` is an optional running counter the caller can pass to get
    /// the daemon's "live resident set" approximation (spec.md §4.3).
    pub fn scan(
        &self,
        pid: u32,
        loop_count: u32,
        sleep_secs: u32,
        mut rss: Option<&mut u64>,
    ) -> Result<PageRefAccumulator> {
        let loop_count = loop_count.max(1);
        let mut acc = PageRefAccumulator::new();
        for pass in 0..loop_count {
            self.scan_pass_once(pid, &mut acc, rss.as_deref_mut())?;
            if pass + 1 < loop_count {
                std::thread::sleep(Duration::from_secs(sleep_secs as u64));
            }
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PageGeometry;
    use crate::types::{IdleKind, PipEncoding, PIP_CMD_SET_HVA};
    use crate::vma::{Vma, VmaPerms};

    fn init_geometry() {
        let _ = PageGeometry::init();
    }

    fn anon_vma(start: u64, end: u64) -> Vma {
        Vma {
            start,
            end,
            perms: VmaPerms {
                read: true,
                write: true,
                exec: false,
                may_share: false,
            },
            offset: 0,
            major: "00".into(),
            minor: "00".into(),
            inode: 0,
            path: None,
        }
    }

    fn file_backed_vma(start: u64, end: u64) -> Vma {
        Vma {
            start,
            end,
            perms: VmaPerms {
                read: true,
                write: false,
                exec: true,
                may_share: false,
            },
            offset: 0,
            major: "08".into(),
            minor: "01".into(),
            inode: 42,
            path: Some("/usr/bin/cat".into()),
        }
    }

    fn vma_list(vmas: Vec<Vma>) -> VmaList {
        VmaList::from_vmas(vmas)
    }

    /// A source backed by a fixed map of `offset -> bytes`, for asserting
    /// exactly which offsets the scanner reads from.
    struct FakeSource {
        replies: Vec<(u64, Vec<u8>)>,
        reads_seen: Vec<u64>,
    }

    impl FakeSource {
        fn new(replies: Vec<(u64, Vec<u8>)>) -> Self {
            Self {
                replies,
                reads_seen: Vec::new(),
            }
        }
    }

    impl IdlePageSource for FakeSource {
        fn read_idle_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            self.reads_seen.push(offset);
            match self.replies.iter().find(|(o, _)| *o == offset) {
                Some((_, data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }
    }

    fn set_hva(addr: u64) -> Vec<u8> {
        let mut v = vec![PIP_CMD_SET_HVA];
        v.extend_from_slice(&addr.to_be_bytes());
        v
    }

    #[test]
    fn file_backed_vma_is_skipped_entirely() {
        init_geometry();
        let vmas = vma_list(vec![
            anon_vma(0x1000, 0x2000),
            file_backed_vma(0x2000, 0x3000),
        ]);
        let mut buf = set_hva(0x1000);
        buf.push(PipEncoding::compose(IdleKind::PteAccessed as u8, 1));
        let mut source = FakeSource::new(vec![(0x1000, buf)]);
        let mut acc = PageRefAccumulator::new();
        scan_pass(&vmas, &mut source, &mut acc, &WeightConfig::default(), None).unwrap();

        assert_eq!(acc.len(), 1);
        assert_eq!(acc.as_slice()[0].addr, 0x1000);
        // Only the anonymous VMA's start address was ever read.
        assert_eq!(source.reads_seen, vec![0x1000]);
    }

    #[test]
    fn resume_skips_next_vma_entirely_when_overrun() {
        init_geometry();
        let vmas = vma_list(vec![anon_vma(0x1000, 0x2000), anon_vma(0x2000, 0x3000)]);

        // The decoder run for VMA A reports a cursor past VMA A's end,
        // into VMA B's range.
        let mut buf = set_hva(0x1000);
        buf.push(PipEncoding::compose(IdleKind::PmdIdlePtes as u8, 1));
        let mut source = FakeSource::new(vec![(0x1000, buf)]);
        let mut acc = PageRefAccumulator::new();
        scan_pass(&vmas, &mut source, &mut acc, &WeightConfig::default(), None).unwrap();

        // VMA B was never read at all -- its start address never appears.
        assert_eq!(source.reads_seen, vec![0x1000]);
    }

    #[test]
    fn short_read_ends_vma_walk_without_error() {
        init_geometry();
        let vmas = vma_list(vec![anon_vma(0x1000, 0x2000)]);
        let mut source = FakeSource::new(vec![]); // every read returns 0 bytes
        let mut acc = PageRefAccumulator::new();
        scan_pass(&vmas, &mut source, &mut acc, &WeightConfig::default(), None).unwrap();
        assert!(acc.is_empty());
    }

    #[test]
    fn rss_counter_accumulates_non_idle_records_only() {
        init_geometry();
        let vmas = vma_list(vec![anon_vma(0x1000, 0x2000)]);
        let mut buf = set_hva(0x1000);
        buf.push(PipEncoding::compose(IdleKind::PteAccessed as u8, 3));
        let mut source = FakeSource::new(vec![(0x1000, buf)]);
        let mut acc = PageRefAccumulator::new();
        let mut rss = 0u64;
        scan_pass(
            &vmas,
            &mut source,
            &mut acc,
            &WeightConfig::default(),
            Some(&mut rss),
        )
        .unwrap();
        assert_eq!(rss, 3);
    }

    #[test]
    fn decoder_buffer_size_respects_floor() {
        init_geometry();
        assert_eq!(decoder_buffer_size(0x1000, 0x2000), EPT_IDLE_BUF_MIN);
        let huge_span = 0u64;
        let end = huge_span + EPT_IDLE_BUF_MIN as u64 * 8 * PageType::Pte.page_size() * 4;
        assert!(decoder_buffer_size(huge_span, end) > EPT_IDLE_BUF_MIN);
    }

    #[test]
    fn skippable_check_matches_anonymity_and_overrun() {
        let anon = anon_vma(0x1000, 0x2000);
        let file_backed = file_backed_vma(0x2000, 0x3000);
        assert!(!is_skippable(0, &anon));
        assert!(is_skippable(0x2000, &anon));
        assert!(is_skippable(0, &file_backed));
    }
}
