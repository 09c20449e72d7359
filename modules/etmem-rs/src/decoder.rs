//! PIP (Proc Idle Page) byte-stream decoder
//!
//! `/proc/<pid>/idle_pages` returns a dense byte stream rather than a
//! structured format: most bytes pack an idle-kind nibble and a run-length
//! nibble, interrupted by the occasional `PIP_CMD_SET_HVA` marker byte that
//! carries a full 64-bit address for the records that follow it. This
//! module turns that stream into accumulator updates.

use crate::accumulator::PageRefAccumulator;
use crate::error::{EtmemError, Result};
use crate::geometry::PageGeometry;
use crate::types::{IdleKind, PipEncoding, WeightConfig, PIP_CMD_SET_HVA, PMD_IDLE_PTES_FANOUT};

/// Outcome of decoding one buffer's worth of idle-page records.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeSummary {
    /// Address just past the last record processed, i.e. where the next
    /// buffer's scan should resume from.
    pub cursor_end: u64,
    /// Sum of `nr` across all non-idle (read/written) records seen, for
    /// the caller's RSS estimate.
    pub rss_pages: u64,
}

/// Record a contiguous run of `nr` pages of `idle_kind` starting at
/// `addr` into the accumulator.
///
/// Ignores the whole run if `addr` is not aligned to its page type's
/// size -- a misaligned address means the kernel and our page geometry
/// have disagreed about granularity, and the record can't be trusted.
/// Mirrors `record_parse_result`'s single up-front alignment check.
fn record_run(
    acc: &mut PageRefAccumulator,
    addr: u64,
    idle_kind: IdleKind,
    nr: u64,
    weights: &WeightConfig,
) {
    let page_type = idle_kind.page_type();
    let page_size = page_type.page_size();
    if addr & (page_size - 1) != 0 {
        log::warn!("ignoring address {addr:#x} unaligned for page size {page_size:#x}");
        return;
    }

    let weight = weights.weight_for(idle_kind);
    let mut cur = addr;
    for _ in 0..nr {
        acc.record(cur, weight, page_type);
        cur += page_size;
    }
}

/// Big-endian 64-bit address read starting one byte after `index` (the
/// `PIP_CMD_SET_HVA` marker itself occupies `buf[index]`).
///
/// The kernel module emits addresses most-significant-byte-first.
fn read_be_address(buf: &[u8], index: usize) -> u64 {
    let mut address = 0u64;
    for i in 1..=8 {
        address = (address << 8) | buf[index + i] as u64;
    }
    address
}

/// Decode one buffer's worth of PIP stream data, recording every
/// non-hole record into `acc`.
///
/// A raw idle-kind nibble past `PmdIdlePtes` (the invalid-sentinel range
/// 10..=15) is a pure address advance with no emission: the kernel
/// module's documented enumeration never actually produces one, but
/// since the byte grammar still reserves the nibble value, the decoder
/// treats it the way the wire format specifies rather than failing the
/// whole buffer over it. The advance uses PTE granularity, the only
/// size the invalid range can fall back to.
///
/// # Errors
/// Returns [`EtmemError::DecoderCursorUnset`] if a record byte appears
/// before any `PIP_CMD_SET_HVA` directive has established a current
/// address.
pub fn decode_buffer(
    buf: &[u8],
    acc: &mut PageRefAccumulator,
    weights: &WeightConfig,
) -> Result<DecodeSummary> {
    let mut address: Option<u64> = None;
    let mut rss_pages: u64 = 0;
    let mut i = 0usize;

    while i < buf.len() {
        if buf[i] == PIP_CMD_SET_HVA {
            if i + 8 >= buf.len() {
                break;
            }
            address = Some(read_be_address(buf, i));
            i += 9;
            continue;
        }

        let addr = address.ok_or(EtmemError::DecoderCursorUnset)?;
        let (kind_raw, nr) = PipEncoding::decode(buf[i]);
        let nr = nr as u64;

        let Some(kind) = IdleKind::from_raw(kind_raw) else {
            log::warn!("idle-kind {kind_raw} out of range, treating as pure advance");
            address = Some(addr + nr * PageGeometry::get().pte_size());
            i += 1;
            continue;
        };

        if !matches!(kind.access_class(), crate::types::AccessClass::Idle) {
            rss_pages += nr;
        }

        if kind.is_hole_expansion() {
            record_run(
                acc,
                addr,
                IdleKind::PteIdle,
                nr * PMD_IDLE_PTES_FANOUT as u64,
                weights,
            );
        } else {
            // PteHole/PmdHole are unmapped ranges, not a separate
            // no-observation case: the kernel still reports them and we
            // record them at idle weight like any other idle-class kind.
            record_run(acc, addr, kind, nr, weights);
        }

        address = Some(addr + nr * kind.page_type().page_size());
        i += 1;
    }

    Ok(DecodeSummary {
        cursor_end: address.unwrap_or(0),
        rss_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PageGeometry;
    use crate::types::PageType;

    fn init_geometry() {
        let _ = PageGeometry::init();
    }

    fn set_hva(addr: u64) -> Vec<u8> {
        let mut v = vec![PIP_CMD_SET_HVA];
        for i in (0..8).rev() {
            v.push(((addr >> (i * 8)) & 0xff) as u8);
        }
        v
    }

    #[test]
    fn decodes_single_accessed_record() {
        init_geometry();
        let mut buf = set_hva(0x1000);
        buf.push(PipEncoding::compose(IdleKind::PteAccessed as u8, 1));
        let mut acc = PageRefAccumulator::new();
        let weights = WeightConfig::default();
        let summary = decode_buffer(&buf, &mut acc, &weights).unwrap();

        assert_eq!(acc.len(), 1);
        assert_eq!(acc.as_slice()[0].addr, 0x1000);
        assert_eq!(acc.as_slice()[0].page_type, PageType::Pte);
        assert_eq!(summary.rss_pages, 1);
    }

    #[test]
    fn pmd_idle_ptes_expands_to_512_pte_entries_per_nr() {
        init_geometry();
        let mut buf = set_hva(0x200000);
        buf.push(PipEncoding::compose(IdleKind::PmdIdlePtes as u8, 1));
        let mut acc = PageRefAccumulator::new();
        let weights = WeightConfig::default();
        let summary = decode_buffer(&buf, &mut acc, &weights).unwrap();

        assert_eq!(acc.len(), 512);
        assert_eq!(acc.as_slice()[0].page_type, PageType::Pte);
        assert_eq!(summary.cursor_end, 0x200000 + PageGeometry::get().pmd_size());
    }

    #[test]
    fn hole_records_are_recorded_at_idle_weight() {
        init_geometry();
        let mut buf = set_hva(0x3000);
        buf.push(PipEncoding::compose(IdleKind::PteHole as u8, 2));
        let mut acc = PageRefAccumulator::new();
        let weights = WeightConfig::default();
        let summary = decode_buffer(&buf, &mut acc, &weights).unwrap();

        assert_eq!(acc.len(), 2);
        assert_eq!(acc.as_slice()[0].count, weights.w_idle);
        assert_eq!(summary.cursor_end, 0x3000 + 2 * PageGeometry::get().pte_size());
        assert_eq!(summary.rss_pages, 0);
    }

    #[test]
    fn pure_advance_records_produce_no_accumulator_entries() {
        init_geometry();
        // idle_kind > PMD_IDLE_PTES (raw nibble 10..=15) is the "invalid
        // sentinel" range; the kernel module's documented enumeration
        // never actually emits it, but the wire grammar still reserves
        // the nibble value, so the decoder advances the cursor and
        // emits nothing rather than failing the whole buffer.
        let mut buf = set_hva(0x4000);
        buf.push(PipEncoding::compose(10, 2));
        let mut acc = PageRefAccumulator::new();
        let weights = WeightConfig::default();
        let summary = decode_buffer(&buf, &mut acc, &weights).unwrap();

        assert!(acc.is_empty());
        assert_eq!(summary.rss_pages, 0);
        assert_eq!(summary.cursor_end, 0x4000 + 2 * PageGeometry::get().pte_size());
    }

    #[test]
    fn record_before_set_hva_is_an_error() {
        init_geometry();
        let buf = vec![PipEncoding::compose(IdleKind::PteAccessed as u8, 1)];
        let mut acc = PageRefAccumulator::new();
        let weights = WeightConfig::default();
        assert!(matches!(
            decode_buffer(&buf, &mut acc, &weights),
            Err(EtmemError::DecoderCursorUnset)
        ));
    }

    #[test]
    fn misaligned_address_is_skipped_with_warning() {
        init_geometry();
        let mut buf = set_hva(0x1001);
        buf.push(PipEncoding::compose(IdleKind::PteAccessed as u8, 1));
        let mut acc = PageRefAccumulator::new();
        let weights = WeightConfig::default();
        decode_buffer(&buf, &mut acc, &weights).unwrap();
        assert!(acc.is_empty());
    }

    #[test]
    fn big_endian_address_decoding_matches_kernel_byte_order() {
        init_geometry();
        let buf = set_hva(0x1122_3344_5566_7788);
        let addr = read_be_address(&buf, 0);
        assert_eq!(addr, 0x1122_3344_5566_7788);
    }
}
