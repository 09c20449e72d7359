//! Virtual memory area parsing from `/proc/<pid>/maps`
//!
//! Mirrors the kernel-module-facing `get_vmas`/`get_vma` pair: one VMA per
//! `/proc/<pid>/maps` line, with the anonymous-mapping classification the
//! scanner needs to decide which ranges are worth walking at all.

use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::error::{EtmemError, Result};

/// Permission and sharing bits carried by a maps line's second field
/// (e.g. `rwxp`, `r--s`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmaPerms {
    /// `r` bit.
    pub read: bool,
    /// `w` bit.
    pub write: bool,
    /// `x` bit.
    pub exec: bool,
    /// Fourth bit: `s` (shared) vs `p` (private). True for anything but `p`.
    pub may_share: bool,
}

/// One parsed `/proc/<pid>/maps` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vma {
    /// Start address (inclusive).
    pub start: u64,
    /// End address (exclusive).
    pub end: u64,
    /// Permission/sharing bits.
    pub perms: VmaPerms,
    /// File offset (bytes) this mapping starts at, if backed by a file.
    pub offset: u64,
    /// Backing device major number, as the raw hex string from maps.
    pub major: String,
    /// Backing device minor number, as the raw hex string from maps.
    pub minor: String,
    /// Backing inode number. Zero for anonymous mappings.
    pub inode: u64,
    /// Backing path, if any and not dropped for being over-length.
    pub path: Option<String>,
}

/// Path fields longer than this are silently dropped (with a caller-level
/// warning), not treated as a parse failure -- mirrors `parse_vma_seg5`.
pub const VMA_PATH_MAX_LEN: usize = 4096;

impl Vma {
    /// Anonymous-mapping test: not shared, not executable, and either
    /// unbacked by a file or privately writable. Mirrors `is_anonymous`.
    pub fn is_anonymous(&self) -> bool {
        if self.perms.may_share || self.perms.exec {
            return false;
        }
        self.inode == 0 || self.perms.write
    }

    /// Size of this mapping in bytes.
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// An ordered list of a process's VMAs, as read from `/proc/<pid>/maps`.
#[derive(Debug, Clone, Default)]
pub struct VmaList {
    vmas: Vec<Vma>,
}

impl VmaList {
    /// Build a list directly from already-parsed VMAs, e.g. for tests
    /// that exercise the scanner without a real `/proc/<pid>/maps`.
    pub fn from_vmas(vmas: Vec<Vma>) -> Self {
        Self { vmas }
    }

    /// Number of VMAs in the list.
    pub fn len(&self) -> usize {
        self.vmas.len()
    }

    /// True if no VMAs were parsed.
    pub fn is_empty(&self) -> bool {
        self.vmas.is_empty()
    }

    /// Iterate the VMAs in file order (ascending by address, as the
    /// kernel emits `/proc/<pid>/maps`).
    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter()
    }

    /// Iterate only the anonymous VMAs, the only ones the scanner walks.
    pub fn anonymous(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter().filter(|v| v.is_anonymous())
    }
}

/// Split a `/proc/<pid>/maps` line into its five fixed fields and an
/// optional trailing path. Fields are whitespace-separated with
/// (possibly several) padding spaces before the path, matching
/// `strtok_r(line, " ", ...)` with `VMA_SEG_CNT_MAX == 6` tokens.
fn split_maps_line(line: &str) -> Option<(Vec<&str>, Option<&str>)> {
    let bytes = line.as_bytes();
    let mut idx = 0usize;
    let mut fields = Vec::with_capacity(5);
    for _ in 0..5 {
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        let start = idx;
        while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        if start == idx {
            return None;
        }
        fields.push(&line[start..idx]);
    }
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    let path = if idx < bytes.len() {
        let trimmed = line[idx..].trim_end();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    } else {
        None
    };
    Some((fields, path))
}

fn parse_seg0(seg: &str) -> Result<(u64, u64)> {
    let (start, end) = seg
        .split_once('-')
        .ok_or_else(|| EtmemError::VmaParseError(format!("malformed address range {seg:?}")))?;
    let start = u64::from_str_radix(start, 16)
        .map_err(|_| EtmemError::VmaParseError(format!("bad start address {start:?}")))?;
    let end = u64::from_str_radix(end, 16)
        .map_err(|_| EtmemError::VmaParseError(format!("bad end address {end:?}")))?;
    Ok((start, end))
}

fn parse_seg1(seg: &str) -> VmaPerms {
    let bytes = seg.as_bytes();
    VmaPerms {
        read: bytes.first() == Some(&b'r'),
        write: bytes.get(1) == Some(&b'w'),
        exec: bytes.get(2) == Some(&b'x'),
        may_share: bytes.get(3) != Some(&b'p'),
    }
}

fn parse_seg2(seg: &str) -> Result<u64> {
    u64::from_str_radix(seg, 16)
        .map_err(|_| EtmemError::VmaParseError(format!("bad offset {seg:?}")))
}

fn parse_seg3(seg: &str) -> Result<(String, String)> {
    let (major, minor) = seg
        .split_once(':')
        .ok_or_else(|| EtmemError::VmaParseError(format!("malformed dev field {seg:?}")))?;
    Ok((major.to_string(), minor.to_string()))
}

fn parse_seg4(seg: &str) -> Result<u64> {
    seg.parse::<u64>()
        .map_err(|_| EtmemError::VmaParseError(format!("bad inode {seg:?}")))
}

/// Parse a single maps line into a [`Vma`]. Returns `Ok(None)` for blank
/// lines, which `/proc/<pid>/maps` never emits in practice but which we
/// tolerate rather than fail the whole list on.
fn parse_line(line: &str) -> Result<Option<Vma>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let (fields, path) = split_maps_line(line)
        .ok_or_else(|| EtmemError::VmaParseError(format!("too few fields in {line:?}")))?;

    let (start, end) = parse_seg0(fields[0])?;
    let perms = parse_seg1(fields[1]);
    let offset = parse_seg2(fields[2])?;
    let (major, minor) = parse_seg3(fields[3])?;
    let inode = parse_seg4(fields[4])?;
    let path = path.and_then(|p| {
        if p.len() > VMA_PATH_MAX_LEN {
            log::warn!("path is too long, dropping path {p:?}");
            None
        } else {
            Some(p.to_string())
        }
    });

    Ok(Some(Vma {
        start,
        end,
        perms,
        offset,
        major,
        minor,
        inode,
        path,
    }))
}

/// Read and parse `/proc/<pid>/maps` in full.
///
/// A structural parse failure anywhere in the file aborts the whole read
/// -- mirrors `get_vmas`' all-or-nothing `free_vmas` on first bad line,
/// since a half-parsed VMA list gives the scanner an inconsistent view
/// of the address space.
pub fn parse_maps(pid: u32) -> Result<VmaList> {
    let path = format!("/proc/{pid}/maps");
    let file = File::open(&path).map_err(|e| {
        if e.raw_os_error() == Some(libc::ESRCH) || e.kind() == std::io::ErrorKind::NotFound {
            EtmemError::ProcessNotFound
        } else {
            EtmemError::from(e)
        }
    })?;
    let reader = BufReader::new(file);

    let mut vmas = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(EtmemError::from)?;
        if let Some(vma) = parse_line(&line)? {
            vmas.push(vma);
        }
    }

    Ok(VmaList { vmas })
}
