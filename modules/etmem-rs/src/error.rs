//! Error handling for ETMEM operations

use thiserror::Error;

/// Result type alias for ETMEM operations
pub type Result<T> = std::result::Result<T, EtmemError>;

/// Errors the scan/classification engine can raise.
///
/// Every failure kind spec.md §7 names has a variant here; the policy for
/// each (fatal vs. skip-and-warn vs. abort-the-pass) is enforced by the
/// caller, not encoded in the type.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EtmemError {
    /// Invalid process ID (pid 0 is never a valid scan target).
    #[error("invalid process ID")]
    InvalidPid,
    /// Invalid virtual address (e.g. not page-aligned where required).
    #[error("invalid virtual address")]
    InvalidAddress,
    /// Watermark percentage outside 0..=100.
    #[error("watermark must be 0-100")]
    WatermarkOutOfRange,
    /// Low watermark >= high watermark.
    #[error("low watermark must be less than high watermark")]
    InvalidWatermarkOrder,
    /// Invalid scan flags (reserved bits set).
    #[error("invalid scan flags")]
    InvalidFlags,
    /// A procfs operation failed for a reason not covered by a more
    /// specific variant.
    #[error("procfs error: {0}")]
    ProcfsError(String),
    /// An IOCTL call returned a nonzero status.
    #[error("ioctl failed with code: {0}")]
    IoctlError(i32),
    /// Requested buffer size falls outside the kernel's accepted range.
    #[error("buffer too small (minimum {} bytes)", crate::types::PAGE_IDLE_BUF_MIN)]
    BufferTooSmall,
    /// Process does not exist (or exited during the scan).
    #[error("process not found")]
    ProcessNotFound,
    /// A scan operation failed for a reason not covered by a more
    /// specific variant.
    #[error("scan failed: {0}")]
    ScanFailed(String),
    /// A swap/migration operation failed.
    #[error("swap failed: {0}")]
    SwapFailed(String),
    /// Underlying I/O error not otherwise classified.
    #[error("I/O error: {0}")]
    IoError(String),
    /// Operation not supported on this host/configuration.
    #[error("operation not supported")]
    NotSupported,
    /// An `AddressRange` with `start >= end` was passed where a valid
    /// range was required.
    #[error("invalid address range")]
    InvalidRange,
    /// The host could not report a usable page size (spec.md §4.1, §7:
    /// configuration errors are fatal, the scan engine refuses to run).
    #[error("failed to query host page size")]
    GeometryUnavailable,
    /// [`crate::geometry::PageGeometry::from_page_size`] was asked to
    /// derive geometry from a value that is not a positive power of two.
    #[error("page size {0} is not a positive power of two")]
    InvalidPageSize(u64),
    /// A structural field of a `/proc/<pid>/maps` line failed to parse
    /// (address range, offset, device, or inode). The path field is
    /// exempt: an overlong path is dropped, not a parse failure.
    #[error("failed to parse maps line: {0}")]
    VmaParseError(String),
    /// The idle-page byte stream referenced an address before any
    /// `PIP_CMD_SET_HVA` directive had been seen.
    #[error("idle-page record seen before any SET_HVA directive")]
    DecoderCursorUnset,
    /// A project/task configuration file failed to load or validate.
    #[error("config error: {0}")]
    ConfigError(String),
    /// The daemon's socket protocol received a malformed request/response.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl From<std::io::Error> for EtmemError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ESRCH) => EtmemError::ProcessNotFound,
            Some(libc::ENODEV) => EtmemError::NotSupported,
            Some(libc::EINVAL) => EtmemError::InvalidFlags,
            _ if err.kind() == std::io::ErrorKind::NotFound => EtmemError::ProcessNotFound,
            _ => EtmemError::IoError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_io_error_maps_to_process_not_found() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(EtmemError::from(err), EtmemError::ProcessNotFound);
    }

    #[test]
    fn display_messages_are_non_empty() {
        assert!(!EtmemError::InvalidPid.to_string().is_empty());
        assert!(!EtmemError::DecoderCursorUnset.to_string().is_empty());
    }
}
