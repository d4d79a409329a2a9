//! Error types for the carousel receiver.

use thiserror::Error;

/// Errors raised while decoding carousel data.
///
/// Transient protocol conditions (stale versions, duplicate blocks) are not
/// errors; they are reported as [`crate::carousel::DropReason`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CarouselError {
    /// additional_data_component_info ended before a required field.
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(&'static str),

    /// A PSI or DSM-CC section could not be parsed.
    #[error("Malformed section on PID {pid:#06x}: {reason}")]
    MalformedSection { pid: u16, reason: &'static str },

    /// A zlib-compressed module failed to inflate.
    #[error("Decompression failed for component {component_id:#04x} module {module_id:#06x}: {reason}")]
    Decompression {
        component_id: u8,
        module_id: u16,
        reason: String,
    },

    /// A module body was not a usable multipart entity.
    #[error("Failed to parse component {component_id:#04x} module {module_id:#06x}: {reason}")]
    ParseFailure {
        component_id: u8,
        module_id: u16,
        reason: &'static str,
    },
}

/// Result type alias for carousel operations.
pub type Result<T> = std::result::Result<T, CarouselError>;
