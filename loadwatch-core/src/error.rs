//! Error taxonomy shared by the codec, framer, normalizer and log files
//!
//! Every failure names the layer it comes from and the offending item so the
//! agent can log it and move on to the next packet, record or sampling cycle.

use crate::message::SubpacketKind;
use crate::normalizer::Domain;

/// Errors produced by the loadwatch protocol layers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Subpacket size or shape violation
    #[error("{kind}: invalid subpacket ({detail})")]
    Format { kind: SubpacketKind, detail: String },

    #[error("unknown subpacket code {0}")]
    UnknownSubpacket(u8),

    #[error("version mismatch: expected {expected}, got {found}")]
    VersionMismatch { expected: u8, found: u8 },

    /// Message ended inside the fixed header
    #[error("incomplete message header: {available} of {needed} bytes")]
    TruncatedHeader { needed: usize, available: usize },

    /// Message ended inside a subpacket frame
    #[error("premature subpacket at offset {offset}: {detail}")]
    PrematureSubpacket { offset: usize, detail: String },

    #[error("{kind}: payload of {len} bytes exceeds the 255 byte limit")]
    PayloadOverflow { kind: SubpacketKind, len: usize },

    #[error("{kind}: item name of {len} bytes exceeds the 255 byte limit")]
    NameTooLong { kind: SubpacketKind, len: usize },

    #[error("{domain}: tracked item count changed from {previous} to {current}")]
    CardinalityMismatch {
        domain: Domain,
        previous: usize,
        current: usize,
    },

    #[error("rate normalizer used before its first snapshot")]
    Unprimed,

    /// Counter source could not produce a snapshot
    #[error("counter source: {0}")]
    Source(String),

    #[error("log file {path}: operation not permitted in {mode} mode")]
    InvalidMode { path: String, mode: &'static str },

    #[error("log file {0} already open")]
    AlreadyOpen(String),

    #[error("log file {0} is not open")]
    NotOpen(String),

    #[error("log file {path}: truncated record ({detail})")]
    TruncatedRecord { path: String, detail: String },

    #[error("log record of {0} bytes exceeds the 65535 byte frame limit")]
    RecordTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Structural configuration defects that retrying cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::PayloadOverflow { .. } | Error::NameTooLong { .. })
    }

    pub(crate) fn format(kind: SubpacketKind, detail: impl Into<String>) -> Self {
        Error::Format {
            kind,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
