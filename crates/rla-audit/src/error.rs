// error.rs — Error types for the audit workflow.
//
// Configuration and invariant failures are fatal for the operation that
// raised them. Data problems with individual cards (missing hand records,
// CVRs without the contest) are not errors here: they are counted in the
// round diagnostics instead.

use std::path::PathBuf;

use rla_core::RlaError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while creating, running or persisting an audit.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit configuration or contest data is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from the statistical core.
    #[error(transparent)]
    Core(#[from] RlaError),

    /// A file could not be opened, read or written.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to append to an open file.
    #[error("write failed: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to serialize or deserialize audit state.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The TOML config could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The round journal hash chain is broken.
    #[error("journal integrity check failed at line {line}: expected hash {expected}, got {actual}")]
    IntegrityViolation {
        line: usize,
        expected: String,
        actual: String,
    },

    /// A guarantee the risk computation depends on was broken. The round
    /// must be aborted.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The operation is not valid in the session's current phase.
    #[error("cannot {action} while audit is {phase}")]
    InvalidPhase { phase: String, action: String },

    /// No contest with this id is under audit.
    #[error("unknown contest {0}")]
    UnknownContest(u32),

    /// A snapshot was written by an incompatible version.
    #[error("snapshot version {found} not supported (expected {supported})")]
    SnapshotVersion { found: u32, supported: u32 },

    /// The requested audit snapshot was not found.
    #[error("audit not found: {0}")]
    NotFound(Uuid),
}
