// error.rs — Error types for the statistical core.

use thiserror::Error;

/// Errors raised while building contests and assorters or running a risk test.
#[derive(Debug, Error)]
pub enum RlaError {
    /// The contest's reported data is inconsistent (e.g. votes exceed cards).
    #[error("contest {contest} is misformed: {reason}")]
    InvalidContest { contest: u32, reason: String },

    /// An assorter cannot be used for an audit (e.g. reported mean <= 1/2).
    #[error("assorter {assorter} in contest {contest} is unusable: {reason}")]
    InvalidAssorter {
        contest: u32,
        assorter: String,
        reason: String,
    },

    /// A styled CVR does not record the contest it is being compared on.
    #[error("card {card} has no record of contest {contest}")]
    MissingContest { card: String, contest: u32 },

    /// An assort value fell outside `[0, upper]`.
    #[error("assort value {value} outside [0, {upper}]")]
    OutOfBounds { value: f64, upper: f64 },

    /// A numeric parameter is out of its valid range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
