//! # rla-audit
//!
//! Drives a risk-limiting audit round by round on top of `rla-core`.
//!
//! - [`AuditConfig`]: TOML-loaded settings, validated before an audit starts
//! - [`CardRegistry`]: every card with its permanent SHA-256 sample number
//! - [`sampler`]: consistent sampling, each round extending the last
//! - [`AuditSession`]: the create / start round / run round / finalize
//!   state machine
//! - [`SnapshotStore`] and [`RoundJournal`]: resumable snapshots and a
//!   tamper-evident log of every public step
//!
//! CVRs arrive through a [`CvrSource`] and hand records through an
//! [`MvrCollector`]; the library never parses vendor formats or talks to
//! people pulling ballots.

pub mod card;
pub mod config;
pub mod contest;
pub mod error;
pub mod journal;
pub mod prn;
pub mod round;
pub mod sampler;
pub mod session;
pub mod source;
pub mod store;

pub use card::{Card, CardRegistry};
pub use config::{AuditConfig, AuditType, BettingConfig, Estimator};
pub use contest::{Assertion, ContestInput, ContestUnderAudit, SuppliedAssertion};
pub use error::AuditError;
pub use journal::{JournalEntry, JournalEvent, RoundJournal};
pub use round::{
    AssertionRound, AuditRound, AuditRoundResult, ContestDecision, ContestRound,
    RoundDiagnostics, RoundStatus,
};
pub use sampler::{ContestSelection, ContestTarget, Eligibility, RoundSelection};
pub use session::{AuditPhase, AuditSession, AuditSummary, ContestOutcome};
pub use source::{
    read_json_lines, CvrSource, JsonLinesCvrSource, MapMvrCollector, MvrCollector, MvrLookup,
    VecCvrSource,
};
pub use store::{AuditSnapshot, SnapshotStore, SNAPSHOT_VERSION};
