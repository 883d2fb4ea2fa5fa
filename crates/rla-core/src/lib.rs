//! # rla-core
//!
//! Statistical core of a risk-limiting audit: the assorters that turn ballot
//! records into bounded scores, the sequential betting test that turns a
//! stream of scores into a confirm/continue decision, and the estimators
//! that size each round.
//!
//! ## Key components
//!
//! - [`Contest`] / [`Assorter`] / [`ComparisonAssorter`]: the claims under
//!   audit and how each ballot (or ballot pair) is scored
//! - [`BettingStrategy`] / [`Bettor`]: how much to bet on the next draw
//! - [`RiskTest`] / [`RiskState`]: the resumable sequential test
//! - [`estimate`]: closed-form and Monte-Carlo sample-size estimates
//! - [`WorkerPool`]: bounded parallel execution of independent tasks
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use rla_core::{Assorter, ComparisonAssorter, Contest, ContestInfo, SocialChoice};
//!
//! let info = ContestInfo::new(1, "Mayor", vec![0, 1], SocialChoice::Plurality);
//! let votes: BTreeMap<u32, u64> = [(0, 5250), (1, 4750)].into_iter().collect();
//! let contest = Contest::new(info, votes, 10_000, 10_000).unwrap();
//! let clca = ComparisonAssorter::new(Assorter::plurality(&contest, 0, 1), true).unwrap();
//! assert!(clca.noerror() > 0.5);
//! ```

pub mod assorter;
pub mod betting;
pub mod comparison;
pub mod contest;
pub mod error;
pub mod estimate;
pub mod optimize;
pub mod pool;
pub mod record;
pub mod risk;

pub use assorter::{Assorter, AssorterKind};
pub use betting::{BetContext, Bettor, BettingStrategy, ErrorCounts, ErrorRates};
pub use comparison::{ComparisonAssorter, Discrepancy};
pub use contest::{Contest, ContestInfo, SocialChoice};
pub use error::RlaError;
pub use estimate::{DrawModel, EstimationResult, SimulationConfig};
pub use pool::{Cancellation, WorkerPool};
pub use record::{Cvr, Mvr, VoteRecord};
pub use risk::{ClampPolicy, RiskState, RiskTest, TestOutcome, TestStatus};
