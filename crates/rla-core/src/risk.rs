// risk.rs — Sequential betting-martingale risk test.
//
// The test for one assertion is a state machine over `RiskState`, starting
// at (count = 0, statistic = 1). Each draw x in [0, u] multiplies the
// statistic by `1 + lambda * (x - mu)`, where mu is the population mean the
// null hypothesis allows given the draws so far. The assertion is confirmed
// the first time the statistic reaches 1/alpha.
//
// The statistic is kept as its natural log so that thousands of factors can
// be accumulated without overflow or underflow. Every field needed to resume
// the test lives in `RiskState`, so a test paused after one round continues
// in the next exactly as if it had never stopped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::betting::{Bettor, ErrorCounts};
use crate::comparison::classify_ratio;
use crate::error::RlaError;

/// Outcome of testing one assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    InProgress,
    /// Statistic crossed 1/alpha.
    StatRejectNull,
    /// Sample sum alone shows the null is false.
    SampleSumRejectNull,
    /// Remaining population cannot lift the mean above 1/2.
    AcceptNull,
    /// Draws ran out before a decision.
    LimitReached,
    /// Contest dropped because its estimate exceeded the sample budget.
    FailMaxSamplesAllowed,
    // Pre-audit exclusions.
    NoLosers,
    NoWinners,
    ContestMisformed,
    MinMargin,
    TooManyPhantoms,
}

impl TestStatus {
    /// The assertion was confirmed.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TestStatus::StatRejectNull | TestStatus::SampleSumRejectNull | TestStatus::NoLosers
        )
    }

    /// No further draws will change the outcome.
    pub fn is_complete(&self) -> bool {
        !matches!(self, TestStatus::InProgress | TestStatus::LimitReached)
    }

    /// Ordering used to roll assertion statuses up to a contest: the
    /// contest takes the status of its least advanced assertion.
    pub fn rank(&self) -> u8 {
        match self {
            TestStatus::InProgress => 0,
            TestStatus::LimitReached => 1,
            TestStatus::StatRejectNull | TestStatus::SampleSumRejectNull => 2,
            TestStatus::AcceptNull => 3,
            TestStatus::FailMaxSamplesAllowed => 4,
            TestStatus::NoLosers
            | TestStatus::NoWinners
            | TestStatus::ContestMisformed
            | TestStatus::MinMargin
            | TestStatus::TooManyPhantoms => 5,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::InProgress => "in_progress",
            TestStatus::StatRejectNull => "stat_reject_null",
            TestStatus::SampleSumRejectNull => "sample_sum_reject_null",
            TestStatus::AcceptNull => "accept_null",
            TestStatus::LimitReached => "limit_reached",
            TestStatus::FailMaxSamplesAllowed => "fail_max_samples_allowed",
            TestStatus::NoLosers => "no_losers",
            TestStatus::NoWinners => "no_winners",
            TestStatus::ContestMisformed => "contest_misformed",
            TestStatus::MinMargin => "min_margin",
            TestStatus::TooManyPhantoms => "too_many_phantoms",
        };
        write!(f, "{}", s)
    }
}

/// Welford's running mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Welford {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl Welford {
    pub fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population variance of the values seen.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn stdev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Everything needed to resume one assertion's test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// Draws consumed.
    pub count: u64,
    /// Natural log of the test statistic.
    pub log_statistic: f64,
    /// Sum of the draws.
    pub sum: f64,
    pub welford: Welford,
    /// Comparison discrepancies seen (zero for polling).
    pub errors: ErrorCounts,
    pub pvalue_last: f64,
    pub pvalue_min: f64,
    /// Factors that fell to or below zero and were clamped or skipped.
    #[serde(default)]
    pub clamped: u64,
}

impl Default for RiskState {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskState {
    pub fn new() -> Self {
        Self {
            count: 0,
            log_statistic: 0.0,
            sum: 0.0,
            welford: Welford::default(),
            errors: ErrorCounts::default(),
            pvalue_last: 1.0,
            pvalue_min: 1.0,
            clamped: 0,
        }
    }

    /// The test statistic. May be `inf` for very long winning streaks; use
    /// `log_statistic` for comparisons.
    pub fn statistic(&self) -> f64 {
        self.log_statistic.exp()
    }

    pub fn sample_mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// What to do with a betting factor that would drive the statistic to or
/// below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampPolicy {
    /// Floor the factor at a tiny positive value.
    #[default]
    Floor,
    /// Use a neutral factor of 1.
    Skip,
}

/// Smallest factor kept after flooring.
const FACTOR_FLOOR: f64 = f64::EPSILON;

/// Distance from 0 or u below which mu is treated as degenerate.
const MU_TOL: f64 = 1e-12;

/// Configured risk test for one assertion.
#[derive(Debug, Clone)]
pub struct RiskTest {
    pub bettor: Bettor,
    /// Population size the draws come from.
    pub population: u64,
    pub risk_limit: f64,
    pub without_replacement: bool,
    pub clamp: ClampPolicy,
}

/// Result of feeding a run of draws to the test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub status: TestStatus,
    pub count: u64,
    pub pvalue_last: f64,
    pub pvalue_min: f64,
    pub sample_mean: f64,
}

impl RiskTest {
    pub fn new(bettor: Bettor, population: u64, risk_limit: f64) -> Self {
        Self {
            bettor,
            population,
            risk_limit,
            without_replacement: true,
            clamp: ClampPolicy::default(),
        }
    }

    pub fn with_clamp(mut self, clamp: ClampPolicy) -> Self {
        self.clamp = clamp;
        self
    }

    pub fn with_replacement(mut self) -> Self {
        self.without_replacement = false;
        self
    }

    fn upper(&self) -> f64 {
        self.bettor.context().upper
    }

    /// Population mean allowed by the null hypothesis after the draws in
    /// `state`.
    pub fn null_mean(&self, state: &RiskState) -> f64 {
        if !self.without_replacement || state.count == 0 || state.count >= self.population {
            return 0.5;
        }
        let n = self.population as f64;
        (n * 0.5 - state.sum) / (n - state.count as f64)
    }

    /// Feed one draw. Returns the status after it.
    pub fn step(&self, state: &mut RiskState, x: f64) -> Result<TestStatus, RlaError> {
        let upper = self.upper();
        if !(0.0..=upper * (1.0 + 1e-12)).contains(&x) || x.is_nan() {
            return Err(RlaError::OutOfBounds { value: x, upper });
        }

        let mu = self.null_mean(state);
        if mu > upper {
            return Ok(TestStatus::AcceptNull);
        }
        if mu < 0.0 {
            return Ok(TestStatus::SampleSumRejectNull);
        }

        let factor = if mu < MU_TOL || (upper - mu).abs() < MU_TOL {
            1.0
        } else {
            let lambda = self.bettor.bet(state, mu);
            let t = 1.0 + lambda * (x - mu);
            if t > 0.0 {
                t
            } else {
                state.clamped += 1;
                tracing::warn!(x, mu, lambda, policy = ?self.clamp, "non-positive betting factor");
                match self.clamp {
                    ClampPolicy::Floor => FACTOR_FLOOR,
                    ClampPolicy::Skip => 1.0,
                }
            }
        };

        state.log_statistic += factor.ln();
        state.count += 1;
        state.sum += x;
        state.welford.update(x);
        if let Some(noerror) = self.bettor.context().noerror {
            state.errors.record(classify_ratio(x / noerror));
        }
        let pvalue = (-state.log_statistic).exp().min(1.0);
        state.pvalue_last = pvalue;
        state.pvalue_min = state.pvalue_min.min(pvalue);

        if state.log_statistic >= (1.0 / self.risk_limit).ln() {
            return Ok(TestStatus::StatRejectNull);
        }
        if self.without_replacement && state.count >= self.population {
            return Ok(if state.sample_mean() > 0.5 {
                TestStatus::SampleSumRejectNull
            } else {
                TestStatus::AcceptNull
            });
        }
        Ok(TestStatus::InProgress)
    }

    /// Feed draws until a decision, the draws run out, or `max_count` total
    /// draws have been consumed.
    pub fn run<I>(
        &self,
        state: &mut RiskState,
        draws: I,
        max_count: Option<u64>,
    ) -> Result<TestOutcome, RlaError>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut status = TestStatus::LimitReached;
        for x in draws {
            if max_count.is_some_and(|max| state.count >= max) {
                break;
            }
            let s = self.step(state, x)?;
            if s != TestStatus::InProgress {
                status = s;
                break;
            }
        }
        Ok(TestOutcome {
            status,
            count: state.count,
            pvalue_last: state.pvalue_last,
            pvalue_min: state.pvalue_min,
            sample_mean: state.sample_mean(),
        })
    }
}
