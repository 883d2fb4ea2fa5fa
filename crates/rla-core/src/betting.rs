// betting.rs — Betting strategies for the risk test.
//
// Every strategy answers one question: given the draws so far and the
// population mean under the null (`mu`), how much to bet on the next draw.
// The bet `lambda` enters the test as the factor `1 + lambda * (x - mu)`.
//
// Strategies:
// - Fixed:          constant lambda.
// - Shrinkage:      ALPHA truncated-shrinkage estimate `eta` of the true mean,
//                   converted to `lambda = (eta/mu - 1) / (u - mu)`.
// - KellyOracle:    lambda maximizing expected log growth under assumed
//                   comparison error rates, solved once.
// - KellyAdaptive:  same objective, re-solved each draw from shrink-trunc
//                   estimates of the observed error rates.
//
// Kelly and fixed bets are capped at `max_risk / mu`, which bounds the
// fraction of the statistic a single draw can lose.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::comparison::Discrepancy;
use crate::optimize;
use crate::risk::RiskState;

/// Machine epsilon used for the shrinkage upper truncation.
pub const EPS: f64 = 2.220446049250313e-16;

/// Floor applied to adaptive error-rate estimates.
const RATE_FLOOR: f64 = 1e-5;

/// Rates of each comparison discrepancy class, as fractions of draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRates {
    #[serde(default)]
    pub p2o: f64,
    #[serde(default)]
    pub p1o: f64,
    #[serde(default)]
    pub p1u: f64,
    #[serde(default)]
    pub p2u: f64,
}

impl ErrorRates {
    pub fn new(p2o: f64, p1o: f64, p1u: f64, p2u: f64) -> Self {
        Self { p2o, p1o, p1u, p2u }
    }

    pub fn total(&self) -> f64 {
        self.p2o + self.p1o + self.p1u + self.p2u
    }

    /// Probability of an exact match.
    pub fn p0(&self) -> f64 {
        (1.0 - self.total()).max(0.0)
    }
}

/// Observed discrepancy counts for one assertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub p2o: u64,
    pub p1o: u64,
    pub noerror: u64,
    pub p1u: u64,
    pub p2u: u64,
}

impl ErrorCounts {
    pub fn record(&mut self, discrepancy: Discrepancy) {
        match discrepancy {
            Discrepancy::TwoVoteOver => self.p2o += 1,
            Discrepancy::OneVoteOver => self.p1o += 1,
            Discrepancy::None => self.noerror += 1,
            Discrepancy::OneVoteUnder => self.p1u += 1,
            Discrepancy::TwoVoteUnder => self.p2u += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.p2o + self.p1o + self.noerror + self.p1u + self.p2u
    }

    /// Number of draws that disagreed with their CVR.
    pub fn errors(&self) -> u64 {
        self.p2o + self.p1o + self.p1u + self.p2u
    }
}

impl fmt::Display for ErrorCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p2o={} p1o={} p1u={} p2u={}",
            self.p2o, self.p1o, self.p1u, self.p2u
        )
    }
}

/// Selection of a betting strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BettingStrategy {
    Fixed {
        lambda: f64,
    },
    Shrinkage {
        /// Prior guess of the true mean. `None` uses the reported mean.
        #[serde(default)]
        eta0: Option<f64>,
        #[serde(default = "default_d")]
        d: u32,
        /// Weight pulling the estimate towards `u` by the sample stdev.
        #[serde(default)]
        f: f64,
        /// Truncation constant. `None` uses `(eta0 - 1/2) / 2`.
        #[serde(default)]
        c: Option<f64>,
    },
    KellyOracle {
        #[serde(default)]
        rates: ErrorRates,
    },
    KellyAdaptive {
        #[serde(default = "default_d")]
        d: u32,
        #[serde(default)]
        apriori: ErrorRates,
    },
}

fn default_d() -> u32 {
    100
}

impl BettingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BettingStrategy::Fixed { .. } => "fixed",
            BettingStrategy::Shrinkage { .. } => "shrinkage",
            BettingStrategy::KellyOracle { .. } => "kelly_oracle",
            BettingStrategy::KellyAdaptive { .. } => "kelly_adaptive",
        }
    }

    /// Default for comparison audits.
    pub fn comparison_default() -> Self {
        BettingStrategy::KellyAdaptive {
            d: default_d(),
            apriori: ErrorRates::default(),
        }
    }

    /// Default for polling audits.
    pub fn polling_default() -> Self {
        BettingStrategy::Shrinkage {
            eta0: None,
            d: default_d(),
            f: 0.0,
            c: None,
        }
    }
}

/// Per-assertion constants a bettor needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetContext {
    /// Upper bound of the values being tested.
    pub upper: f64,
    /// Reported mean of the values being tested.
    pub reported_mean: f64,
    /// Comparison `noerror` value; `None` for polling.
    pub noerror: Option<f64>,
    /// Largest fraction of the statistic one draw may lose (Kelly, fixed).
    pub max_risk: f64,
}

/// A strategy bound to one assertion, ready to bet.
#[derive(Debug, Clone)]
pub struct Bettor {
    strategy: BettingStrategy,
    ctx: BetContext,
    oracle_lambda: Option<f64>,
}

impl Bettor {
    pub fn new(strategy: BettingStrategy, ctx: BetContext) -> Self {
        let oracle_lambda = match (&strategy, ctx.noerror) {
            (BettingStrategy::KellyOracle { rates }, Some(noerror)) => {
                Some(kelly_lambda(noerror, rates, 0.5, ctx.max_risk / 0.5))
            }
            _ => None,
        };
        Self {
            strategy,
            ctx,
            oracle_lambda,
        }
    }

    pub fn strategy(&self) -> &BettingStrategy {
        &self.strategy
    }

    pub fn context(&self) -> &BetContext {
        &self.ctx
    }

    /// Bet for the next draw given the state before it and the null mean.
    pub fn bet(&self, state: &RiskState, mu: f64) -> f64 {
        let cap = self.ctx.max_risk / mu;
        let lambda = match &self.strategy {
            BettingStrategy::Fixed { lambda } => lambda.min(cap),
            BettingStrategy::Shrinkage { eta0, d, f, c } => {
                let eta0 = eta0.unwrap_or(self.ctx.reported_mean);
                let c = c.unwrap_or(((eta0 - 0.5) / 2.0).max(EPS));
                let eta = shrink_trunc_eta(state, mu, self.ctx.upper, eta0, *d, *f, c);
                (eta / mu - 1.0) / (self.ctx.upper - mu)
            }
            BettingStrategy::KellyOracle { rates } => match self.oracle_lambda {
                Some(lambda) => lambda.min(cap),
                None => kelly_lambda(self.ctx.reported_mean, rates, mu, cap),
            },
            BettingStrategy::KellyAdaptive { d, apriori } => {
                let noerror = self.ctx.noerror.unwrap_or(self.ctx.reported_mean);
                let rates = adaptive_rates(&state.errors, state.count, *d, apriori);
                kelly_lambda(noerror, &rates, mu, cap)
            }
        };

        if lambda.is_finite() && lambda >= 0.0 {
            lambda
        } else {
            tracing::warn!(
                strategy = self.strategy.name(),
                lambda,
                mu,
                "betting factor unusable, betting 0"
            );
            0.0
        }
    }
}

/// ALPHA truncated-shrinkage estimate of the population mean, from the
/// draws before this one.
fn shrink_trunc_eta(
    state: &RiskState,
    mu: f64,
    upper: f64,
    eta0: f64,
    d: u32,
    f: f64,
    c: f64,
) -> f64 {
    const MIN_SD: f64 = 1.0e-6;
    let d = f64::from(d);
    let dj = d + state.count as f64;
    let shrunk = if dj > 0.0 {
        (d * eta0 + state.sum) / dj
    } else {
        eta0
    };
    let est = if f == 0.0 {
        shrunk
    } else {
        let sd = if state.count < 2 {
            1.0
        } else {
            state.welford.stdev().max(MIN_SD)
        };
        (shrunk + upper * f / sd) / (1.0 + f / sd)
    };
    let floor = mu + c / dj.max(1.0).sqrt();
    let ceiling = upper * (1.0 - EPS);
    est.max(floor).min(ceiling)
}

/// Shrink-trunc estimates of the error rates from the counts so far:
/// `(d * prior + count) / (d + n - 1)`, floored at `RATE_FLOOR` (zero
/// priors included) and capped at 1.
pub fn adaptive_rates(counts: &ErrorCounts, n: u64, d: u32, apriori: &ErrorRates) -> ErrorRates {
    if n == 0 {
        return ErrorRates::default();
    }
    let est = |prior: f64, count: u64| {
        let d = f64::from(d);
        let denom = d + n as f64 - 1.0;
        let raw = if denom > 0.0 {
            (d * prior + count as f64) / denom
        } else {
            count as f64
        };
        raw.max(RATE_FLOOR).min(1.0)
    };
    ErrorRates {
        p2o: est(apriori.p2o, counts.p2o),
        p1o: est(apriori.p1o, counts.p1o),
        p1u: est(apriori.p1u, counts.p1u),
        p2u: est(apriori.p2u, counts.p2u),
    }
}

/// Expected log growth of one comparison draw at bet `lambda`.
pub fn expected_log_growth(lambda: f64, noerror: f64, rates: &ErrorRates, mu: f64) -> f64 {
    let term = |value: f64, rate: f64| {
        if rate == 0.0 {
            0.0
        } else {
            rate * (1.0 + lambda * (value - mu)).ln()
        }
    };
    term(noerror, rates.p0())
        + term(0.0, rates.p2o)
        + term(0.5 * noerror, rates.p1o)
        + term(1.5 * noerror, rates.p1u)
        + term(2.0 * noerror, rates.p2u)
}

/// Kelly-optimal bet over `[0, max_bet]`. Falls back to 0 (a neutral
/// factor) when the search fails to converge.
pub fn kelly_lambda(noerror: f64, rates: &ErrorRates, mu: f64, max_bet: f64) -> f64 {
    let best = optimize::maximize(
        |lambda| expected_log_growth(lambda, noerror, rates, mu),
        0.0,
        max_bet,
        1e-6,
        1000,
    );
    if best.converged && best.value.is_finite() {
        best.point
    } else {
        tracing::warn!(
            noerror,
            mu,
            evaluations = best.evaluations,
            "kelly optimization failed, betting 0"
        );
        0.0
    }
}
