// estimate.rs — Sample-size estimation.
//
// Three estimators, all advisory: they size the next round, while only the
// risk test on real hand records decides an assertion.
//
// 1. Closed-form Kaplan-Markov bound (CORLA): n = ceil(rho / margin).
// 2. Kelly bound: n = ceil(ln(1/alpha) / ln(payoff)), where payoff is the
//    growth of one error-free draw at the Kelly-optimal bet.
// 3. Monte Carlo: simulate draws from an error model through the actual
//    risk test, starting from the assertion's current state, and take a
//    quantile of the stopping counts.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::betting::{self, ErrorCounts, ErrorRates};
use crate::error::RlaError;
use crate::pool::{Cancellation, WorkerPool};
use crate::risk::{RiskState, RiskTest};

/// Fraction of failed trials above which an estimate is flagged as failing.
const MAX_FAIL_FRACTION: f64 = 0.8;

// ── Closed-form (CORLA) ──────────────────────────────────────────

/// Kaplan-Markov p-value after `n` draws with the given discrepancy counts.
///
/// `min(1, (1-1/U)^n (1-1/(2γ))^-n1 (1-1/γ)^-n2 (1+1/(2γ))^-n3 (1+1/γ)^-n4)`
/// with `U = 2γ/margin`.
pub fn corla_pvalue(n: u64, diluted_margin: f64, gamma: f64, counts: &ErrorCounts) -> f64 {
    let u = 2.0 * gamma / diluted_margin;
    let log_p = n as f64 * (1.0 - 1.0 / u).ln()
        - counts.p1o as f64 * (1.0 - 1.0 / (2.0 * gamma)).ln()
        - counts.p2o as f64 * (1.0 - 1.0 / gamma).ln()
        - counts.p1u as f64 * (1.0 + 1.0 / (2.0 * gamma)).ln()
        - counts.p2u as f64 * (1.0 + 1.0 / gamma).ln();
    log_p.exp().min(1.0)
}

/// Closed-form sample size for the given (expected or observed)
/// discrepancy counts, floored at the number of discrepancies.
pub fn corla_sample_size(
    risk_limit: f64,
    diluted_margin: f64,
    gamma: f64,
    counts: &ErrorCounts,
) -> Result<u64, RlaError> {
    if !(gamma > 1.0) {
        return Err(RlaError::InvalidParameter {
            name: "gamma",
            reason: format!("{} must exceed 1", gamma),
        });
    }
    if !(diluted_margin > 0.0) {
        return Err(RlaError::InvalidParameter {
            name: "diluted_margin",
            reason: format!("{} must be positive", diluted_margin),
        });
    }
    let rho = -2.0
        * gamma
        * (risk_limit.ln()
            + counts.p1o as f64 * (1.0 - 1.0 / (2.0 * gamma)).ln()
            + counts.p2o as f64 * (1.0 - 1.0 / gamma).ln()
            + counts.p1u as f64 * (1.0 + 1.0 / (2.0 * gamma)).ln()
            + counts.p2u as f64 * (1.0 + 1.0 / gamma).ln());
    let n = (rho / diluted_margin).ceil().max(0.0) as u64;
    Ok(n.max(counts.errors()))
}

// ── Kelly bound ──────────────────────────────────────────────────

/// Draws needed at a constant per-draw growth `payoff`.
pub fn sample_size_for_payoff(risk_limit: f64, payoff: f64) -> f64 {
    -risk_limit.ln() / payoff.ln()
}

/// Kelly-optimal bet for the given rates and the resulting error-free
/// sample size. Returns `(lambda, n)`.
pub fn kelly_sample_size(
    risk_limit: f64,
    noerror: f64,
    rates: &ErrorRates,
    max_risk: f64,
) -> Result<(f64, u64), RlaError> {
    let lambda = betting::kelly_lambda(noerror, rates, 0.5, max_risk / 0.5);
    let payoff = 1.0 + lambda * (noerror - 0.5);
    if !(payoff > 1.0) {
        return Err(RlaError::InvalidParameter {
            name: "payoff",
            reason: format!("bet {} gives no growth (payoff {})", lambda, payoff),
        });
    }
    Ok((lambda, sample_size_for_payoff(risk_limit, payoff).ceil() as u64))
}

// ── Monte Carlo ──────────────────────────────────────────────────

/// What a simulated draw looks like.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DrawModel {
    /// Comparison draws: `noerror` except at the given discrepancy rates.
    /// `upper` is the bound of the underlying assorter.
    Comparison {
        noerror: f64,
        upper: f64,
        rates: ErrorRates,
    },
    /// Polling draws: `upper` for the winner, 0 for the loser, 1/2
    /// otherwise, with probabilities matching `mean`. `decisive` is the
    /// fraction of cards marked for either side.
    Polling {
        mean: f64,
        upper: f64,
        decisive: f64,
    },
}

impl DrawModel {
    fn draw(&self, rng: &mut StdRng) -> f64 {
        match *self {
            DrawModel::Comparison {
                noerror,
                upper,
                rates,
            } => {
                let r: f64 = rng.gen();
                let mut edge = rates.p2o;
                if r < edge {
                    return 0.0;
                }
                edge += rates.p1o;
                if r < edge {
                    return (1.0 - 0.5 / upper) * noerror;
                }
                edge += rates.p1u;
                if r < edge {
                    return (1.0 + 0.5 / upper) * noerror;
                }
                edge += rates.p2u;
                if r < edge {
                    return 2.0 * noerror;
                }
                noerror
            }
            DrawModel::Polling {
                mean,
                upper,
                decisive,
            } => {
                let p_win = ((mean - 0.5 + 0.5 * decisive) / upper).clamp(0.0, 1.0);
                let p_lose = (decisive - p_win).clamp(0.0, 1.0 - p_win);
                let r: f64 = rng.gen();
                if r < p_win {
                    upper
                } else if r < p_win + p_lose {
                    0.0
                } else {
                    0.5
                }
            }
        }
    }
}

/// Parameters for a Monte-Carlo estimate.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub ntrials: usize,
    /// Quantile of the stopping counts to report, in (0, 1).
    pub quantile: f64,
    /// Total draws (including those already in the state) a trial may use.
    pub max_count: u64,
    pub seed: u64,
    pub timeout: Option<Duration>,
    /// Most trials to start; the rest are skipped and the result is partial.
    pub trial_budget: Option<usize>,
}

/// Outcome of a Monte-Carlo estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub strategy: String,
    /// Statistic the trials started from.
    pub start_statistic: f64,
    /// Draws already consumed when the trials started.
    pub start_count: u64,
    pub ntrials: usize,
    pub completed: usize,
    /// Some trials were skipped by the deadline or the trial budget.
    pub partial: bool,
    /// More than 80% of completed trials failed to confirm.
    pub failed: bool,
    /// Additional draws at each decile (10%..90%).
    pub deciles: Vec<u64>,
    /// Additional draws at the requested quantile.
    pub new_samples: u64,
}

/// Simulate `ntrials` continuations of `test` from `start` and report the
/// requested quantile of the additional draws needed.
pub fn simulate(
    test: &RiskTest,
    start: &RiskState,
    model: DrawModel,
    config: &SimulationConfig,
    pool: &WorkerPool,
) -> Result<EstimationResult, RlaError> {
    if !(config.quantile > 0.0 && config.quantile < 1.0) {
        return Err(RlaError::InvalidParameter {
            name: "quantile",
            reason: format!("{} not in (0, 1)", config.quantile),
        });
    }
    let budget = config.max_count.saturating_sub(start.count);
    let mut cancel = match config.timeout {
        Some(t) => Cancellation::within(t),
        None => Cancellation::none(),
    };
    if let Some(budget) = config.trial_budget {
        cancel = cancel.with_budget(budget);
    }

    let outcome = pool.run(config.ntrials, &cancel, |trial| {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(trial as u64));
        let mut state = start.clone();
        let draws = std::iter::from_fn(|| Some(model.draw(&mut rng)));
        match test.run(&mut state, draws, Some(config.max_count)) {
            Ok(o) if o.status.is_success() => Some(o.count - start.count),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(trial, error = %e, "simulation trial failed");
                None
            }
        }
    });

    let completed = outcome.completed();
    let partial = outcome.is_partial();
    let failures = outcome.results.iter().filter(|(_, r)| r.is_none()).count();
    let mut counts: Vec<u64> = outcome
        .results
        .into_iter()
        .map(|(_, r)| r.unwrap_or(budget))
        .collect();
    counts.sort_unstable();

    let failed = completed == 0 || failures as f64 > MAX_FAIL_FRACTION * completed as f64;
    let deciles = (1..10).map(|k| quantile(&counts, k as f64 / 10.0)).collect();
    let new_samples = if completed == 0 {
        budget
    } else {
        quantile(&counts, config.quantile)
    };

    tracing::debug!(
        strategy = test.bettor.strategy().name(),
        start_count = start.count,
        completed,
        failures,
        new_samples,
        "monte carlo estimate"
    );

    Ok(EstimationResult {
        strategy: test.bettor.strategy().name().to_string(),
        start_statistic: start.statistic(),
        start_count: start.count,
        ntrials: config.ntrials,
        completed,
        partial,
        failed,
        deciles,
        new_samples,
    })
}

/// Nearest-rank quantile of sorted values.
fn quantile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
