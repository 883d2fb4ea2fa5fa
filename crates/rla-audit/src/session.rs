// session.rs — AuditSession: the audit state machine.
//
//   create ──► start_round ──► run_round ──┬──► start_round ...
//                                          └──► finalize
//
// `start_round` sizes each open contest, selects cards and records the new
// cutoff. `run_round` asks the collector for hand records and feeds each
// open assertion the draws it has not yet consumed, in sample order,
// resuming from its stored risk state. A round that breaks the sampling
// invariant is rejected before any state changes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rla_core::estimate::{self, SimulationConfig};
use rla_core::{
    Contest, Cvr, ErrorRates, EstimationResult, Mvr, TestStatus, VoteRecord, WorkerPool,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::card::{self, Card, CardRegistry};
use crate::config::{AuditConfig, Estimator};
use crate::contest::{Assertion, ContestInput, ContestUnderAudit};
use crate::error::AuditError;
use crate::journal::{JournalEvent, RoundJournal};
use crate::prn;
use crate::round::{
    AssertionRound, AuditRound, AuditRoundResult, ContestDecision, ContestRound, RoundStatus,
};
use crate::sampler::{self, ContestTarget};
use crate::source::{CvrSource, MvrCollector, MvrLookup};
use crate::store::{AuditSnapshot, SNAPSHOT_VERSION};

/// Growth applied to an assertion's estimate from one round to the next.
const ROUND_GROWTH: f64 = 1.25;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPhase {
    Created,
    /// A round's cards have been selected; waiting for hand records.
    Sampling,
    /// The latest round's hand records have been tested.
    Audited,
    Finalized,
}

impl fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditPhase::Created => "created",
            AuditPhase::Sampling => "sampling",
            AuditPhase::Audited => "audited",
            AuditPhase::Finalized => "finalized",
        };
        write!(f, "{}", s)
    }
}

/// Final result for one contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestOutcome {
    pub contest_id: u32,
    pub name: String,
    pub decision: ContestDecision,
    pub test_status: TestStatus,
    /// Eligible cards sampled for the contest.
    pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub audit_id: Uuid,
    pub rounds: u32,
    pub total_sampled: usize,
    pub contests: Vec<ContestOutcome>,
    pub finalized_at: DateTime<Utc>,
}

impl AuditSummary {
    /// Contests that must be fully hand counted.
    pub fn hand_counts(&self) -> impl Iterator<Item = &ContestOutcome> {
        self.contests
            .iter()
            .filter(|c| c.decision == ContestDecision::LimitExceeded)
    }
}

pub struct AuditSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: AuditConfig,
    contests: Vec<ContestUnderAudit>,
    registry: CardRegistry,
    rounds: Vec<AuditRound>,
    sampled: HashSet<String>,
    mvrs: BTreeMap<String, Mvr>,
    phase: AuditPhase,
    pool: WorkerPool,
    journal: Option<RoundJournal>,
}

impl AuditSession {
    /// Validate the config, assign sample numbers to every card (adding
    /// phantoms), and run the pre-audit checks on each contest.
    pub fn create(
        config: AuditConfig,
        inputs: &[ContestInput],
        source: &dyn CvrSource,
    ) -> Result<Self, AuditError> {
        config.validate()?;

        let mut ids = HashSet::new();
        if let Some(dup) = inputs.iter().find(|c| !ids.insert(c.info.id)) {
            return Err(AuditError::InvalidConfig(format!(
                "duplicate contest id {}",
                dup.info.id
            )));
        }
        let reported: Vec<Contest> = inputs
            .iter()
            .map(ContestInput::build)
            .collect::<Result<_, _>>()?;

        let mut cvrs: Vec<Cvr> = source.cards().collect::<Result<_, _>>()?;
        if let Some(phantom) = cvrs.iter().find(|c| c.phantom) {
            return Err(AuditError::InvalidConfig(format!(
                "CVR {} is marked phantom; phantoms are created by the audit",
                phantom.id
            )));
        }
        let phantoms = card::make_phantoms(&reported, &cvrs, config.has_styles)?;
        cvrs.extend(phantoms);
        let registry = CardRegistry::build(&config.seed, cvrs)?;

        let contests = inputs
            .iter()
            .map(|input| ContestUnderAudit::new(input, &registry, &config))
            .collect::<Result<Vec<_>, _>>()?;

        let session = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            pool: WorkerPool::new(config.workers),
            config,
            contests,
            registry,
            rounds: Vec::new(),
            sampled: HashSet::new(),
            mvrs: BTreeMap::new(),
            phase: AuditPhase::Created,
            journal: None,
        };
        tracing::info!(
            audit_id = %session.id,
            cards = session.registry.len(),
            phantoms = session.registry.nphantoms(),
            contests = session.contests.len(),
            audited = session.contests.iter().filter(|c| c.is_audited()).count(),
            "audit created"
        );
        Ok(session)
    }

    /// Record future steps in `journal`. A fresh journal gets the audit's
    /// creation entry first.
    pub fn attach_journal(&mut self, mut journal: RoundJournal) -> Result<(), AuditError> {
        if journal.is_empty() {
            journal.record(
                self.id,
                JournalEvent::AuditCreated {
                    seed: self.config.seed.clone(),
                    ncards: self.registry.len(),
                    nphantoms: self.registry.nphantoms(),
                    contests: self.contests.iter().map(ContestUnderAudit::id).collect(),
                },
            )?;
        }
        self.journal = Some(journal);
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn phase(&self) -> AuditPhase {
        self.phase
    }

    pub fn contests(&self) -> &[ContestUnderAudit] {
        &self.contests
    }

    pub fn registry(&self) -> &CardRegistry {
        &self.registry
    }

    pub fn rounds(&self) -> &[AuditRound] {
        &self.rounds
    }

    pub fn current_round(&self) -> Option<&AuditRound> {
        self.rounds.last()
    }

    pub fn sampled_count(&self) -> usize {
        self.sampled.len()
    }

    pub fn is_sampled(&self, card_id: &str) -> bool {
        self.sampled.contains(card_id)
    }

    pub fn mvr_count(&self) -> usize {
        self.mvrs.len()
    }

    /// Sampled real cards with no hand record yet, in sample order. These
    /// are the ballots to pull.
    pub fn pending_units(&self) -> Vec<String> {
        self.sampled_prefix()
            .iter()
            .filter(|c| !c.cvr.phantom && !self.mvrs.contains_key(c.id()))
            .map(|c| c.id().to_string())
            .collect()
    }

    /// Latest round record for a contest.
    pub fn contest_round(&self, contest_id: u32) -> Option<&ContestRound> {
        self.rounds
            .iter()
            .rev()
            .find_map(|r| r.contest(contest_id))
    }

    /// Current decision for every contest.
    pub fn decisions(&self) -> Vec<(u32, ContestDecision)> {
        self.contests
            .iter()
            .map(|c| (c.id(), self.decision_for(c)))
            .collect()
    }

    fn decision_for(&self, contest: &ContestUnderAudit) -> ContestDecision {
        match self.contest_round(contest.id()) {
            Some(cr) => cr.decision(),
            None => match RoundStatus::from_test(contest.pre_audit) {
                RoundStatus::Confirmed => ContestDecision::Confirmed,
                RoundStatus::LimitExceeded => ContestDecision::LimitExceeded,
                _ => ContestDecision::Continue { next_target: 0 },
            },
        }
    }

    /// Latest risk record for one assertion, by its label.
    pub fn assertion_round(&self, contest_id: u32, label: &str) -> Option<&AssertionRound> {
        self.contest_round(contest_id)?
            .assertions
            .iter()
            .find(|a| a.label == label)
    }

    fn contest(&self, id: u32) -> Result<&ContestUnderAudit, AuditError> {
        self.contests
            .iter()
            .find(|c| c.id() == id)
            .ok_or(AuditError::UnknownContest(id))
    }

    fn sampled_prefix(&self) -> &[Card] {
        match self.rounds.last().and_then(|r| r.cutoff) {
            Some(c) => &self.registry.sorted()[..=c],
            None => &[],
        }
    }

    fn require(&self, allowed: &[AuditPhase], action: &str) -> Result<(), AuditError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(AuditError::InvalidPhase {
                phase: self.phase.to_string(),
                action: action.to_string(),
            })
        }
    }

    // ── Round lifecycle ──────────────────────────────────────────

    /// Estimate how many more cards each open contest needs and select
    /// them.
    pub fn start_round(&mut self) -> Result<&AuditRound, AuditError> {
        self.require(&[AuditPhase::Created, AuditPhase::Audited], "start a round")?;
        let mut round = match self.rounds.last() {
            None => AuditRound::first(&self.contests, self.config.max_samples),
            Some(prev) if prev.is_complete() => {
                return Err(AuditError::InvalidPhase {
                    phase: "complete".into(),
                    action: "start a round".into(),
                })
            }
            Some(prev) => prev.next(),
        };
        let round_idx = round.round_idx;

        let mut targets = Vec::new();
        for cr in round.contest_rounds.iter_mut().filter(|c| !c.done()) {
            let contest = self.contest(cr.contest_id)?;
            let mut wanted = 0u64;
            for (assertion, ar) in contest.assertions.iter().zip(cr.assertions.iter_mut()) {
                if ar.done() {
                    continue;
                }
                let (est, estimation) = self.estimate(contest, assertion, ar, cr.max_samples, round_idx)?;
                ar.est_new_samples = est;
                ar.estimation = estimation;
                wanted = wanted.max(ar.risk.count + est);
            }
            let wanted = wanted.min(cr.max_samples);
            cr.est_new_samples = wanted.saturating_sub(cr.sample_total);
            tracing::debug!(
                contest = cr.contest_id,
                wanted,
                sampled = cr.sample_total,
                additional = cr.est_new_samples,
                "contest target"
            );
            targets.push(ContestTarget {
                contest: cr.contest_id,
                additional: cr.est_new_samples,
                eligibility: contest.eligibility.clone(),
            });
        }

        let selection = sampler::select_round(&self.registry, &targets, &self.sampled, &self.pool);
        let cutoff = match (round.cutoff, selection.cutoff) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let mut next_sampled = self.sampled.clone();
        next_sampled.extend(selection.new_units.iter().cloned());
        verify_superset(&self.registry, &self.sampled, &next_sampled, cutoff)?;

        for cr in round.contest_rounds.iter_mut() {
            let contest = self.contest(cr.contest_id)?;
            cr.actual_new_samples = selection
                .new_units
                .iter()
                .filter_map(|id| self.registry.get(id))
                .filter(|c| contest.eligibility.admits(cr.contest_id, c))
                .count() as u64;
            cr.sample_total += cr.actual_new_samples;
            if let Some(sel) = selection.per_contest.iter().find(|s| s.contest == cr.contest_id) {
                cr.full_hand_count = sel.full_hand_count;
            }
        }
        round.cutoff = cutoff;
        round.cutoff_prn = cutoff.map(|c| self.registry.sorted()[c].prn);
        round.new_units = selection.new_units;
        round.sampled_total = next_sampled.len();

        self.sampled = next_sampled;
        self.phase = AuditPhase::Sampling;
        tracing::info!(
            round = round_idx,
            contests = round.contest_rounds.iter().filter(|c| !c.done()).count(),
            new_units = round.new_units.len(),
            sampled = round.sampled_total,
            "round started"
        );
        if let Some(journal) = self.journal.as_mut() {
            journal.record(
                self.id,
                JournalEvent::RoundStarted {
                    round_idx,
                    cutoff_prn: round.cutoff_prn,
                    new_units: round.new_units.clone(),
                },
            )?;
        }
        self.rounds.push(round);
        self.current_round().ok_or_else(|| {
            AuditError::InvariantViolation("round vanished after start".into())
        })
    }

    /// Additional draws an assertion is expected to need.
    fn estimate(
        &self,
        contest: &ContestUnderAudit,
        assertion: &Assertion,
        ar: &AssertionRound,
        max_samples: u64,
        round_idx: u32,
    ) -> Result<(u64, Option<EstimationResult>), AuditError> {
        let count = ar.risk.count;
        let budget = max_samples.saturating_sub(count);
        let rates = self.error_model(ar);
        let betting = &self.config.betting;

        let (mut est, estimation) = match (betting.estimator, &assertion.comparison) {
            (Estimator::Corla, Some(c)) => {
                let n = estimate::corla_sample_size(
                    self.config.risk_limit,
                    c.diluted_margin(),
                    betting.gamma,
                    &ar.risk.errors,
                )?;
                (n.saturating_sub(count), None)
            }
            (Estimator::Kelly, Some(c)) => {
                let (_, n) = estimate::kelly_sample_size(
                    self.config.risk_limit,
                    c.noerror(),
                    &rates,
                    betting.max_risk,
                )?;
                (n.saturating_sub(count), None)
            }
            _ => {
                let test = assertion.risk_test(self.config.strategy(), &self.config, contest.npop);
                let model = assertion.draw_model(rates, contest.decisive_fraction(assertion));
                let sim = SimulationConfig {
                    ntrials: self.config.ntrials,
                    quantile: self.config.quantile,
                    max_count: max_samples,
                    seed: prn::sample_number(
                        &format!("{}:{}:{}", self.config.seed, contest.id(), ar.label),
                        round_idx as usize,
                    ),
                    timeout: self.config.estimate_deadline_ms.map(Duration::from_millis),
                    trial_budget: None,
                };
                let result = estimate::simulate(&test, &ar.risk, model, &sim, &self.pool)?;
                if result.failed {
                    tracing::warn!(
                        contest = contest.id(),
                        assertion = %ar.label,
                        completed = result.completed,
                        "most simulated trials did not confirm within the budget"
                    );
                }
                (result.new_samples, Some(result))
            }
        };
        if round_idx > 1 {
            let grown = (ar.est_new_samples as f64 * ROUND_GROWTH).ceil() as u64;
            est = est.max(grown);
        }
        Ok((est.max(1).min(budget), estimation))
    }

    /// Discrepancy rates for sizing: observed once there are errors,
    /// otherwise the configured assumption.
    fn error_model(&self, ar: &AssertionRound) -> ErrorRates {
        let errors = &ar.risk.errors;
        let n = ar.risk.count;
        if n == 0 || errors.errors() == 0 {
            return self.config.betting.simulated_rates;
        }
        let rate = |k: u64| k as f64 / n as f64;
        ErrorRates::new(
            rate(errors.p2o),
            rate(errors.p1o),
            rate(errors.p1u),
            rate(errors.p2u),
        )
    }

    /// Collect hand records for the sampled cards and run every open
    /// assertion's test on the draws it has not yet seen.
    pub fn run_round(&mut self, collector: &mut dyn MvrCollector) -> Result<&AuditRound, AuditError> {
        self.require(&[AuditPhase::Sampling], "run a round")?;

        let wanted = self.pending_units();
        let mut not_found = Vec::new();
        if !wanted.is_empty() {
            let mut found: HashMap<String, MvrLookup> = collector.collect(&wanted)?;
            for id in &wanted {
                match found.remove(id) {
                    Some(MvrLookup::Found(mut mvr)) => {
                        mvr.id = id.clone();
                        self.mvrs.insert(id.clone(), mvr);
                    }
                    _ => not_found.push(id.clone()),
                }
            }
        }
        if !not_found.is_empty() {
            tracing::warn!(count = not_found.len(), "sampled cards have no hand record yet");
        }

        let strategy = self.config.strategy();
        let cutoff = self.rounds.last().and_then(|r| r.cutoff);
        let prefix: &[Card] = match cutoff {
            Some(c) => &self.registry.sorted()[..=c],
            None => &[],
        };
        let round = self
            .rounds
            .last_mut()
            .ok_or_else(|| AuditError::InvariantViolation("sampling phase without a round".into()))?;
        let round_idx = round.round_idx;
        let mut missing_contest = Vec::new();

        for cr in round.contest_rounds.iter_mut().filter(|c| !c.done()) {
            let contest = self
                .contests
                .iter()
                .find(|c| c.id() == cr.contest_id)
                .ok_or(AuditError::UnknownContest(cr.contest_id))?;
            let stream: Vec<&Card> = prefix
                .iter()
                .filter(|c| contest.eligibility.admits(contest.id(), c))
                .collect();

            for (assertion, ar) in contest.assertions.iter().zip(cr.assertions.iter_mut()) {
                if ar.done() {
                    continue;
                }
                let mut values = Vec::new();
                let mut stopped_at = None;
                for card in stream.iter().skip(ar.risk.count as usize) {
                    let mvr = if card.cvr.phantom {
                        &card.cvr
                    } else {
                        match self.mvrs.get(card.id()) {
                            Some(m) => m,
                            None => {
                                stopped_at = Some(card.id().to_string());
                                break;
                            }
                        }
                    };
                    if self.config.has_styles
                        && !card.cvr.phantom
                        && card.cvr.has_contest(contest.id())
                        && !mvr.has_contest(contest.id())
                    {
                        tracing::warn!(
                            card = card.id(),
                            contest = contest.id(),
                            "hand record lacks a contest its CVR lists"
                        );
                        missing_contest.push(card.id().to_string());
                    }
                    let value = match &assertion.comparison {
                        // With styles every eligible CVR holds the contest.
                        Some(c) => c.bassort(mvr, &card.cvr)?,
                        None => assertion.assorter.assort(mvr, true),
                    };
                    values.push(value);
                }

                let nmvrs = values.len() as u64;
                let test = assertion.risk_test(strategy.clone(), &self.config, contest.npop);
                let outcome = test.run(&mut ar.risk, values, Some(cr.max_samples))?;
                let status = if !outcome.status.is_complete() && ar.risk.count >= cr.max_samples {
                    TestStatus::FailMaxSamplesAllowed
                } else {
                    outcome.status
                };
                ar.test_status = status;
                ar.status = RoundStatus::from_test(status);
                if status.is_success() {
                    ar.round_proved = Some(round_idx);
                }
                ar.result = Some(AuditRoundResult {
                    round_idx,
                    nmvrs,
                    samples_used: ar.risk.count,
                    plast: ar.risk.pvalue_last,
                    pmin: ar.risk.pvalue_min,
                    status,
                    errors: ar.risk.errors,
                    stopped_at,
                });
                tracing::debug!(
                    contest = contest.id(),
                    assertion = %ar.label,
                    nmvrs,
                    count = ar.risk.count,
                    pvalue = ar.risk.pvalue_last,
                    status = %status,
                    errors = %ar.risk.errors,
                    "assertion tested"
                );
            }
            cr.roll_up();
        }

        missing_contest.sort();
        missing_contest.dedup();
        round.diagnostics.not_found = not_found;
        round.diagnostics.missing_contest = missing_contest;
        round.completed_at = Some(Utc::now());
        let confirmed = round
            .contest_rounds
            .iter()
            .filter(|c| c.status == RoundStatus::Confirmed)
            .count();
        tracing::info!(
            round = round_idx,
            confirmed,
            contests = round.contest_rounds.len(),
            unresolved = round.diagnostics.unresolved(),
            complete = round.is_complete(),
            "round audited"
        );
        let not_found_count = round.diagnostics.not_found.len();

        self.phase = AuditPhase::Audited;
        let decisions = self.decisions();
        if let Some(journal) = self.journal.as_mut() {
            journal.record(
                self.id,
                JournalEvent::RoundAudited {
                    round_idx,
                    decisions,
                    not_found: not_found_count,
                },
            )?;
        }
        self.current_round().ok_or_else(|| {
            AuditError::InvariantViolation("round vanished after audit".into())
        })
    }

    /// True when every contest has a final decision.
    pub fn is_complete(&self) -> bool {
        self.decisions()
            .iter()
            .all(|(_, d)| !matches!(d, ContestDecision::Continue { .. }))
    }

    /// Close the audit. Contests not confirmed by now go to a full hand
    /// count.
    pub fn finalize(&mut self) -> Result<AuditSummary, AuditError> {
        self.require(&[AuditPhase::Created, AuditPhase::Audited], "finalize")?;
        let contests: Vec<ContestOutcome> = self
            .contests
            .iter()
            .map(|c| {
                let cr = self.contest_round(c.id());
                let decision = match self.decision_for(c) {
                    ContestDecision::Continue { .. } => ContestDecision::LimitExceeded,
                    d => d,
                };
                ContestOutcome {
                    contest_id: c.id(),
                    name: c.contest.name().to_string(),
                    decision,
                    test_status: cr.map_or(c.pre_audit, |r| r.test_status),
                    samples: cr.map_or(0, |r| r.sample_total),
                }
            })
            .collect();
        let summary = AuditSummary {
            audit_id: self.id,
            rounds: self.rounds.len() as u32,
            total_sampled: self.sampled.len(),
            contests,
            finalized_at: Utc::now(),
        };
        self.phase = AuditPhase::Finalized;
        tracing::info!(
            audit_id = %self.id,
            rounds = summary.rounds,
            sampled = summary.total_sampled,
            hand_counts = summary.hand_counts().count(),
            "audit finalized"
        );
        if let Some(journal) = self.journal.as_mut() {
            journal.record(
                self.id,
                JournalEvent::AuditFinalized {
                    rounds: summary.rounds,
                    decisions: summary
                        .contests
                        .iter()
                        .map(|c| (c.contest_id, c.decision))
                        .collect(),
                },
            )?;
        }
        Ok(summary)
    }

    // ── Persistence ──────────────────────────────────────────────

    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            version: SNAPSHOT_VERSION,
            audit_id: self.id,
            created_at: self.created_at,
            saved_at: Utc::now(),
            phase: self.phase,
            config: self.config.clone(),
            contests: self.contests.clone(),
            cards: self.registry.sorted().to_vec(),
            rounds: self.rounds.clone(),
            mvrs: self.mvrs.clone(),
        }
    }

    /// Rebuild a session. Sample numbers and the sampled prefix are
    /// checked against the seed and the recorded cutoff.
    pub fn from_snapshot(snapshot: AuditSnapshot) -> Result<Self, AuditError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AuditError::SnapshotVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        snapshot.config.validate()?;
        let registry = CardRegistry::restore(&snapshot.config.seed, snapshot.cards)?;
        let sampled: HashSet<String> = snapshot
            .rounds
            .iter()
            .flat_map(|r| r.new_units.iter().cloned())
            .collect();
        let cutoff = snapshot.rounds.last().and_then(|r| r.cutoff);
        verify_superset(&registry, &HashSet::new(), &sampled, cutoff)?;

        Ok(Self {
            id: snapshot.audit_id,
            created_at: snapshot.created_at,
            pool: WorkerPool::new(snapshot.config.workers),
            config: snapshot.config,
            contests: snapshot.contests,
            registry,
            rounds: snapshot.rounds,
            sampled,
            mvrs: snapshot.mvrs,
            phase: snapshot.phase,
            journal: None,
        })
    }
}

/// The next sample must contain the previous one and be exactly the cards
/// up to `cutoff` in sample order.
fn verify_superset(
    registry: &CardRegistry,
    previous: &HashSet<String>,
    next: &HashSet<String>,
    cutoff: Option<usize>,
) -> Result<(), AuditError> {
    if let Some(lost) = previous.iter().find(|id| !next.contains(*id)) {
        return Err(AuditError::InvariantViolation(format!(
            "card {} was sampled before but not now",
            lost
        )));
    }
    let prefix = match cutoff {
        Some(c) if c < registry.len() => &registry.sorted()[..=c],
        Some(c) => {
            return Err(AuditError::InvariantViolation(format!(
                "cutoff {} beyond {} cards",
                c,
                registry.len()
            )))
        }
        None => &[],
    };
    if prefix.len() != next.len() || prefix.iter().any(|c| !next.contains(c.id())) {
        return Err(AuditError::InvariantViolation(format!(
            "sample of {} cards is not the prefix of {} cards",
            next.len(),
            prefix.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditType;
    use crate::source::{MapMvrCollector, VecCvrSource};
    use rla_core::{ContestInfo, SocialChoice};

    /// 2000 cards: contest 1 on every card (55/45), contest 2 on the first
    /// half (70/30).
    fn election() -> (Vec<ContestInput>, Vec<Cvr>) {
        let cvrs: Vec<Cvr> = (0..2000)
            .map(|i| {
                let cvr = Cvr::new(format!("card-{}", i))
                    .with_votes(1, vec![if i % 20 < 11 { 0 } else { 1 }]);
                if i < 1000 {
                    cvr.with_votes(2, vec![if i % 10 < 7 { 10 } else { 11 }])
                } else {
                    cvr
                }
            })
            .collect();
        let contests = vec![
            ContestInput {
                info: ContestInfo::new(1, "Mayor", vec![0, 1], SocialChoice::Plurality),
                votes: [(0, 1100), (1, 900)].into_iter().collect(),
                nc: 2000,
                ncast: 2000,
                winners: None,
                assertions: Vec::new(),
            },
            ContestInput {
                info: ContestInfo::new(2, "Measure", vec![10, 11], SocialChoice::Plurality),
                votes: [(10, 700), (11, 300)].into_iter().collect(),
                nc: 1000,
                ncast: 1000,
                winners: None,
                assertions: Vec::new(),
            },
        ];
        (contests, cvrs)
    }

    fn config() -> AuditConfig {
        let mut config = AuditConfig::new(AuditType::Clca, "0123456789");
        config.ntrials = 20;
        config.workers = 2;
        config
    }

    fn session() -> (AuditSession, MapMvrCollector) {
        let (contests, cvrs) = election();
        let collector = MapMvrCollector::new(cvrs.clone());
        let session = AuditSession::create(config(), &contests, &VecCvrSource::new(cvrs)).unwrap();
        (session, collector)
    }

    #[test]
    fn clean_clca_audit_confirms_in_one_round() {
        let (mut session, mut collector) = session();
        assert_eq!(session.phase(), AuditPhase::Created);

        let round = session.start_round().unwrap();
        assert_eq!(round.round_idx, 1);
        assert!(!round.new_units.is_empty());
        assert_eq!(session.phase(), AuditPhase::Sampling);
        assert_eq!(session.pending_units().len(), session.sampled_count());

        let round = session.run_round(&mut collector).unwrap();
        assert!(round.diagnostics.not_found.is_empty());
        assert!(round.is_complete(), "{:?}", session.decisions());
        assert!(session.is_complete());
        for (_, decision) in session.decisions() {
            assert_eq!(decision, ContestDecision::Confirmed);
        }

        let summary = session.finalize().unwrap();
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.hand_counts().count(), 0);
        assert_eq!(session.phase(), AuditPhase::Finalized);
        assert!(session.start_round().is_err());
    }

    #[test]
    fn phases_are_enforced() {
        let (mut session, mut collector) = session();
        assert!(matches!(
            session.run_round(&mut collector),
            Err(AuditError::InvalidPhase { .. })
        ));
        session.start_round().unwrap();
        assert!(session.start_round().is_err());
        assert!(session.finalize().is_err());
    }

    #[test]
    fn missing_hand_records_stop_the_stream() {
        let (mut session, _) = session();
        session.start_round().unwrap();
        let pending = session.pending_units();
        // Withhold the third card in sample order.
        let withheld = pending[2].clone();
        let (_, cvrs) = election();
        let mut collector =
            MapMvrCollector::new(cvrs.into_iter().filter(|c| c.id != withheld));

        let round = session.run_round(&mut collector).unwrap();
        assert_eq!(round.diagnostics.not_found, vec![withheld.clone()]);
        let cr = round.contest(1).unwrap();
        for ar in &cr.assertions {
            let result = ar.result.as_ref().unwrap();
            assert_eq!(result.stopped_at.as_deref(), Some(withheld.as_str()));
            assert!(ar.risk.count <= 2);
            assert!(!ar.done());
        }
        assert_eq!(cr.status, RoundStatus::Continue);
        assert_eq!(session.pending_units(), vec![withheld]);
    }

    #[test]
    fn resumed_round_only_consumes_new_draws() {
        let (mut session, _) = session();
        session.start_round().unwrap();
        let pending = session.pending_units();
        let withheld = pending[5].clone();
        let (_, cvrs) = election();
        let all = cvrs.clone();
        let mut partial = MapMvrCollector::new(cvrs.into_iter().filter(|c| c.id != withheld));
        session.run_round(&mut partial).unwrap();
        let before = session.assertion_round(1, "0/1").unwrap().risk.clone();
        assert_eq!(before.count, 5);

        session.start_round().unwrap();
        let mut full = MapMvrCollector::new(all);
        session.run_round(&mut full).unwrap();
        let after = session.assertion_round(1, "0/1").unwrap();
        assert!(after.risk.count > before.count);
        assert!(after.test_status.is_success());
    }

    /// Hand records that flip one in ten winner votes in contest 1, enough
    /// to change the outcome.
    fn flipped_mvrs(cvrs: &[Cvr]) -> Vec<Mvr> {
        cvrs.iter()
            .enumerate()
            .map(|(i, c)| {
                let mut m = c.clone();
                if i % 10 == 0 {
                    m.votes.insert(1, vec![1]);
                }
                m
            })
            .collect()
    }

    #[test]
    fn overstatements_need_more_rounds() {
        let (contests, cvrs) = election();
        let mvrs = flipped_mvrs(&cvrs);
        let mut config = config();
        config.max_samples = Some(400);
        let mut session =
            AuditSession::create(config, &contests, &VecCvrSource::new(cvrs)).unwrap();
        let mut collector = MapMvrCollector::new(mvrs);

        let mut rounds = 0;
        while !session.is_complete() && rounds < 10 {
            session.start_round().unwrap();
            session.run_round(&mut collector).unwrap();
            rounds += 1;
        }
        let cr = session.contest_round(1).unwrap();
        let errors = cr.assertions[0].risk.errors;
        assert!(errors.p2o > 0, "errors {}", errors);
        assert!(cr.sample_total <= 400);
        // The reported winner lost.
        assert_ne!(cr.decision(), ContestDecision::Confirmed);
        // Contest 2 is untouched by the flips.
        assert_eq!(
            session.contest_round(2).map(ContestRound::decision),
            Some(ContestDecision::Confirmed)
        );
    }

    #[test]
    fn wrong_outcome_escalates_to_hand_count() {
        let (contests, cvrs) = election();
        let mvrs = flipped_mvrs(&cvrs);
        for seed in ["0123456789", "271828", "314159265"] {
            let mut config = config();
            config.seed = seed.to_string();
            config.max_samples = Some(300);
            let mut session =
                AuditSession::create(config, &contests, &VecCvrSource::new(cvrs.clone())).unwrap();
            let mut collector = MapMvrCollector::new(mvrs.clone());

            let mut rounds = 0;
            while !session.is_complete() {
                assert!(rounds < 40, "seed {}: audit did not finish", seed);
                session.start_round().unwrap();
                session.run_round(&mut collector).unwrap();
                rounds += 1;
                assert_ne!(
                    session.contest_round(1).map(ContestRound::decision),
                    Some(ContestDecision::Confirmed),
                    "seed {}: wrong outcome confirmed in round {}",
                    seed,
                    rounds
                );
            }

            let cr = session.contest_round(1).unwrap();
            assert_eq!(cr.decision(), ContestDecision::LimitExceeded, "seed {}", seed);
            assert!(cr.assertions[0].risk.count <= 300);

            let summary = session.finalize().unwrap();
            let escalated: Vec<u32> = summary.hand_counts().map(|c| c.contest_id).collect();
            assert_eq!(escalated, vec![1], "seed {}", seed);
        }
    }

    #[test]
    fn hand_record_missing_a_contest_is_reported_and_scored() {
        let (mut session, _) = session();
        session.start_round().unwrap();
        let (_, cvrs) = election();
        // First card in sample order whose CVR votes for the winner of
        // contest 1.
        let target = session
            .pending_units()
            .into_iter()
            .find(|id| {
                cvrs.iter()
                    .any(|c| &c.id == id && c.votes.get(&1) == Some(&vec![0]))
            })
            .unwrap();
        let mut collector = MapMvrCollector::new(cvrs.into_iter().map(|mut c| {
            if c.id == target {
                c.votes.remove(&1);
            }
            c
        }));

        let round = session.run_round(&mut collector).unwrap();
        assert_eq!(round.diagnostics.missing_contest, vec![target]);
        assert!(round.diagnostics.not_found.is_empty());
        // Scored as a two-vote overstatement, not skipped.
        let ar = session.assertion_round(1, "0/1").unwrap();
        assert_eq!(ar.risk.errors.p2o, 1, "errors {}", ar.risk.errors);
        assert!(ar.result.as_ref().unwrap().stopped_at.is_none());
    }

    #[test]
    fn later_rounds_grow_estimates() {
        let (mut session, _) = session();
        session.start_round().unwrap();
        let first_est = session.assertion_round(1, "0/1").unwrap().est_new_samples;
        // No hand records at all: nothing is consumed.
        session.run_round(&mut MapMvrCollector::default()).unwrap();
        session.start_round().unwrap();
        let second_est = session.assertion_round(1, "0/1").unwrap().est_new_samples;
        assert!(
            second_est as f64 >= (first_est as f64 * ROUND_GROWTH).ceil(),
            "{} then {}",
            first_est,
            second_est
        );
        assert_eq!(session.rounds().len(), 2);
    }

    #[test]
    fn snapshot_round_trip_preserves_risk_state() {
        let (mut session, mut collector) = session();
        session.start_round().unwrap();
        let withheld = session.pending_units()[10].clone();
        let (_, cvrs) = election();
        let mut partial = MapMvrCollector::new(cvrs.into_iter().filter(|c| c.id != withheld));
        session.run_round(&mut partial).unwrap();

        let json = serde_json::to_string(&session.snapshot()).unwrap();
        let restored: AuditSnapshot = serde_json::from_str(&json).unwrap();
        let mut resumed = AuditSession::from_snapshot(restored).unwrap();

        assert_eq!(resumed.id(), session.id());
        assert_eq!(resumed.phase(), AuditPhase::Audited);
        assert_eq!(resumed.sampled_count(), session.sampled_count());
        assert_eq!(
            resumed.assertion_round(1, "0/1").unwrap().risk,
            session.assertion_round(1, "0/1").unwrap().risk
        );

        resumed.start_round().unwrap();
        resumed.run_round(&mut collector).unwrap();
        assert!(resumed.is_complete());
    }

    #[test]
    fn tampered_snapshot_rejected() {
        let (mut session, _) = session();
        session.start_round().unwrap();
        let mut snap = session.snapshot();
        snap.rounds[0].new_units.pop();
        assert!(matches!(
            AuditSession::from_snapshot(snap),
            Err(AuditError::InvariantViolation(_))
        ));
    }

    #[test]
    fn superset_violation_is_fatal() {
        let (session, _) = session();
        let registry = session.registry();
        let first: HashSet<String> = registry.sorted()[..10].iter().map(|c| c.id().to_string()).collect();
        let mut second: HashSet<String> =
            registry.sorted()[..20].iter().map(|c| c.id().to_string()).collect();
        assert!(verify_superset(registry, &first, &second, Some(19)).is_ok());

        second.remove(registry.sorted()[3].id());
        assert!(matches!(
            verify_superset(registry, &first, &second, Some(19)),
            Err(AuditError::InvariantViolation(_))
        ));
        // A gap in the prefix is also rejected.
        let mut gappy = first.clone();
        gappy.insert(registry.sorted()[15].id().to_string());
        assert!(verify_superset(registry, &first, &gappy, Some(15)).is_err());
    }

    #[test]
    fn phantom_cards_are_never_requested() {
        let (contests, mut cvrs) = election();
        // Drop 10 CVRs from contest 1's population: 10 phantoms appear.
        cvrs.retain(|c| {
            let n: usize = c.id.trim_start_matches("card-").parse().unwrap();
            !(1990..2000).contains(&n)
        });
        let session = AuditSession::create(config(), &contests, &VecCvrSource::new(cvrs)).unwrap();
        assert_eq!(session.registry().nphantoms(), 10);
        let mut session = session;
        session.start_round().unwrap();
        assert!(session
            .pending_units()
            .iter()
            .all(|id| !id.starts_with("phantom-")));
    }

    #[test]
    fn duplicate_contest_ids_rejected() {
        let (mut contests, cvrs) = election();
        contests[1].info.id = 1;
        let err = AuditSession::create(config(), &contests, &VecCvrSource::new(cvrs));
        assert!(matches!(err, Err(AuditError::InvalidConfig(_))));
    }

    #[test]
    fn journal_records_each_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let (mut session, mut collector) = session();
        session.attach_journal(RoundJournal::open(&path).unwrap()).unwrap();
        session.start_round().unwrap();
        session.run_round(&mut collector).unwrap();
        session.finalize().unwrap();

        let entries = RoundJournal::read_all(&path).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(matches!(entries[0].event, JournalEvent::AuditCreated { .. }));
        assert!(matches!(entries[3].event, JournalEvent::AuditFinalized { .. }));
        assert_eq!(RoundJournal::verify_chain(&path).unwrap(), 4);
    }
}
