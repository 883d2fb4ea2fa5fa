// round.rs — The round hierarchy: AuditRound > ContestRound > AssertionRound.
//
// Rounds are plain data. The session drives the transitions; this module
// only knows how to roll assertion results up to contests, and how to carry
// the unfinished parts of one round into the next.

use chrono::{DateTime, Utc};
use rla_core::{ErrorCounts, EstimationResult, RiskState, TestStatus};
use serde::{Deserialize, Serialize};

use crate::contest::ContestUnderAudit;

/// Where an assertion or contest stands after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    InProgress,
    Confirmed,
    /// Not yet confirmed, more cards needed.
    Continue,
    /// Cannot be confirmed by sampling. Needs a full hand count.
    LimitExceeded,
}

impl RoundStatus {
    pub fn from_test(status: TestStatus) -> Self {
        if status.is_success() {
            RoundStatus::Confirmed
        } else if !status.is_complete() {
            RoundStatus::Continue
        } else {
            RoundStatus::LimitExceeded
        }
    }
}

/// What the contest needs next, as reported to people running the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ContestDecision {
    Confirmed,
    Continue { next_target: u64 },
    /// Escalate to a full hand count.
    LimitExceeded,
}

/// Risk-test result for one assertion in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRoundResult {
    pub round_idx: u32,
    /// Hand records offered to the assertion this round.
    pub nmvrs: u64,
    /// Total draws the test has consumed, over all rounds.
    pub samples_used: u64,
    pub plast: f64,
    pub pmin: f64,
    pub status: TestStatus,
    pub errors: ErrorCounts,
    /// The assertion's stream stopped at a card with no hand record.
    pub stopped_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionRound {
    pub label: String,
    /// Cumulative test state, carried from round to round.
    pub risk: RiskState,
    pub test_status: TestStatus,
    pub status: RoundStatus,
    pub est_new_samples: u64,
    #[serde(default)]
    pub estimation: Option<EstimationResult>,
    #[serde(default)]
    pub result: Option<AuditRoundResult>,
    /// Round in which the assertion was confirmed.
    #[serde(default)]
    pub round_proved: Option<u32>,
}

impl AssertionRound {
    pub fn new(label: String) -> Self {
        Self {
            label,
            risk: RiskState::new(),
            test_status: TestStatus::InProgress,
            status: RoundStatus::InProgress,
            est_new_samples: 0,
            estimation: None,
            result: None,
            round_proved: None,
        }
    }

    pub fn done(&self) -> bool {
        self.test_status.is_complete()
    }

    fn carry(&self) -> Self {
        Self {
            label: self.label.clone(),
            risk: self.risk.clone(),
            test_status: self.test_status,
            status: RoundStatus::InProgress,
            est_new_samples: self.est_new_samples,
            estimation: None,
            result: None,
            round_proved: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestRound {
    pub contest_id: u32,
    pub name: String,
    /// One entry per assertion of the contest, in assertion order. Finished
    /// assertions from earlier rounds are kept but not re-tested.
    pub assertions: Vec<AssertionRound>,
    pub est_new_samples: u64,
    /// New eligible cards the sampler actually selected.
    pub actual_new_samples: u64,
    /// Eligible cards sampled so far, this round included.
    pub sample_total: u64,
    /// Most cards the contest may draw.
    pub max_samples: u64,
    pub test_status: TestStatus,
    pub status: RoundStatus,
    pub full_hand_count: bool,
}

impl ContestRound {
    pub fn new(contest: &ContestUnderAudit, max_samples: u64) -> Self {
        let assertions = contest
            .assertions
            .iter()
            .map(|a| AssertionRound::new(a.label()))
            .collect();
        let mut round = Self {
            contest_id: contest.id(),
            name: contest.contest.name().to_string(),
            assertions,
            est_new_samples: 0,
            actual_new_samples: 0,
            sample_total: 0,
            max_samples,
            test_status: contest.pre_audit,
            status: RoundStatus::InProgress,
            full_hand_count: false,
        };
        if contest.is_audited() {
            round.roll_up();
        } else {
            round.status = RoundStatus::from_test(contest.pre_audit);
        }
        round
    }

    pub fn done(&self) -> bool {
        self.test_status.is_complete()
    }

    /// Set the contest status from its assertions: confirmed when every
    /// assertion is, over the limit when any one is.
    pub fn roll_up(&mut self) {
        if self.assertions.is_empty() {
            return;
        }
        let least = self
            .assertions
            .iter()
            .map(|a| a.test_status)
            .min_by_key(TestStatus::rank)
            .unwrap_or(TestStatus::InProgress);
        let any_failed = self
            .assertions
            .iter()
            .map(|a| a.test_status)
            .filter(|s| s.is_complete() && !s.is_success())
            .max_by_key(TestStatus::rank);

        self.test_status = any_failed.unwrap_or(least);
        self.status = if any_failed.is_some() {
            RoundStatus::LimitExceeded
        } else if self.assertions.iter().all(|a| a.test_status.is_success()) {
            RoundStatus::Confirmed
        } else if self.assertions.iter().any(|a| a.result.is_some()) {
            RoundStatus::Continue
        } else {
            RoundStatus::InProgress
        };
    }

    pub fn decision(&self) -> ContestDecision {
        match self.status {
            RoundStatus::Confirmed => ContestDecision::Confirmed,
            RoundStatus::LimitExceeded => ContestDecision::LimitExceeded,
            _ if self.full_hand_count => ContestDecision::LimitExceeded,
            _ => ContestDecision::Continue {
                next_target: self.est_new_samples,
            },
        }
    }

    fn carry(&self) -> Self {
        Self {
            contest_id: self.contest_id,
            name: self.name.clone(),
            assertions: self.assertions.iter().map(AssertionRound::carry).collect(),
            est_new_samples: self.est_new_samples,
            actual_new_samples: 0,
            sample_total: self.sample_total,
            max_samples: self.max_samples,
            test_status: self.test_status,
            status: RoundStatus::InProgress,
            full_hand_count: false,
        }
    }
}

/// Cards the round could not use or had to flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDiagnostics {
    /// Sampled cards with no hand record yet.
    pub not_found: Vec<String>,
    /// Cards whose hand record lacks a contest listed on the CVR. They are
    /// still scored, so the missing contest counts against the reported
    /// winner.
    pub missing_contest: Vec<String>,
}

impl RoundDiagnostics {
    /// Cards that need follow-up with the hand-count team.
    pub fn unresolved(&self) -> usize {
        self.not_found.len() + self.missing_contest.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRound {
    pub round_idx: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Contests still being audited this round.
    pub contest_rounds: Vec<ContestRound>,
    /// Position in sample order of the last card sampled so far.
    pub cutoff: Option<usize>,
    pub cutoff_prn: Option<u64>,
    /// Cards first selected this round, in sample order.
    pub new_units: Vec<String>,
    /// Cards sampled in this and all earlier rounds.
    pub sampled_total: usize,
    #[serde(default)]
    pub diagnostics: RoundDiagnostics,
}

impl AuditRound {
    pub fn first(contests: &[ContestUnderAudit], max_samples: Option<u64>) -> Self {
        Self {
            round_idx: 1,
            started_at: Utc::now(),
            completed_at: None,
            contest_rounds: contests
                .iter()
                .map(|c| ContestRound::new(c, max_samples.map_or(c.npop, |m| m.min(c.npop))))
                .collect(),
            cutoff: None,
            cutoff_prn: None,
            new_units: Vec::new(),
            sampled_total: 0,
            diagnostics: RoundDiagnostics::default(),
        }
    }

    /// The next round, holding only the contests not yet done.
    pub fn next(&self) -> Self {
        Self {
            round_idx: self.round_idx + 1,
            started_at: Utc::now(),
            completed_at: None,
            contest_rounds: self
                .contest_rounds
                .iter()
                .filter(|c| !c.done())
                .map(ContestRound::carry)
                .collect(),
            cutoff: self.cutoff,
            cutoff_prn: self.cutoff_prn,
            new_units: Vec::new(),
            sampled_total: self.sampled_total,
            diagnostics: RoundDiagnostics::default(),
        }
    }

    pub fn contest(&self, id: u32) -> Option<&ContestRound> {
        self.contest_rounds.iter().find(|c| c.contest_id == id)
    }

    /// Every contest is finished.
    pub fn is_complete(&self) -> bool {
        self.contest_rounds.iter().all(ContestRound::done)
    }
}
