// contest.rs — Contests under audit and their assertions.
//
// A `ContestInput` is what an election office supplies: reported tallies,
// card counts and, for ranked-choice contests, the winners and assertions
// derived elsewhere. Building a `ContestUnderAudit` from it fixes the
// contest's eligible population, derives the assertions, and runs the
// pre-audit checks that decide whether the contest is audited at all.

use std::collections::{BTreeMap, BTreeSet};

use rla_core::betting::ErrorRates;
use rla_core::{
    Assorter, AssorterKind, BetContext, Bettor, BettingStrategy, ComparisonAssorter, Contest,
    ContestInfo, DrawModel, RiskTest, SocialChoice, TestStatus,
};
use serde::{Deserialize, Serialize};

use crate::card::CardRegistry;
use crate::config::{AuditConfig, AuditType};
use crate::error::AuditError;
use crate::sampler::Eligibility;

/// An externally derived assertion (ranked-choice contests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppliedAssertion {
    #[serde(flatten)]
    pub kind: AssorterKind,
    pub diluted_margin: f64,
}

/// Contest as reported, before any checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestInput {
    pub info: ContestInfo,
    #[serde(default)]
    pub votes: BTreeMap<u32, u64>,
    pub nc: u64,
    pub ncast: u64,
    /// Reported winners. Required for ranked-choice contests, ignored
    /// otherwise.
    #[serde(default)]
    pub winners: Option<Vec<u32>>,
    #[serde(default)]
    pub assertions: Vec<SuppliedAssertion>,
}

impl ContestInput {
    pub fn build(&self) -> Result<Contest, AuditError> {
        let contest = match self.info.choice {
            SocialChoice::Irv => {
                let winners = self.winners.clone().ok_or_else(|| {
                    AuditError::InvalidConfig(format!(
                        "ranked-choice contest {} needs reported winners",
                        self.info.id
                    ))
                })?;
                Contest::with_reported_winners(self.info.clone(), winners, self.nc, self.ncast)?
            }
            _ => Contest::new(self.info.clone(), self.votes.clone(), self.nc, self.ncast)?,
        };
        Ok(contest)
    }
}

/// One claim that must hold for the reported winners to be right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub assorter: Assorter,
    /// Present for comparison audits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonAssorter>,
}

impl Assertion {
    pub fn label(&self) -> String {
        self.assorter.label()
    }

    /// Upper bound of the values the risk test sees.
    pub fn upper(&self) -> f64 {
        match &self.comparison {
            Some(c) => c.upper_bound(),
            None => self.assorter.upper_bound(),
        }
    }

    pub fn diluted_margin(&self) -> f64 {
        self.assorter.diluted_margin()
    }

    fn bet_context(&self, max_risk: f64) -> BetContext {
        match &self.comparison {
            Some(c) => BetContext {
                upper: c.upper_bound(),
                reported_mean: c.noerror(),
                noerror: Some(c.noerror()),
                max_risk,
            },
            None => BetContext {
                upper: self.assorter.upper_bound(),
                reported_mean: self.assorter.diluted_mean,
                noerror: None,
                max_risk,
            },
        }
    }

    /// The sequential test for this assertion over a population of `npop`
    /// cards.
    pub fn risk_test(&self, strategy: BettingStrategy, config: &AuditConfig, npop: u64) -> RiskTest {
        let bettor = Bettor::new(strategy, self.bet_context(config.betting.max_risk));
        RiskTest::new(bettor, npop, config.risk_limit).with_clamp(config.clamp_policy)
    }

    /// Draw model for Monte Carlo sizing. `decisive` is the fraction of
    /// cards marked for either side (polling only).
    pub fn draw_model(&self, rates: ErrorRates, decisive: f64) -> DrawModel {
        match &self.comparison {
            Some(c) => DrawModel::Comparison {
                noerror: c.noerror(),
                upper: self.assorter.upper_bound(),
                rates,
            },
            None => DrawModel::Polling {
                mean: self.assorter.diluted_mean,
                upper: self.assorter.upper_bound(),
                decisive,
            },
        }
    }
}

/// A contest with its audit-time derivations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestUnderAudit {
    pub contest: Contest,
    pub assertions: Vec<Assertion>,
    pub eligibility: Eligibility,
    /// Cards in the registry that may hold the contest.
    pub npop: u64,
    /// `InProgress` when the contest is audited, otherwise the reason it
    /// is not.
    pub pre_audit: TestStatus,
}

impl ContestUnderAudit {
    pub fn new(
        input: &ContestInput,
        registry: &CardRegistry,
        config: &AuditConfig,
    ) -> Result<Self, AuditError> {
        let contest = input.build()?;
        let eligibility = eligibility_for(&contest, registry, config.has_styles);
        let npop = registry
            .sorted()
            .iter()
            .filter(|c| eligibility.admits(contest.id(), c))
            .count() as u64;

        let mut assorters = match contest.info.choice {
            SocialChoice::Irv => input
                .assertions
                .iter()
                .map(|a| Assorter::ranked(contest.id(), a.kind.clone(), a.diluted_margin))
                .collect(),
            _ => Assorter::standard_for(&contest)?,
        };
        // Without styles the margin is spread over every eligible card.
        if npop > contest.nc && contest.nc > 0 {
            let dilution = contest.nc as f64 / npop as f64;
            for a in assorters.iter_mut() {
                a.diluted_mean = rla_core::assorter::margin2mean(a.diluted_margin() * dilution);
            }
        }

        let pre_audit = pre_audit_status(&contest, &assorters, config);
        let assertions = if pre_audit == TestStatus::InProgress {
            assorters
                .into_iter()
                .map(|assorter| {
                    let comparison = match config.audit_type {
                        AuditType::Clca => {
                            Some(ComparisonAssorter::new(assorter.clone(), config.has_styles)?)
                        }
                        AuditType::Polling => None,
                    };
                    Ok(Assertion {
                        assorter,
                        comparison,
                    })
                })
                .collect::<Result<Vec<_>, AuditError>>()?
        } else {
            tracing::warn!(
                contest = contest.id(),
                name = contest.name(),
                status = %pre_audit,
                "contest excluded from audit"
            );
            Vec::new()
        };

        Ok(Self {
            contest,
            assertions,
            eligibility,
            npop,
            pre_audit,
        })
    }

    pub fn id(&self) -> u32 {
        self.contest.id()
    }

    pub fn is_audited(&self) -> bool {
        self.pre_audit == TestStatus::InProgress
    }

    /// Smallest diluted margin over the assertions.
    pub fn min_margin(&self) -> Option<f64> {
        self.assertions
            .iter()
            .map(Assertion::diluted_margin)
            .min_by(f64::total_cmp)
    }

    /// Fraction of eligible cards marked for the assertion's two sides.
    pub fn decisive_fraction(&self, assertion: &Assertion) -> f64 {
        if self.npop == 0 {
            return 0.0;
        }
        let marked = match &assertion.assorter.kind {
            AssorterKind::Plurality { winner, loser } => {
                self.contest.votes_for(*winner) + self.contest.votes_for(*loser)
            }
            AssorterKind::Supermajority { .. } => self.contest.total_votes(),
            _ => self.contest.ncast,
        };
        (marked as f64 / self.npop as f64).min(1.0)
    }
}

fn eligibility_for(contest: &Contest, registry: &CardRegistry, has_styles: bool) -> Eligibility {
    if has_styles {
        return Eligibility::Styled;
    }
    let pools: BTreeSet<u32> = registry
        .sorted()
        .iter()
        .filter(|c| c.cvr.votes.contains_key(&contest.id()))
        .filter_map(|c| c.cvr.pool)
        .collect();
    if pools.is_empty() {
        Eligibility::All
    } else {
        Eligibility::Pools(pools)
    }
}

/// Decide whether a contest can be audited.
fn pre_audit_status(contest: &Contest, assorters: &[Assorter], config: &AuditConfig) -> TestStatus {
    if contest.winners.is_empty() {
        return TestStatus::NoWinners;
    }
    if contest.losers.is_empty() {
        return TestStatus::NoLosers;
    }
    let distinct: BTreeSet<u32> = contest.winners.iter().copied().collect();
    if distinct.len() != contest.winners.len() || assorters.is_empty() {
        return TestStatus::ContestMisformed;
    }
    if matches!(
        contest.info.choice,
        SocialChoice::Plurality | SocialChoice::Approval
    ) && contest.recount_margin() <= config.min_recount_margin
    {
        return TestStatus::MinMargin;
    }
    let min_margin = assorters
        .iter()
        .map(Assorter::diluted_margin)
        .fold(f64::INFINITY, f64::min);
    if !(min_margin > 0.0) {
        return TestStatus::MinMargin;
    }
    if config.remove_too_many_phantoms && min_margin - contest.phantom_rate() <= 0.0 {
        return TestStatus::TooManyPhantoms;
    }
    TestStatus::InProgress
}
