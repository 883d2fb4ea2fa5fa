// assorter.rs — Assorters: map one ballot record to a bounded score.
//
// Each assorter encodes a single claim ("W beats L", "W clears the
// threshold"). Its scores lie in [0, u] and the population mean exceeds 1/2
// exactly when the claim is true. The set of assorter kinds is closed; ranked
// contests use the two standard pairwise forms with an externally supplied
// margin.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contest::{Contest, SocialChoice};
use crate::error::RlaError;
use crate::record::VoteRecord;

/// The claim an assorter scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssorterKind {
    /// Winner gets more votes than loser.
    Plurality { winner: u32, loser: u32 },
    /// Winner gets more than `min_fraction` of the valid votes.
    Supermajority { winner: u32, min_fraction: f64 },
    /// Ranked: winner can never be eliminated before loser.
    NotEliminatedBefore { winner: u32, loser: u32 },
    /// Ranked: among `continuing`, winner is not eliminated next.
    NotEliminatedNext {
        winner: u32,
        loser: u32,
        continuing: Vec<u32>,
    },
}

/// A scored claim about one contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assorter {
    pub contest: u32,
    pub kind: AssorterKind,
    /// Reported mean of the assort values over the contest's `nc` cards.
    pub diluted_mean: f64,
}

impl Assorter {
    /// Pairwise plurality assorter with its mean taken from the tally.
    pub fn plurality(contest: &Contest, winner: u32, loser: u32) -> Self {
        let nc = contest.nc as f64;
        let margin = (contest.votes_for(winner) as f64 - contest.votes_for(loser) as f64) / nc;
        Self {
            contest: contest.id(),
            kind: AssorterKind::Plurality { winner, loser },
            diluted_mean: margin2mean(margin),
        }
    }

    /// Threshold assorter for a supermajority contest.
    pub fn supermajority(contest: &Contest, winner: u32) -> Result<Self, RlaError> {
        let min_fraction = contest
            .info
            .min_fraction
            .ok_or_else(|| RlaError::InvalidContest {
                contest: contest.id(),
                reason: "supermajority contest without min_fraction".into(),
            })?;
        let upper = 1.0 / (2.0 * min_fraction);
        let nc = contest.nc as f64;
        let for_winner = contest.votes_for(winner) as f64;
        let for_others = contest.total_votes() as f64 - for_winner;
        let neutral = nc - for_winner - for_others;
        Ok(Self {
            contest: contest.id(),
            kind: AssorterKind::Supermajority {
                winner,
                min_fraction,
            },
            diluted_mean: (for_winner * upper + 0.5 * neutral) / nc,
        })
    }

    /// Ranked-choice assertion whose margin was computed externally.
    pub fn ranked(contest: u32, kind: AssorterKind, diluted_margin: f64) -> Self {
        Self {
            contest,
            kind,
            diluted_mean: margin2mean(diluted_margin),
        }
    }

    /// All standard assorters for a plurality, approval or supermajority
    /// contest: every winner against every loser, or every winner against
    /// the threshold.
    pub fn standard_for(contest: &Contest) -> Result<Vec<Self>, RlaError> {
        match contest.info.choice {
            SocialChoice::Plurality | SocialChoice::Approval => Ok(contest
                .winners
                .iter()
                .flat_map(|&w| contest.losers.iter().map(move |&l| (w, l)))
                .map(|(w, l)| Self::plurality(contest, w, l))
                .collect()),
            SocialChoice::Supermajority => contest
                .winners
                .iter()
                .map(|&w| Self::supermajority(contest, w))
                .collect(),
            SocialChoice::Irv => Err(RlaError::InvalidContest {
                contest: contest.id(),
                reason: "ranked-choice assertions must be supplied".into(),
            }),
        }
    }

    /// Upper bound `u` of the assort values.
    pub fn upper_bound(&self) -> f64 {
        match &self.kind {
            AssorterKind::Supermajority { min_fraction, .. } => 1.0 / (2.0 * min_fraction),
            _ => 1.0,
        }
    }

    pub fn diluted_margin(&self) -> f64 {
        mean2margin(self.diluted_mean)
    }

    /// Score a record. A card without the contest scores 1/2; a phantom
    /// scores 0 when `use_phantoms` is set (polling worst case).
    pub fn assort(&self, record: &impl VoteRecord, use_phantoms: bool) -> f64 {
        if use_phantoms && record.is_phantom() {
            return 0.0;
        }
        let Some(marks) = record.votes(self.contest) else {
            return 0.5;
        };
        match &self.kind {
            AssorterKind::Plurality { winner, loser } => {
                let w = marks.contains(winner) as i32;
                let l = marks.contains(loser) as i32;
                (w - l + 1) as f64 * 0.5
            }
            AssorterKind::Supermajority { winner, .. } => match marks {
                [only] if only == winner => self.upper_bound(),
                [_] => 0.0,
                _ => 0.5,
            },
            AssorterKind::NotEliminatedBefore { winner, loser } => {
                if marks.first() == Some(winner) {
                    return 1.0;
                }
                let w = marks.iter().position(|c| c == winner);
                let l = marks.iter().position(|c| c == loser);
                match (w, l) {
                    (None, Some(_)) => 0.0,
                    (Some(w), Some(l)) if l < w => 0.0,
                    _ => 0.5,
                }
            }
            AssorterKind::NotEliminatedNext {
                winner,
                loser,
                continuing,
            } => match marks.iter().find(|c| continuing.contains(c)) {
                Some(first) if first == winner => 1.0,
                Some(first) if first == loser => 0.0,
                _ => 0.5,
            },
        }
    }

    /// Short label, unique within a contest.
    pub fn label(&self) -> String {
        match &self.kind {
            AssorterKind::Plurality { winner, loser } => format!("{}/{}", winner, loser),
            AssorterKind::Supermajority {
                winner,
                min_fraction,
            } => format!("{}/>{}", winner, min_fraction),
            AssorterKind::NotEliminatedBefore { winner, loser } => {
                format!("neb {}/{}", winner, loser)
            }
            AssorterKind::NotEliminatedNext {
                winner,
                loser,
                continuing,
            } => format!("nen {}/{} {:?}", winner, loser, continuing),
        }
    }
}

impl fmt::Display for Assorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contest {} {} margin={:.4}",
            self.contest,
            self.label(),
            self.diluted_margin()
        )
    }
}

pub fn margin2mean(margin: f64) -> f64 {
    (margin + 1.0) / 2.0
}

pub fn mean2margin(mean: f64) -> f64 {
    2.0 * mean - 1.0
}
