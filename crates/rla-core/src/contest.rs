// contest.rs — Contest model: reported tallies, winners and losers.
//
// A Contest is built once from the reported results and never changes. The
// constructor checks the invariants that every later computation relies on:
// `nc >= ncast`, reported votes fit on `nc` cards, and every tallied
// candidate is declared. Winners are derived from the tallies, except for
// ranked-choice contests whose winners (and assertions) come from outside.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RlaError;

/// How a contest's winners are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialChoice {
    Plurality,
    Approval,
    /// Winner needs more than `min_fraction` of the valid votes.
    Supermajority,
    /// Instant runoff; assertions are supplied externally.
    Irv,
}

impl fmt::Display for SocialChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocialChoice::Plurality => write!(f, "plurality"),
            SocialChoice::Approval => write!(f, "approval"),
            SocialChoice::Supermajority => write!(f, "supermajority"),
            SocialChoice::Irv => write!(f, "irv"),
        }
    }
}

/// Static description of a contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestInfo {
    pub id: u32,
    pub name: String,
    /// Declared candidate ids.
    pub candidates: Vec<u32>,
    pub choice: SocialChoice,
    #[serde(default = "default_nwinners")]
    pub nwinners: usize,
    /// Required for [`SocialChoice::Supermajority`].
    #[serde(default)]
    pub min_fraction: Option<f64>,
}

fn default_nwinners() -> usize {
    1
}

impl ContestInfo {
    pub fn new(id: u32, name: impl Into<String>, candidates: Vec<u32>, choice: SocialChoice) -> Self {
        Self {
            id,
            name: name.into(),
            candidates,
            choice,
            nwinners: 1,
            min_fraction: None,
        }
    }

    pub fn with_nwinners(mut self, nwinners: usize) -> Self {
        self.nwinners = nwinners;
        self
    }

    pub fn with_min_fraction(mut self, min_fraction: f64) -> Self {
        self.min_fraction = Some(min_fraction);
        self
    }
}

/// A contest with its reported results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    pub info: ContestInfo,
    /// Reported tally: candidate id -> votes. Empty for ranked-choice contests.
    pub votes: BTreeMap<u32, u64>,
    /// Trusted upper bound on cards containing this contest.
    pub nc: u64,
    /// Cards actually cast that contain this contest, including undervotes.
    pub ncast: u64,
    pub winners: Vec<u32>,
    pub losers: Vec<u32>,
}

impl Contest {
    /// Build a contest from its reported tally. Winners follow from the tally.
    pub fn new(
        info: ContestInfo,
        votes: BTreeMap<u32, u64>,
        nc: u64,
        ncast: u64,
    ) -> Result<Self, RlaError> {
        if info.choice == SocialChoice::Irv {
            return Err(invalid(&info, "ranked-choice contests need reported winners"));
        }
        check_counts(&info, nc, ncast)?;

        for candidate in votes.keys() {
            if !info.candidates.contains(candidate) {
                return Err(invalid(
                    &info,
                    format!("votes reported for undeclared candidate {}", candidate),
                ));
            }
        }
        let total: u64 = votes.values().sum();
        if total > nc * info.nwinners as u64 {
            return Err(invalid(
                &info,
                format!("{} votes cannot fit on {} cards", total, nc),
            ));
        }

        let winners = match info.choice {
            SocialChoice::Supermajority => {
                let min_fraction = info.min_fraction.ok_or_else(|| {
                    invalid(&info, "supermajority contest without min_fraction")
                })?;
                if !(min_fraction > 0.0 && min_fraction < 1.0) {
                    return Err(invalid(
                        &info,
                        format!("min_fraction {} not in (0, 1)", min_fraction),
                    ));
                }
                votes
                    .iter()
                    .filter(|(_, &v)| total > 0 && v as f64 / total as f64 > min_fraction)
                    .map(|(&c, _)| c)
                    .collect()
            }
            _ => top_candidates(&votes, info.nwinners),
        };
        let losers = info
            .candidates
            .iter()
            .copied()
            .filter(|c| !winners.contains(c))
            .collect();

        Ok(Self {
            info,
            votes,
            nc,
            ncast,
            winners,
            losers,
        })
    }

    /// Build a contest whose winners were determined elsewhere (IRV).
    pub fn with_reported_winners(
        info: ContestInfo,
        winners: Vec<u32>,
        nc: u64,
        ncast: u64,
    ) -> Result<Self, RlaError> {
        check_counts(&info, nc, ncast)?;
        if let Some(w) = winners.iter().find(|w| !info.candidates.contains(w)) {
            return Err(invalid(&info, format!("winner {} is not a candidate", w)));
        }
        let losers = info
            .candidates
            .iter()
            .copied()
            .filter(|c| !winners.contains(c))
            .collect();
        Ok(Self {
            info,
            votes: BTreeMap::new(),
            nc,
            ncast,
            winners,
            losers,
        })
    }

    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn nphantoms(&self) -> u64 {
        self.nc - self.ncast
    }

    pub fn phantom_rate(&self) -> f64 {
        if self.nc == 0 {
            0.0
        } else {
            self.nphantoms() as f64 / self.nc as f64
        }
    }

    pub fn votes_for(&self, candidate: u32) -> u64 {
        self.votes.get(&candidate).copied().unwrap_or(0)
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.values().sum()
    }

    /// Relative gap between the weakest winner and the strongest loser:
    /// `(w - l) / w`. Zero on a tie, one when no loser got votes.
    pub fn recount_margin(&self) -> f64 {
        let weakest_winner = self.winners.iter().map(|&w| self.votes_for(w)).min();
        let strongest_loser = self.losers.iter().map(|&l| self.votes_for(l)).max();
        match (weakest_winner, strongest_loser) {
            (Some(w), Some(l)) if w > 0 => (w as f64 - l as f64) / w as f64,
            (Some(_), None) => 1.0,
            _ => 0.0,
        }
    }
}

fn check_counts(info: &ContestInfo, nc: u64, ncast: u64) -> Result<(), RlaError> {
    if nc == 0 {
        return Err(invalid(info, "nc must be positive"));
    }
    if ncast > nc {
        return Err(invalid(info, format!("ncast {} exceeds nc {}", ncast, nc)));
    }
    if info.nwinners == 0 || info.nwinners > info.candidates.len() {
        return Err(invalid(
            info,
            format!(
                "nwinners {} invalid for {} candidates",
                info.nwinners,
                info.candidates.len()
            ),
        ));
    }
    Ok(())
}

/// Candidates with the most votes, ties broken by lower id. Zero-vote
/// candidates never win.
fn top_candidates(votes: &BTreeMap<u32, u64>, n: usize) -> Vec<u32> {
    let mut ranked: Vec<(u32, u64)> = votes
        .iter()
        .filter(|(_, &v)| v > 0)
        .map(|(&c, &v)| (c, v))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(c, _)| c).collect()
}

fn invalid(info: &ContestInfo, reason: impl Into<String>) -> RlaError {
    RlaError::InvalidContest {
        contest: info.id,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(pairs: &[(u32, u64)]) -> BTreeMap<u32, u64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn plurality_winner_is_top_vote_getter() {
        let info = ContestInfo::new(1, "Mayor", vec![0, 1, 2], SocialChoice::Plurality);
        let contest = Contest::new(info, tally(&[(0, 300), (1, 500), (2, 100)]), 1000, 950).unwrap();
        assert_eq!(contest.winners, vec![1]);
        assert_eq!(contest.losers, vec![0, 2]);
        assert_eq!(contest.nphantoms(), 50);
        assert!((contest.phantom_rate() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn supermajority_requires_min_fraction_share() {
        let info = ContestInfo::new(2, "Measure", vec![0, 1], SocialChoice::Supermajority)
            .with_min_fraction(0.6);
        let contest = Contest::new(info.clone(), tally(&[(0, 650), (1, 350)]), 1000, 1000).unwrap();
        assert_eq!(contest.winners, vec![0]);

        let failing = Contest::new(info, tally(&[(0, 550), (1, 450)]), 1000, 1000).unwrap();
        assert!(failing.winners.is_empty());
    }

    #[test]
    fn rejects_votes_exceeding_cards() {
        let info = ContestInfo::new(3, "Board", vec![0, 1], SocialChoice::Plurality);
        let err = Contest::new(info, tally(&[(0, 900), (1, 200)]), 1000, 1000).unwrap_err();
        assert!(matches!(err, RlaError::InvalidContest { contest: 3, .. }));
    }

    #[test]
    fn rejects_ncast_above_nc() {
        let info = ContestInfo::new(4, "Clerk", vec![0, 1], SocialChoice::Plurality);
        assert!(Contest::new(info, tally(&[(0, 10)]), 100, 101).is_err());
    }

    #[test]
    fn rejects_undeclared_candidate() {
        let info = ContestInfo::new(5, "Judge", vec![0, 1], SocialChoice::Plurality);
        assert!(Contest::new(info, tally(&[(7, 10)]), 100, 100).is_err());
    }

    #[test]
    fn recount_margin_zero_on_tie() {
        let info = ContestInfo::new(6, "Tie", vec![0, 1], SocialChoice::Plurality);
        let contest = Contest::new(info, tally(&[(0, 40), (1, 40)]), 100, 100).unwrap();
        assert_eq!(contest.recount_margin(), 0.0);
    }

    #[test]
    fn irv_winners_supplied() {
        let info = ContestInfo::new(7, "Council", vec![0, 1, 2], SocialChoice::Irv);
        let contest = Contest::with_reported_winners(info, vec![2], 500, 480).unwrap();
        assert_eq!(contest.winners, vec![2]);
        assert_eq!(contest.losers, vec![0, 1]);
    }
}
