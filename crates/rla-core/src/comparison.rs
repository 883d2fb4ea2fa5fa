// comparison.rs — Comparison (CLCA) assorter.
//
// Wraps a base assorter and scores a (hand record, reported record) pair by
// how much the reported record overstated the margin:
//
//   overstatement = assort(cvr) - assort(mvr)
//   bassort       = (1 - overstatement / u) * noerror
//   noerror       = 1 / (2 - margin / u)
//
// With u = 1 the five possible values are 0, noerror/2, noerror,
// 3*noerror/2 and 2*noerror (two-vote overstatement through two-vote
// understatement). The reported assorter mean must exceed 1/2, otherwise the
// comparison has no margin to audit.

use serde::{Deserialize, Serialize};

use crate::assorter::Assorter;
use crate::error::RlaError;
use crate::record::VoteRecord;

/// Discrepancy class of a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discrepancy {
    TwoVoteOver,
    OneVoteOver,
    None,
    OneVoteUnder,
    TwoVoteUnder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonAssorter {
    pub assorter: Assorter,
    /// Cards carry style information: a card without the contest is known
    /// not to contain it.
    pub has_style: bool,
    noerror: f64,
}

impl ComparisonAssorter {
    pub fn new(assorter: Assorter, has_style: bool) -> Result<Self, RlaError> {
        let u = assorter.upper_bound();
        let mean = assorter.diluted_mean;
        if mean <= 0.5 {
            return Err(RlaError::InvalidAssorter {
                contest: assorter.contest,
                assorter: assorter.label(),
                reason: format!("reported mean {} must exceed 1/2", mean),
            });
        }
        let noerror = 1.0 / (2.0 - assorter.diluted_margin() / u);
        if noerror <= 0.5 {
            return Err(RlaError::InvalidAssorter {
                contest: assorter.contest,
                assorter: assorter.label(),
                reason: format!("noerror {} must exceed 1/2", noerror),
            });
        }
        Ok(Self {
            assorter,
            has_style,
            noerror,
        })
    }

    /// Score of a card whose hand record matches its CVR.
    pub fn noerror(&self) -> f64 {
        self.noerror
    }

    pub fn upper_bound(&self) -> f64 {
        2.0 * self.noerror
    }

    pub fn diluted_margin(&self) -> f64 {
        self.assorter.diluted_margin()
    }

    /// Score one sampled card.
    ///
    /// A phantom MVR (card never found) and, with styles, an MVR lacking the
    /// contest both score 0 on the hand side. A phantom CVR scores 1/2 on
    /// the reported side. A styled, non-phantom CVR lacking the contest is a
    /// data error and is returned as such.
    pub fn bassort(&self, mvr: &impl VoteRecord, cvr: &impl VoteRecord) -> Result<f64, RlaError> {
        let contest = self.assorter.contest;
        if self.has_style && !cvr.is_phantom() && !cvr.has_contest(contest) {
            return Err(RlaError::MissingContest {
                card: cvr.card_id().to_string(),
                contest,
            });
        }

        let mvr_assort = if mvr.is_phantom() || (self.has_style && !mvr.has_contest(contest)) {
            0.0
        } else {
            self.assorter.assort(mvr, false)
        };
        let cvr_assort = if cvr.is_phantom() {
            0.5
        } else {
            self.assorter.assort(cvr, false)
        };

        let overstatement = cvr_assort - mvr_assort;
        Ok((1.0 - overstatement / self.assorter.upper_bound()) * self.noerror)
    }

    /// Classify a bassort value by its ratio to `noerror`.
    pub fn classify(&self, bassort: f64) -> Discrepancy {
        classify_ratio(bassort / self.noerror)
    }
}

/// Classify `bassort / noerror` (which lies in [0, 2]).
pub fn classify_ratio(ratio: f64) -> Discrepancy {
    const TOL: f64 = 1e-9;
    if ratio <= TOL {
        Discrepancy::TwoVoteOver
    } else if ratio < 1.0 - TOL {
        Discrepancy::OneVoteOver
    } else if ratio <= 1.0 + TOL {
        Discrepancy::None
    } else if ratio < 2.0 - TOL {
        Discrepancy::OneVoteUnder
    } else {
        Discrepancy::TwoVoteUnder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contest::{Contest, ContestInfo, SocialChoice};
    use crate::record::Cvr;
    use std::collections::BTreeMap;

    fn comparison(has_style: bool) -> ComparisonAssorter {
        let info = ContestInfo::new(1, "Mayor", vec![0, 1], SocialChoice::Plurality);
        let votes: BTreeMap<u32, u64> = [(0, 525), (1, 475)].into_iter().collect();
        let contest = Contest::new(info, votes, 1000, 1000).unwrap();
        ComparisonAssorter::new(Assorter::plurality(&contest, 0, 1), has_style).unwrap()
    }

    fn winner() -> Cvr {
        Cvr::new("w").with_votes(1, vec![0])
    }

    fn loser() -> Cvr {
        Cvr::new("l").with_votes(1, vec![1])
    }

    #[test]
    fn noerror_from_margin() {
        let c = comparison(true);
        assert!((c.diluted_margin() - 0.05).abs() < 1e-12);
        assert_eq!(c.noerror(), 1.0 / (2.0 - 0.05));
        assert_eq!(c.upper_bound(), 2.0 * c.noerror());
    }

    #[test]
    fn two_vote_overstatement_scores_zero() {
        let c = comparison(true);
        assert_eq!(c.bassort(&loser(), &winner()).unwrap(), 0.0);
        assert_eq!(c.classify(0.0), Discrepancy::TwoVoteOver);
    }

    #[test]
    fn two_vote_understatement_scores_twice_noerror() {
        let c = comparison(true);
        let v = c.bassort(&winner(), &loser()).unwrap();
        assert_eq!(v, 2.0 * c.noerror());
        assert_eq!(c.classify(v), Discrepancy::TwoVoteUnder);
    }

    #[test]
    fn one_vote_errors() {
        let c = comparison(true);
        let undervote = Cvr::new("u").with_votes(1, vec![]);
        let over = c.bassort(&undervote, &winner()).unwrap();
        assert!((over - 0.5 * c.noerror()).abs() < 1e-15);
        assert_eq!(c.classify(over), Discrepancy::OneVoteOver);
        let under = c.bassort(&winner(), &undervote).unwrap();
        assert!((under - 1.5 * c.noerror()).abs() < 1e-15);
        assert_eq!(c.classify(under), Discrepancy::OneVoteUnder);
        assert_eq!(c.bassort(&winner(), &winner()).unwrap(), c.noerror());
    }

    #[test]
    fn phantoms() {
        let c = comparison(true);
        let phantom = Cvr::phantom("p", [1]);
        // phantom CVR vs unfound MVR: 1/2 reported, 0 actual
        assert!((c.bassort(&phantom, &phantom).unwrap() - 0.5 * c.noerror()).abs() < 1e-15);
        // real CVR for winner, card never found
        assert_eq!(c.bassort(&phantom, &winner()).unwrap(), 0.0);
    }

    #[test]
    fn styled_cvr_missing_contest_is_an_error() {
        let c = comparison(true);
        let other = Cvr::new("x").with_votes(9, vec![0]);
        let err = c.bassort(&winner(), &other).unwrap_err();
        assert!(matches!(err, RlaError::MissingContest { contest: 1, .. }));

        let unstyled = comparison(false);
        assert!(unstyled.bassort(&winner(), &other).is_ok());
    }

    #[test]
    fn rejects_losing_assorter() {
        let info = ContestInfo::new(1, "Mayor", vec![0, 1], SocialChoice::Plurality);
        let votes: BTreeMap<u32, u64> = [(0, 525), (1, 475)].into_iter().collect();
        let contest = Contest::new(info, votes, 1000, 1000).unwrap();
        assert!(ComparisonAssorter::new(Assorter::plurality(&contest, 1, 0), true).is_err());
    }
}
