// sampler.rs — Consistent sampling.
//
// A round's sample is every card whose position in sample order is at or
// below a cutoff. Each contest asks for a number of additional eligible
// cards; its cutoff is the position where that many unsampled eligible cards
// have been passed. The round takes the largest contest cutoff, so every
// contest's sample stays a prefix of its own eligible sequence and a later
// round can only add cards.

use std::collections::{BTreeSet, HashSet};

use rla_core::{Cancellation, VoteRecord, WorkerPool};
use serde::{Deserialize, Serialize};

use crate::card::{Card, CardRegistry};

/// Which cards can hold a contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "pools", rename_all = "snake_case")]
pub enum Eligibility {
    /// The card's CVR lists the contest.
    Styled,
    /// Any card may hold the contest.
    All,
    /// Cards tabulated in one of these pools. Cards with no pool fall back
    /// to their CVR.
    Pools(BTreeSet<u32>),
}

impl Eligibility {
    pub fn admits(&self, contest: u32, card: &Card) -> bool {
        match self {
            Eligibility::Styled => card.has_contest(contest),
            Eligibility::All => true,
            Eligibility::Pools(pools) => card
                .cvr
                .pool
                .map_or_else(|| card.has_contest(contest), |p| pools.contains(&p)),
        }
    }
}

/// How many more cards a contest wants this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContestTarget {
    pub contest: u32,
    pub additional: u64,
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestSelection {
    pub contest: u32,
    pub wanted: u64,
    /// Unsampled eligible cards at or below the contest's cutoff.
    pub found: u64,
    /// Position in sample order of the last card the contest needs.
    pub cutoff: Option<usize>,
    /// Fewer eligible cards remain than the contest wanted.
    pub full_hand_count: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSelection {
    /// Largest contest cutoff, as a position in sample order.
    pub cutoff: Option<usize>,
    /// Sample number at the cutoff.
    pub cutoff_prn: Option<u64>,
    /// Newly selected card ids, in sample order.
    pub new_units: Vec<String>,
    pub per_contest: Vec<ContestSelection>,
}

fn scan(cards: &[Card], target: &ContestTarget, already: &HashSet<String>) -> ContestSelection {
    let mut found = 0u64;
    let mut cutoff = None;
    if target.additional > 0 {
        for (pos, card) in cards.iter().enumerate() {
            if !target.eligibility.admits(target.contest, card) || already.contains(card.id()) {
                continue;
            }
            found += 1;
            cutoff = Some(pos);
            if found == target.additional {
                break;
            }
        }
    }
    ContestSelection {
        contest: target.contest,
        wanted: target.additional,
        found,
        cutoff,
        full_hand_count: found < target.additional,
    }
}

/// Choose the cards for one round. Pure: the same registry, targets and
/// prior sample always give the same selection.
pub fn select_round(
    registry: &CardRegistry,
    targets: &[ContestTarget],
    already: &HashSet<String>,
    pool: &WorkerPool,
) -> RoundSelection {
    let cards = registry.sorted();
    let per_contest: Vec<ContestSelection> = pool
        .run(targets.len(), &Cancellation::none(), |i| {
            scan(cards, &targets[i], already)
        })
        .results
        .into_iter()
        .map(|(_, s)| s)
        .collect();

    let cutoff = per_contest.iter().filter_map(|s| s.cutoff).max();
    let new_units = match cutoff {
        Some(c) => cards[..=c]
            .iter()
            .filter(|card| !already.contains(card.id()))
            .map(|card| card.id().to_string())
            .collect(),
        None => Vec::new(),
    };
    for s in per_contest.iter().filter(|s| s.full_hand_count) {
        tracing::warn!(
            contest = s.contest,
            wanted = s.wanted,
            found = s.found,
            "eligible cards exhausted, contest needs a full hand count"
        );
    }
    tracing::debug!(
        contests = per_contest.len(),
        cutoff = ?cutoff,
        new_units = new_units.len(),
        "round selection"
    );

    RoundSelection {
        cutoff,
        cutoff_prn: cutoff.map(|c| cards[c].prn),
        new_units,
        per_contest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rla_core::Cvr;

    /// Even cards hold contest 1, every card holds contest 2.
    fn registry(n: usize) -> CardRegistry {
        let cvrs = (0..n)
            .map(|i| {
                let cvr = Cvr::new(format!("c{}", i)).with_votes(2, vec![0]);
                let cvr = if i % 2 == 0 { cvr.with_votes(1, vec![1]) } else { cvr };
                cvr.with_pool((i % 3) as u32)
            })
            .collect();
        CardRegistry::build("sampler seed", cvrs).unwrap()
    }

    fn target(contest: u32, additional: u64) -> ContestTarget {
        ContestTarget {
            contest,
            additional,
            eligibility: Eligibility::Styled,
        }
    }

    #[test]
    fn styled_contest_gets_its_count() {
        let registry = registry(100);
        let sel = select_round(&registry, &[target(1, 10)], &HashSet::new(), &WorkerPool::new(2));
        let s = &sel.per_contest[0];
        assert_eq!(s.found, 10);
        assert!(!s.full_hand_count);
        let with_contest = sel
            .new_units
            .iter()
            .filter(|id| registry.get(id).unwrap().has_contest(1))
            .count();
        assert_eq!(with_contest, 10);
        // Every card up to the cutoff is selected, in sample order.
        assert_eq!(sel.new_units.len(), sel.cutoff.unwrap() + 1);
        assert_eq!(sel.cutoff_prn, Some(registry.sorted()[sel.cutoff.unwrap()].prn));
    }

    #[test]
    fn selection_is_idempotent_and_pool_independent() {
        let registry = registry(300);
        let targets = [target(1, 20), target(2, 35)];
        let already: HashSet<String> = HashSet::new();
        let a = select_round(&registry, &targets, &already, &WorkerPool::new(1));
        let b = select_round(&registry, &targets, &already, &WorkerPool::new(4));
        let c = select_round(&registry, &targets, &already, &WorkerPool::new(4));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.cutoff, a.per_contest.iter().filter_map(|s| s.cutoff).max());
    }

    #[test]
    fn later_rounds_extend_the_prefix() {
        let registry = registry(200);
        let pool = WorkerPool::new(2);
        let first = select_round(&registry, &[target(1, 10)], &HashSet::new(), &pool);
        let already: HashSet<String> = first.new_units.iter().cloned().collect();
        let second = select_round(&registry, &[target(1, 10)], &already, &pool);

        assert!(second.new_units.iter().all(|id| !already.contains(id)));
        assert!(second.cutoff > first.cutoff);
        // Together the two rounds are exactly the prefix up to the new cutoff.
        let all: HashSet<&str> = first
            .new_units
            .iter()
            .chain(second.new_units.iter())
            .map(String::as_str)
            .collect();
        let prefix: HashSet<&str> = registry.sorted()[..=second.cutoff.unwrap()]
            .iter()
            .map(|c| c.id())
            .collect();
        assert_eq!(all, prefix);
    }

    #[test]
    fn exhaustion_flags_full_hand_count() {
        let registry = registry(20);
        let sel = select_round(&registry, &[target(1, 50)], &HashSet::new(), &WorkerPool::new(1));
        let s = &sel.per_contest[0];
        assert_eq!(s.found, 10);
        assert!(s.full_hand_count);
        let last_eligible = registry
            .sorted()
            .iter()
            .rposition(|c| c.has_contest(1))
            .unwrap();
        assert_eq!(s.cutoff, Some(last_eligible));
    }

    #[test]
    fn zero_target_selects_nothing() {
        let registry = registry(20);
        let sel = select_round(&registry, &[target(1, 0)], &HashSet::new(), &WorkerPool::new(1));
        assert_eq!(sel.cutoff, None);
        assert!(sel.new_units.is_empty());
        assert!(!sel.per_contest[0].full_hand_count);
    }

    #[test]
    fn eligibility_rules() {
        let registry = registry(6);
        let card = |id: &str| registry.get(id).unwrap().clone();
        assert!(Eligibility::Styled.admits(1, &card("c0")));
        assert!(!Eligibility::Styled.admits(1, &card("c1")));
        assert!(Eligibility::All.admits(1, &card("c1")));
        let pools = Eligibility::Pools([1].into_iter().collect());
        assert!(pools.admits(1, &card("c1")));
        assert!(pools.admits(1, &card("c4")));
        assert!(!pools.admits(1, &card("c0")));
    }
}
