// card.rs — Auditable cards and the sample-number registry.
//
// Every card in the population, real or phantom, gets one sample number when
// the registry is built and keeps it for the life of the audit. The registry
// holds the cards sorted by (prn, index), which is the order every sample is
// drawn in.

use std::collections::{BTreeMap, HashMap};

use rla_core::{Contest, Cvr, VoteRecord};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::prn;

/// A card in the audit population. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Position in the CVR export (phantoms follow the real cards).
    pub index: usize,
    pub prn: u64,
    pub cvr: Cvr,
}

impl Card {
    pub fn id(&self) -> &str {
        &self.cvr.id
    }
}

impl VoteRecord for Card {
    fn card_id(&self) -> &str {
        &self.cvr.id
    }

    fn is_phantom(&self) -> bool {
        self.cvr.phantom
    }

    fn votes(&self, contest: u32) -> Option<&[u32]> {
        self.cvr.votes(contest)
    }
}

/// Cards in sample order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct CardRegistry {
    cards: Vec<Card>,
    by_id: HashMap<String, usize>,
}

impl CardRegistry {
    /// Assign sample numbers to `cvrs` (in export order) and sort.
    pub fn build(seed: &str, cvrs: Vec<Cvr>) -> Result<Self, AuditError> {
        let cards = cvrs
            .into_iter()
            .enumerate()
            .map(|(index, cvr)| Card {
                index,
                prn: prn::sample_number(seed, index),
                cvr,
            })
            .collect();
        Self::from_cards(cards)
    }

    /// Rebuild from persisted cards, checking every sample number against
    /// the seed.
    pub fn restore(seed: &str, cards: Vec<Card>) -> Result<Self, AuditError> {
        if let Some(bad) = cards
            .iter()
            .find(|c| c.prn != prn::sample_number(seed, c.index))
        {
            return Err(AuditError::InvariantViolation(format!(
                "card {} has sample number {} that does not match the seed",
                bad.id(),
                bad.prn
            )));
        }
        Self::from_cards(cards)
    }

    fn from_cards(mut cards: Vec<Card>) -> Result<Self, AuditError> {
        cards.sort_by_key(|c| (c.prn, c.index));
        let mut by_id = HashMap::with_capacity(cards.len());
        for (pos, card) in cards.iter().enumerate() {
            if by_id.insert(card.cvr.id.clone(), pos).is_some() {
                return Err(AuditError::InvalidConfig(format!(
                    "duplicate card id {}",
                    card.cvr.id
                )));
            }
        }
        Ok(Self { cards, by_id })
    }

    /// All cards in sample order.
    pub fn sorted(&self) -> &[Card] {
        &self.cards
    }

    pub fn get(&self, id: &str) -> Option<&Card> {
        self.by_id.get(id).map(|&pos| &self.cards[pos])
    }

    /// Position of a card in sample order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn nphantoms(&self) -> usize {
        self.cards.iter().filter(|c| c.cvr.phantom).count()
    }
}

/// Phantom cards making up the gap between each contest's trusted card
/// count and the CVRs that show it.
///
/// With card styles the gap is per contest, and phantom `k` carries every
/// contest that still needs more than `k` phantoms. Without styles only the
/// largest contest's gap over the whole CVR count matters, and every phantom
/// carries every contest.
pub fn make_phantoms(
    contests: &[Contest],
    cvrs: &[Cvr],
    has_styles: bool,
) -> Result<Vec<Cvr>, AuditError> {
    let mut needed: BTreeMap<u32, u64> = BTreeMap::new();
    for contest in contests {
        let shown = if has_styles {
            cvrs.iter().filter(|c| c.has_contest(contest.id())).count() as u64
        } else {
            cvrs.len() as u64
        };
        if !has_styles && shown >= contest.nc {
            needed.insert(contest.id(), 0);
            continue;
        }
        if shown > contest.nc {
            return Err(AuditError::InvalidConfig(format!(
                "contest {} appears on {} CVRs but nc is {}",
                contest.id(),
                shown,
                contest.nc
            )));
        }
        needed.insert(contest.id(), contest.nc - shown);
    }

    let count = needed.values().copied().max().unwrap_or(0);
    let phantoms = (0..count)
        .map(|k| {
            let contests = needed
                .iter()
                .filter(|(_, &n)| !has_styles || n > k)
                .map(|(&id, _)| id);
            Cvr::phantom(format!("phantom-{}", k), contests)
        })
        .collect::<Vec<_>>();
    if !phantoms.is_empty() {
        tracing::info!(count = phantoms.len(), "created phantom cards");
    }
    Ok(phantoms)
}
