// record.rs — Vote records as seen by the assorters.
//
// The same shape serves both sides of a comparison: the machine-reported
// cast vote record (CVR) and the hand transcription of the paper ballot
// (MVR). A record lists, per contest on the card, the candidate ids marked
// (in rank order for ranked-choice contests).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Read access the assorters need from a ballot record.
pub trait VoteRecord {
    /// Stable identifier of the physical card.
    fn card_id(&self) -> &str;

    /// Placeholder for a card that was counted but has no CVR.
    fn is_phantom(&self) -> bool;

    /// Candidate ids marked for `contest`, or `None` when the card does not
    /// carry the contest.
    fn votes(&self, contest: u32) -> Option<&[u32]>;

    fn has_contest(&self, contest: u32) -> bool {
        self.votes(contest).is_some()
    }

    fn has_vote_for(&self, contest: u32, candidate: u32) -> bool {
        self.votes(contest)
            .is_some_and(|marks| marks.contains(&candidate))
    }
}

/// A single ballot record: a CVR when reported by the tabulator, an MVR when
/// transcribed by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cvr {
    pub id: String,
    /// contest id -> marked candidate ids. An empty list is an undervote.
    pub votes: BTreeMap<u32, Vec<u32>>,
    #[serde(default)]
    pub phantom: bool,
    /// Batch or pool the card was tabulated in, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<u32>,
}

/// Hand transcription of a sampled card.
pub type Mvr = Cvr;

impl Cvr {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            votes: BTreeMap::new(),
            phantom: false,
            pool: None,
        }
    }

    /// A phantom card carrying the given contests with no marks.
    pub fn phantom(id: impl Into<String>, contests: impl IntoIterator<Item = u32>) -> Self {
        Self {
            id: id.into(),
            votes: contests.into_iter().map(|c| (c, Vec::new())).collect(),
            phantom: true,
            pool: None,
        }
    }

    pub fn with_votes(mut self, contest: u32, marks: Vec<u32>) -> Self {
        self.votes.insert(contest, marks);
        self
    }

    pub fn with_pool(mut self, pool: u32) -> Self {
        self.pool = Some(pool);
        self
    }
}

impl VoteRecord for Cvr {
    fn card_id(&self) -> &str {
        &self.id
    }

    fn is_phantom(&self) -> bool {
        self.phantom
    }

    fn votes(&self, contest: u32) -> Option<&[u32]> {
        self.votes.get(&contest).map(Vec::as_slice)
    }
}
