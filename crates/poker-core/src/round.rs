// Estimation round: classify one batch of submissions and decide consensus.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::deck::{classify, Card, Points, SpecialCard};
use crate::model::StoryId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundError {
    #[error("round has no submissions")]
    EmptyRound,

    #[error("participant `{participant}` played `{raw}`, which is not a card in the deck")]
    InvalidCard { participant: String, raw: String },
}

// ---------------------------------------------------------------------------
// Round entries and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumericEntry {
    pub participant: String,
    pub points: Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecialEntry {
    pub participant: String,
    pub card: SpecialCard,
}

impl SpecialEntry {
    pub fn meaning(&self) -> &'static str {
        self.card.meaning()
    }
}

/// Min, max, and exact mean of the numeric cards in a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStats {
    pub min: Points,
    pub max: Points,
    /// Sum of all numeric cards in half points; the mean is derived from it
    /// so nothing is rounded until display.
    total_halves: u64,
    count: usize,
}

impl RoundStats {
    fn from_entries(entries: &[NumericEntry]) -> Option<Self> {
        let first = entries.first()?.points;
        let (min, max, total_halves) = entries.iter().fold(
            (first, first, 0u64),
            |(min, max, total), e| {
                (
                    min.min(e.points),
                    max.max(e.points),
                    total + u64::from(e.points.halves()),
                )
            },
        );
        Some(Self {
            min,
            max,
            total_halves,
            count: entries.len(),
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.total_halves as f64 / (2.0 * self.count as f64)
    }

    /// Mean rounded to one decimal place, for display only.
    pub fn mean_display(&self) -> String {
        format!("{:.1}", self.mean())
    }
}

/// Serialized as `min`, `max`, `count`, and the unrounded `mean`.
impl Serialize for RoundStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RoundStats", 4)?;
        state.serialize_field("min", &self.min)?;
        state.serialize_field("max", &self.max)?;
        state.serialize_field("count", &self.count)?;
        state.serialize_field("mean", &self.mean())?;
        state.end()
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum RoundOutcome {
    /// Every participant played the same numeric card.
    Consensus(Points),
    /// Numeric disagreement, or a special card was played. The breakdown is
    /// carried by the enclosing [`RoundResult`].
    NoConsensus,
    /// Fewer than two numeric cards; consensus was not checked.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundResult {
    pub story_id: StoryId,
    /// Numeric submissions ordered by participant name.
    pub numeric: Vec<NumericEntry>,
    /// Special-card submissions ordered by participant name.
    pub special: Vec<SpecialEntry>,
    /// Present whenever at least one numeric card was played.
    pub stats: Option<RoundStats>,
    pub outcome: RoundOutcome,
}

impl RoundResult {
    pub fn consensus_value(&self) -> Option<Points> {
        match self.outcome {
            RoundOutcome::Consensus(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_consensus(&self) -> bool {
        self.consensus_value().is_some()
    }

    /// Every submission with its classified card, ordered by participant.
    pub fn submissions(&self) -> Vec<(&str, Card)> {
        let mut all: Vec<(&str, Card)> = self
            .numeric
            .iter()
            .map(|e| (e.participant.as_str(), Card::Numeric(e.points)))
            .chain(
                self.special
                    .iter()
                    .map(|e| (e.participant.as_str(), Card::Special(e.card))),
            )
            .collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all
    }

    /// One-line description for logs and terminal output.
    pub fn describe(&self) -> String {
        let mut text = match (&self.outcome, &self.stats) {
            (RoundOutcome::Consensus(value), _) => format!("consensus on {value}"),
            (RoundOutcome::NoConsensus, Some(stats)) => format!(
                "no consensus: range {} - {}, mean {}",
                stats.min,
                stats.max,
                stats.mean_display()
            ),
            (RoundOutcome::NoConsensus, None) => "no consensus".to_string(),
            (RoundOutcome::Inconclusive, _) => {
                format!("inconclusive: {} numeric card(s)", self.numeric.len())
            }
        };
        for entry in &self.special {
            text.push_str(&format!(
                "; {} played {} ({})",
                entry.participant,
                entry.card,
                entry.meaning()
            ));
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate one round of submissions (participant name -> raw card) for a
/// story.
///
/// Classification is all-or-nothing: the first invalid card, in participant
/// name order, rejects the whole round. Nothing is persisted here.
pub fn evaluate(
    story_id: StoryId,
    submissions: &BTreeMap<String, String>,
) -> Result<RoundResult, RoundError> {
    if submissions.is_empty() {
        return Err(RoundError::EmptyRound);
    }

    let mut numeric = Vec::new();
    let mut special = Vec::new();

    for (participant, raw) in submissions {
        let card = classify(raw).map_err(|_| RoundError::InvalidCard {
            participant: participant.clone(),
            raw: raw.clone(),
        })?;
        match card {
            Card::Numeric(points) => numeric.push(NumericEntry {
                participant: participant.clone(),
                points,
            }),
            Card::Special(card) => special.push(SpecialEntry {
                participant: participant.clone(),
                card,
            }),
        }
    }

    let stats = RoundStats::from_entries(&numeric);

    let outcome = if numeric.len() < 2 {
        RoundOutcome::Inconclusive
    } else {
        let distinct: BTreeSet<Points> = numeric.iter().map(|e| e.points).collect();
        match (distinct.len(), special.is_empty()) {
            (1, true) => RoundOutcome::Consensus(numeric[0].points),
            _ => RoundOutcome::NoConsensus,
        }
    };

    debug!(
        "Evaluated round for story {}: {} numeric, {} special, outcome {:?}",
        story_id,
        numeric.len(),
        special.len(),
        outcome
    );

    Ok(RoundResult {
        story_id,
        numeric,
        special,
        stats,
        outcome,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
