// Session aggregate: read-only analytics over stories, participants, and the
// accumulated estimate history.
//
// Every function here is total. An empty numeric subset yields `None`
// ("no data") rather than an error.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::deck::{classify, deck, Card, Points};
use crate::model::{Estimate, Participant, ParticipantId, Priority, Role, Story, StoryId};

// ---------------------------------------------------------------------------
// Stories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorySummary {
    pub total: usize,
    pub estimated: usize,
    pub pending: usize,
    /// Sum of final estimates over estimated stories.
    pub total_points: Points,
}

pub fn story_summary(stories: &[Story]) -> StorySummary {
    let estimated: Vec<&Story> = stories.iter().filter(|s| !s.is_pending()).collect();
    let total_points = estimated
        .iter()
        .map(|s| s.final_estimate.unwrap_or(Points::ZERO))
        .fold(Points::ZERO, Points::saturating_add);

    StorySummary {
        total: stories.len(),
        estimated: estimated.len(),
        pending: stories.len() - estimated.len(),
        total_points,
    }
}

/// Story count per priority, in priority order. Priorities with no stories
/// are included with a zero count.
pub fn priority_breakdown(stories: &[Story]) -> BTreeMap<Priority, usize> {
    let mut counts: BTreeMap<Priority, usize> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
    for story in stories {
        *counts.entry(story.priority).or_default() += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantSummary {
    pub total: usize,
    pub distinct_roles: usize,
    pub with_email: usize,
    pub by_role: BTreeMap<Role, usize>,
}

pub fn participant_summary(participants: &[Participant]) -> ParticipantSummary {
    let mut by_role: BTreeMap<Role, usize> = BTreeMap::new();
    for participant in participants {
        *by_role.entry(participant.role).or_default() += 1;
    }

    ParticipantSummary {
        total: participants.len(),
        distinct_roles: by_role.len(),
        with_email: participants
            .iter()
            .filter(|p| p.email.as_deref().is_some_and(|e| !e.trim().is_empty()))
            .count(),
        by_role,
    }
}

// ---------------------------------------------------------------------------
// Estimates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateSummary {
    /// All estimate rows, special tokens included.
    pub count: usize,
    /// Rows whose value parses as a number.
    pub numeric_count: usize,
    pub distinct_stories: usize,
    pub distinct_participants: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

pub fn estimate_summary(estimates: &[Estimate]) -> EstimateSummary {
    let values: Vec<f64> = estimates.iter().filter_map(Estimate::numeric_value).collect();

    EstimateSummary {
        count: estimates.len(),
        numeric_count: values.len(),
        distinct_stories: estimates
            .iter()
            .map(|e| e.story_id)
            .collect::<HashSet<_>>()
            .len(),
        distinct_participants: estimates
            .iter()
            .map(|e| e.participant_id)
            .collect::<HashSet<_>>()
            .len(),
        mean: mean(&values),
        median: median(&values),
    }
}

/// Mean numeric estimate per participant over the whole history, across all
/// rounds and stories. Participants who only ever played special cards are
/// left out.
pub fn per_participant_average(estimates: &[Estimate]) -> BTreeMap<ParticipantId, f64> {
    let mut grouped: BTreeMap<ParticipantId, Vec<f64>> = BTreeMap::new();
    for estimate in estimates {
        if let Some(value) = estimate.numeric_value() {
            grouped.entry(estimate.participant_id).or_default().push(value);
        }
    }

    grouped
        .into_iter()
        .filter_map(|(participant, values)| mean(&values).map(|m| (participant, m)))
        .collect()
}

/// Count of each card label across the history, in deck order. Cards that
/// were never played are omitted; values outside the deck are grouped under
/// their raw text after the deck cards.
pub fn estimate_distribution(estimates: &[Estimate]) -> Vec<(String, usize)> {
    let mut known: BTreeMap<usize, usize> = BTreeMap::new();
    let mut unknown: BTreeMap<String, usize> = BTreeMap::new();
    let order: Vec<Card> = deck();

    for estimate in estimates {
        let position = classify(&estimate.value)
            .ok()
            .and_then(|card| order.iter().position(|c| *c == card));
        match position {
            Some(idx) => *known.entry(idx).or_default() += 1,
            None => *unknown.entry(estimate.value.clone()).or_default() += 1,
        }
    }

    known
        .into_iter()
        .map(|(idx, count)| (order[idx].label(), count))
        .chain(unknown)
        .collect()
}

/// The estimates of the most recent round recorded for `story_id`.
pub fn latest_round(estimates: &[Estimate], story_id: StoryId) -> Vec<&Estimate> {
    let Some(round) = estimates
        .iter()
        .filter(|e| e.story_id == story_id)
        .map(|e| e.round)
        .max()
    else {
        return Vec::new();
    };

    estimates
        .iter()
        .filter(|e| e.story_id == story_id && e.round == round)
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
