// Facilitator workflow: sessions, participants, stories, and estimation
// rounds on top of a record store.
//
// Every operation takes the session id explicitly. Rounds are validated
// against the store before evaluation, so a rejected round never writes
// anything.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::Utc;
use poker_core::aggregate::{
    self, EstimateSummary, ParticipantSummary, StorySummary,
};
use poker_core::model::{
    NewEstimate, NewParticipant, NewSession, NewStory, Participant, Priority, Role, Session,
    SessionId, SessionStatus, Story, StoryId, StoryStatus,
};
use poker_core::{evaluate, RecordStore, RoundError, RoundResult};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FacilitatorError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("story {story} not found in session {session}")]
    StoryNotFound { session: SessionId, story: StoryId },

    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    #[error("story {code} is already estimated; reopen it before estimating again")]
    StoryAlreadyEstimated { code: String },

    #[error("`{name}` is not a participant of session {session}")]
    UnknownParticipant { session: SessionId, name: String },

    #[error(transparent)]
    Round(#[from] RoundError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FacilitatorError>;

/// Outcome of a submitted round, with the round number it was recorded as.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedRound {
    pub round: u32,
    pub result: RoundResult,
}

/// Drives the estimation workflow against a [`RecordStore`].
pub struct Facilitator<S> {
    store: S,
}

impl<S: RecordStore> Facilitator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    pub fn create_session(&self, name: &str, facilitator: &str) -> Result<Session> {
        let name = required("session name", name)?;
        let facilitator = required("facilitator", facilitator)?;

        let new = NewSession {
            name,
            facilitator,
            created_at: Utc::now(),
        };
        let id = self.store.insert_session(&new)?;
        info!("Created session {}: {}", id, new.name);

        Ok(Session {
            id,
            name: new.name,
            facilitator: new.facilitator,
            created_at: new.created_at,
            status: SessionStatus::Active,
        })
    }

    /// Close a session. Closing an already closed session does nothing.
    pub fn close_session(&self, session_id: SessionId) -> Result<()> {
        let session = self.session(session_id)?;
        if session.status == SessionStatus::Closed {
            return Ok(());
        }
        self.store
            .set_session_status(session_id, SessionStatus::Closed)?;
        info!("Closed session {}", session_id);
        Ok(())
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self.store.sessions()?)
    }

    pub fn session(&self, session_id: SessionId) -> Result<Session> {
        self.store
            .session(session_id)?
            .ok_or(FacilitatorError::SessionNotFound(session_id))
    }

    // -----------------------------------------------------------------
    // Participants and stories
    // -----------------------------------------------------------------

    pub fn add_participant(
        &self,
        session_id: SessionId,
        name: &str,
        role: Role,
        email: Option<&str>,
    ) -> Result<Participant> {
        self.active_session(session_id)?;
        let name = required("participant name", name)?;

        let existing = self.store.participants(session_id)?;
        if existing.iter().any(|p| p.name == name) {
            return Err(FacilitatorError::Validation {
                field: "participant name",
                message: format!("`{name}` already joined this session"),
            });
        }

        let new = NewParticipant {
            session_id,
            name,
            role,
            email: email
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            joined_at: Utc::now(),
        };
        let id = self.store.insert_participant(&new)?;
        info!("Participant {} joined session {} as {}", new.name, session_id, role);

        Ok(Participant {
            id,
            session_id,
            name: new.name,
            role: new.role,
            email: new.email,
            joined_at: new.joined_at,
        })
    }

    pub fn add_story(
        &self,
        session_id: SessionId,
        code: &str,
        title: &str,
        description: &str,
        acceptance_criteria: &str,
        priority: Priority,
    ) -> Result<Story> {
        self.active_session(session_id)?;

        let new = NewStory {
            session_id,
            code: required("story code", code)?,
            title: required("story title", title)?,
            description: description.trim().to_string(),
            acceptance_criteria: acceptance_criteria.trim().to_string(),
            priority,
            created_at: Utc::now(),
        };
        let id = self.store.insert_story(&new)?;
        info!("Added story {} ({}) to session {}", new.code, priority, session_id);

        Ok(Story {
            id,
            session_id,
            code: new.code,
            title: new.title,
            description: new.description,
            acceptance_criteria: new.acceptance_criteria,
            priority: new.priority,
            status: StoryStatus::Pending,
            final_estimate: None,
            created_at: new.created_at,
            last_estimated_at: None,
        })
    }

    pub fn pending_stories(&self, session_id: SessionId) -> Result<Vec<Story>> {
        self.session(session_id)?;
        Ok(self
            .store
            .stories(session_id)?
            .into_iter()
            .filter(Story::is_pending)
            .collect())
    }

    // -----------------------------------------------------------------
    // Rounds
    // -----------------------------------------------------------------

    /// Submit one round of cards (participant name -> raw card) for a
    /// pending story.
    ///
    /// Every submission is recorded under the next round number whatever
    /// the outcome. The story is marked estimated only on consensus. The
    /// two writes are separate store calls, so a failure between them
    /// leaves the estimates recorded and the story pending.
    pub fn submit_round(
        &self,
        session_id: SessionId,
        story_id: StoryId,
        submissions: &BTreeMap<String, String>,
    ) -> Result<SubmittedRound> {
        self.active_session(session_id)?;
        let story = self.session_story(session_id, story_id)?;
        if !story.is_pending() {
            return Err(FacilitatorError::StoryAlreadyEstimated { code: story.code });
        }

        let submissions = normalize_submissions(submissions)?;
        let participants: HashMap<String, Participant> = self
            .store
            .participants(session_id)?
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        if let Some(name) = submissions
            .keys()
            .find(|name| !participants.contains_key(name.as_str()))
        {
            return Err(FacilitatorError::UnknownParticipant {
                session: session_id,
                name: name.clone(),
            });
        }

        let result = evaluate(story_id, &submissions).inspect_err(|e| {
            warn!("Round for story {} rejected: {}", story.code, e);
        })?;

        let round = self
            .store
            .story_estimates(story_id)?
            .iter()
            .map(|e| e.round)
            .max()
            .unwrap_or(0)
            + 1;

        // Cards are stored by their deck label, so "5.0" and "5" record alike.
        let now = Utc::now();
        let rows: Vec<NewEstimate> = result
            .submissions()
            .into_iter()
            .map(|(name, card)| NewEstimate {
                session_id,
                story_id,
                participant_id: participants[name].id,
                value: card.label(),
                round,
                estimated_at: now,
            })
            .collect();
        self.store.insert_estimates(&rows)?;

        if let Some(value) = result.consensus_value() {
            self.store.mark_story_estimated(story_id, value, now)?;
        }
        info!("Story {} round {}: {}", story.code, round, result.describe());

        Ok(SubmittedRound { round, result })
    }

    /// Return an estimated story to `pending`. Later rounds continue the
    /// story's round numbering. Reopening a pending story does nothing.
    pub fn reopen_story(&self, session_id: SessionId, story_id: StoryId) -> Result<()> {
        self.active_session(session_id)?;
        let story = self.session_story(session_id, story_id)?;
        if story.is_pending() {
            return Ok(());
        }
        self.store.reset_story(story_id)?;
        info!("Reopened story {} for re-estimation", story.code);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------

    pub fn report(&self, session_id: SessionId) -> Result<SessionReport> {
        let session = self.session(session_id)?;
        let stories = self.store.stories(session_id)?;
        let participants = self.store.participants(session_id)?;
        let estimates = self.store.estimates(session_id)?;

        let names: HashMap<_, _> = participants.iter().map(|p| (p.id, p.name.as_str())).collect();
        let averages = aggregate::per_participant_average(&estimates)
            .into_iter()
            .filter_map(|(id, avg)| names.get(&id).map(|name| (name.to_string(), avg)))
            .collect();

        Ok(SessionReport {
            story_summary: aggregate::story_summary(&stories),
            priorities: aggregate::priority_breakdown(&stories),
            participant_summary: aggregate::participant_summary(&participants),
            estimate_summary: aggregate::estimate_summary(&estimates),
            distribution: aggregate::estimate_distribution(&estimates),
            averages,
            session,
            stories,
        })
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    fn active_session(&self, session_id: SessionId) -> Result<Session> {
        let session = self.session(session_id)?;
        if session.status != SessionStatus::Active {
            return Err(FacilitatorError::SessionClosed(session_id));
        }
        Ok(session)
    }

    fn session_story(&self, session_id: SessionId, story_id: StoryId) -> Result<Story> {
        self.store
            .story(story_id)?
            .filter(|s| s.session_id == session_id)
            .ok_or(FacilitatorError::StoryNotFound {
                session: session_id,
                story: story_id,
            })
    }
}

/// Trim participant names. Two keys naming the same participant after
/// trimming reject the round.
fn normalize_submissions(
    submissions: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut normalized = BTreeMap::new();
    for (name, raw) in submissions {
        let name = name.trim();
        if normalized.insert(name.to_string(), raw.clone()).is_some() {
            return Err(FacilitatorError::Validation {
                field: "participant name",
                message: format!("`{name}` submitted more than one card"),
            });
        }
    }
    Ok(normalized)
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FacilitatorError::Validation {
            field,
            message: "must not be empty".into(),
        });
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Session report
// ---------------------------------------------------------------------------

/// All analytics for one session, with participant names resolved.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: Session,
    pub stories: Vec<Story>,
    pub story_summary: StorySummary,
    pub priorities: BTreeMap<Priority, usize>,
    pub participant_summary: ParticipantSummary,
    pub estimate_summary: EstimateSummary,
    pub distribution: Vec<(String, usize)>,
    /// Mean numeric estimate per participant name.
    pub averages: BTreeMap<String, f64>,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.session;
        writeln!(f, "Session {}: {} ({})", s.id, s.name, s.status)?;
        writeln!(
            f,
            "  Facilitator: {}, created {}",
            s.facilitator,
            s.created_at.format("%Y-%m-%d %H:%M")
        )?;

        let p = &self.participant_summary;
        writeln!(
            f,
            "  Participants: {} ({} roles, {} with email)",
            p.total, p.distinct_roles, p.with_email
        )?;
        for (role, count) in &p.by_role {
            writeln!(f, "    {role}: {count}")?;
        }

        let st = &self.story_summary;
        writeln!(
            f,
            "  Stories: {} total, {} estimated, {} pending, {} points",
            st.total, st.estimated, st.pending, st.total_points
        )?;
        for story in &self.stories {
            let value = story
                .final_estimate
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".into());
            writeln!(
                f,
                "    {} [{}] {} ({}): {}",
                story.code, story.priority, story.title, story.status, value
            )?;
        }
        let priorities: Vec<String> = self
            .priorities
            .iter()
            .map(|(priority, count)| format!("{priority} {count}"))
            .collect();
        writeln!(f, "  By priority: {}", priorities.join(", "))?;

        let e = &self.estimate_summary;
        writeln!(
            f,
            "  Estimates: {} ({} numeric) over {} stories by {} participants",
            e.count, e.numeric_count, e.distinct_stories, e.distinct_participants
        )?;
        match (e.mean, e.median) {
            (Some(mean), Some(median)) => {
                writeln!(f, "    mean {mean:.1}, median {median:.1}")?
            }
            _ => writeln!(f, "    no numeric estimates")?,
        }
        if !self.distribution.is_empty() {
            let cards: Vec<String> = self
                .distribution
                .iter()
                .map(|(card, count)| format!("{card} x{count}"))
                .collect();
            writeln!(f, "    cards: {}", cards.join(", "))?;
        }
        for (name, avg) in &self.averages {
            writeln!(f, "    {name}: average {avg:.1}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
