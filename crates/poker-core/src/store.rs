// Record store contract: the only way the estimation workflow reaches
// persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::deck::Points;
use crate::model::{
    Estimate, EstimateId, NewEstimate, NewParticipant, NewSession, NewStory, Participant,
    ParticipantId, Session, SessionId, SessionStatus, Story, StoryId,
};

/// Keyed storage for the four record kinds.
///
/// Implementations serialize writes per record but are not required to offer
/// transactions spanning several calls. Errors are surfaced as-is; retry
/// policy, if any, belongs to the implementation.
pub trait RecordStore {
    // -- inserts --

    fn insert_session(&self, session: &NewSession) -> Result<SessionId>;
    fn insert_participant(&self, participant: &NewParticipant) -> Result<ParticipantId>;
    fn insert_story(&self, story: &NewStory) -> Result<StoryId>;
    /// Insert a batch of estimates, returning their ids in input order.
    fn insert_estimates(&self, estimates: &[NewEstimate]) -> Result<Vec<EstimateId>>;

    // -- queries --

    /// All sessions, newest first.
    fn sessions(&self) -> Result<Vec<Session>>;
    fn session(&self, id: SessionId) -> Result<Option<Session>>;
    /// Participants of a session in join order.
    fn participants(&self, session_id: SessionId) -> Result<Vec<Participant>>;
    /// Stories of a session in creation order.
    fn stories(&self, session_id: SessionId) -> Result<Vec<Story>>;
    fn story(&self, id: StoryId) -> Result<Option<Story>>;
    /// Full estimate history of a session in insertion order.
    fn estimates(&self, session_id: SessionId) -> Result<Vec<Estimate>>;
    /// Full estimate history of a story in insertion order.
    fn story_estimates(&self, story_id: StoryId) -> Result<Vec<Estimate>>;

    // -- updates --

    fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()>;
    /// Set status `estimated`, the final value, and the estimation timestamp.
    fn mark_story_estimated(&self, id: StoryId, value: Points, at: DateTime<Utc>) -> Result<()>;
    /// Return a story to `pending` and clear its final value.
    fn reset_story(&self, id: StoryId) -> Result<()>;
}
