// SQLite persistence layer for sessions, participants, stories, and estimates.

use std::error::Error as StdError;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use poker_core::model::{
    Estimate, EstimateId, NewEstimate, NewParticipant, NewSession, NewStory, Participant,
    ParticipantId, Session, SessionId, SessionStatus, Story, StoryId, StoryStatus,
};
use poker_core::{Points, RecordStore};

/// SQLite-backed record store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                facilitator TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'active'
            );

            CREATE TABLE IF NOT EXISTS participants (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id),
                name       TEXT NOT NULL,
                role       TEXT NOT NULL,
                email      TEXT,
                joined_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stories (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id          INTEGER NOT NULL REFERENCES sessions(id),
                code                TEXT NOT NULL,
                title               TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                acceptance_criteria TEXT NOT NULL DEFAULT '',
                priority            TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'pending',
                final_estimate      REAL,
                created_at          TEXT NOT NULL,
                last_estimated_at   TEXT
            );

            CREATE TABLE IF NOT EXISTS estimates (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id     INTEGER NOT NULL REFERENCES sessions(id),
                story_id       INTEGER NOT NULL REFERENCES stories(id),
                participant_id INTEGER NOT NULL REFERENCES participants(id),
                value          TEXT NOT NULL,
                round          INTEGER NOT NULL,
                estimated_at   TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_participants_session ON participants(session_id);
             CREATE INDEX IF NOT EXISTS idx_stories_session ON stories(session_id);
             CREATE INDEX IF NOT EXISTS idx_estimates_session ON estimates(session_id);
             CREATE INDEX IF NOT EXISTS idx_estimates_story ON estimates(story_id, round);",
        )
        .context("failed to create indexes")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

/// Read a text column and parse it into one of the model enums.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn points_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Points>> {
    let value: Option<f64> = row.get(idx)?;
    value
        .map(|v| {
            Points::from_f64(v)
                .ok_or_else(|| conversion_error(idx, format!("{v} is not a half-point value")))
        })
        .transpose()
}

const SESSION_COLUMNS: &str = "id, name, facilitator, created_at, status";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        facilitator: row.get(2)?,
        created_at: row.get(3)?,
        status: parse_column(row, 4)?,
    })
}

const PARTICIPANT_COLUMNS: &str = "id, session_id, name, role, email, joined_at";

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        role: parse_column(row, 3)?,
        email: row.get(4)?,
        joined_at: row.get(5)?,
    })
}

const STORY_COLUMNS: &str = "id, session_id, code, title, description, acceptance_criteria, \
     priority, status, final_estimate, created_at, last_estimated_at";

fn story_from_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    Ok(Story {
        id: row.get(0)?,
        session_id: row.get(1)?,
        code: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        acceptance_criteria: row.get(5)?,
        priority: parse_column(row, 6)?,
        status: parse_column(row, 7)?,
        final_estimate: points_column(row, 8)?,
        created_at: row.get(9)?,
        last_estimated_at: row.get(10)?,
    })
}

const ESTIMATE_COLUMNS: &str =
    "id, session_id, story_id, participant_id, value, round, estimated_at";

fn estimate_from_row(row: &Row<'_>) -> rusqlite::Result<Estimate> {
    Ok(Estimate {
        id: row.get(0)?,
        session_id: row.get(1)?,
        story_id: row.get(2)?,
        participant_id: row.get(3)?,
        value: row.get(4)?,
        round: row.get(5)?,
        estimated_at: row.get(6)?,
    })
}

/// Run a query and collect every mapped row.
fn query_all<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
    what: &str,
) -> Result<Vec<T>>
where
    P: rusqlite::Params,
{
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("failed to prepare {what} query"))?;
    let rows = stmt
        .query_map(params, map)
        .with_context(|| format!("failed to query {what}"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("failed to map {what} rows"))?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

impl RecordStore for Database {
    fn insert_session(&self, session: &NewSession) -> Result<SessionId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (name, facilitator, created_at, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.name,
                session.facilitator,
                session.created_at,
                SessionStatus::Active.as_str(),
            ],
        )
        .context("failed to insert session")?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_participant(&self, participant: &NewParticipant) -> Result<ParticipantId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO participants (session_id, name, role, email, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                participant.session_id,
                participant.name,
                participant.role.as_str(),
                participant.email,
                participant.joined_at,
            ],
        )
        .context("failed to insert participant")?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_story(&self, story: &NewStory) -> Result<StoryId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO stories
                (session_id, code, title, description, acceptance_criteria, priority, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                story.session_id,
                story.code,
                story.title,
                story.description,
                story.acceptance_criteria,
                story.priority.as_str(),
                StoryStatus::Pending.as_str(),
                story.created_at,
            ],
        )
        .context("failed to insert story")?;
        Ok(conn.last_insert_rowid())
    }

    /// Inserts the whole batch in one transaction: either every row of the
    /// round lands or none does.
    fn insert_estimates(&self, estimates: &[NewEstimate]) -> Result<Vec<EstimateId>> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin estimate transaction")?;

        let mut ids = Vec::with_capacity(estimates.len());
        for estimate in estimates {
            tx.execute(
                "INSERT INTO estimates
                    (session_id, story_id, participant_id, value, round, estimated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    estimate.session_id,
                    estimate.story_id,
                    estimate.participant_id,
                    estimate.value,
                    estimate.round,
                    estimate.estimated_at,
                ],
            )
            .context("failed to insert estimate")?;
            ids.push(tx.last_insert_rowid());
        }

        tx.commit().context("failed to commit estimates")?;
        Ok(ids)
    }

    fn sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn();
        query_all(
            &conn,
            &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id DESC"),
            [],
            session_from_row,
            "sessions",
        )
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            session_from_row,
        )
        .optional()
        .context("failed to load session")
    }

    fn participants(&self, session_id: SessionId) -> Result<Vec<Participant>> {
        let conn = self.conn();
        query_all(
            &conn,
            &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE session_id = ?1 ORDER BY id"),
            params![session_id],
            participant_from_row,
            "participants",
        )
    }

    fn stories(&self, session_id: SessionId) -> Result<Vec<Story>> {
        let conn = self.conn();
        query_all(
            &conn,
            &format!("SELECT {STORY_COLUMNS} FROM stories WHERE session_id = ?1 ORDER BY id"),
            params![session_id],
            story_from_row,
            "stories",
        )
    }

    fn story(&self, id: StoryId) -> Result<Option<Story>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?1"),
            params![id],
            story_from_row,
        )
        .optional()
        .context("failed to load story")
    }

    fn estimates(&self, session_id: SessionId) -> Result<Vec<Estimate>> {
        let conn = self.conn();
        query_all(
            &conn,
            &format!("SELECT {ESTIMATE_COLUMNS} FROM estimates WHERE session_id = ?1 ORDER BY id"),
            params![session_id],
            estimate_from_row,
            "estimates",
        )
    }

    fn story_estimates(&self, story_id: StoryId) -> Result<Vec<Estimate>> {
        let conn = self.conn();
        query_all(
            &conn,
            &format!("SELECT {ESTIMATE_COLUMNS} FROM estimates WHERE story_id = ?1 ORDER BY id"),
            params![story_id],
            estimate_from_row,
            "story estimates",
        )
    }

    fn set_session_status(&self, id: SessionId, status: SessionStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE sessions SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )
        .context("failed to update session status")?;
        Ok(())
    }

    fn mark_story_estimated(&self, id: StoryId, value: Points, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE stories
             SET status = ?1, final_estimate = ?2, last_estimated_at = ?3
             WHERE id = ?4",
            params![StoryStatus::Estimated.as_str(), value.as_f64(), at, id],
        )
        .context("failed to mark story estimated")?;
        Ok(())
    }

    fn reset_story(&self, id: StoryId) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE stories SET status = ?1, final_estimate = NULL WHERE id = ?2",
            params![StoryStatus::Pending.as_str(), id],
        )
        .context("failed to reset story")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use poker_core::model::{Priority, Role};

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn seed_session(db: &Database) -> SessionId {
        db.insert_session(&NewSession {
            name: "Sprint 42".into(),
            facilitator: "Dana".into(),
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn seed_participant(db: &Database, session_id: SessionId, name: &str) -> ParticipantId {
        db.insert_participant(&NewParticipant {
            session_id,
            name: name.into(),
            role: Role::Developer,
            email: None,
            joined_at: Utc::now(),
        })
        .unwrap()
    }

    fn seed_story(db: &Database, session_id: SessionId, code: &str) -> StoryId {
        db.insert_story(&NewStory {
            session_id,
            code: code.into(),
            title: format!("Story {code}"),
            description: "As a user...".into(),
            acceptance_criteria: "Given...".into(),
            priority: Priority::High,
            created_at: Utc::now(),
        })
        .unwrap()
    }

    fn new_estimate(
        session_id: SessionId,
        story_id: StoryId,
        participant_id: ParticipantId,
        value: &str,
        round: u32,
    ) -> NewEstimate {
        NewEstimate {
            session_id,
            story_id,
            participant_id,
            value: value.into(),
            round,
            estimated_at: Utc::now(),
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["sessions", "participants", "stories", "estimates"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    #[test]
    fn insert_and_load_session() {
        let db = test_db();
        let id = seed_session(&db);

        let session = db.session(id).unwrap().expect("session should exist");
        assert_eq!(session.name, "Sprint 42");
        assert_eq!(session.facilitator, "Dana");
        assert_eq!(session.status, SessionStatus::Active);

        assert!(db.session(id + 100).unwrap().is_none());
    }

    #[test]
    fn sessions_are_newest_first() {
        let db = test_db();
        let older = db
            .insert_session(&NewSession {
                name: "Old".into(),
                facilitator: "Dana".into(),
                created_at: Utc::now() - chrono::Duration::days(1),
            })
            .unwrap();
        let newer = seed_session(&db);

        let ids: Vec<SessionId> = db.sessions().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer, older]);
    }

    #[test]
    fn set_session_status_persists() {
        let db = test_db();
        let id = seed_session(&db);
        db.set_session_status(id, SessionStatus::Closed).unwrap();
        assert_eq!(db.session(id).unwrap().unwrap().status, SessionStatus::Closed);
    }

    // ------------------------------------------------------------------
    // Participants / stories
    // ------------------------------------------------------------------

    #[test]
    fn participants_scoped_to_session() {
        let db = test_db();
        let a = seed_session(&db);
        let b = seed_session(&db);
        seed_participant(&db, a, "Ana");
        seed_participant(&db, a, "Bo");
        seed_participant(&db, b, "Cy");

        let names: Vec<String> = db.participants(a).unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ana", "Bo"]);
        assert_eq!(db.participants(b).unwrap().len(), 1);
    }

    #[test]
    fn participant_email_round_trip() {
        let db = test_db();
        let session = seed_session(&db);
        db.insert_participant(&NewParticipant {
            session_id: session,
            name: "Eve".into(),
            role: Role::ProductOwner,
            email: Some("eve@example.com".into()),
            joined_at: Utc::now(),
        })
        .unwrap();

        let participant = &db.participants(session).unwrap()[0];
        assert_eq!(participant.role, Role::ProductOwner);
        assert_eq!(participant.email.as_deref(), Some("eve@example.com"));
    }

    #[test]
    fn new_story_is_pending() {
        let db = test_db();
        let session = seed_session(&db);
        let id = seed_story(&db, session, "US-001");

        let story = db.story(id).unwrap().unwrap();
        assert_eq!(story.code, "US-001");
        assert_eq!(story.priority, Priority::High);
        assert_eq!(story.status, StoryStatus::Pending);
        assert!(story.final_estimate.is_none());
        assert!(story.last_estimated_at.is_none());
    }

    #[test]
    fn mark_estimated_then_reset() {
        let db = test_db();
        let session = seed_session(&db);
        let id = seed_story(&db, session, "US-001");

        db.mark_story_estimated(id, Points::from_halves(1), Utc::now())
            .unwrap();
        let story = db.story(id).unwrap().unwrap();
        assert_eq!(story.status, StoryStatus::Estimated);
        assert_eq!(story.final_estimate, Some(Points::from_halves(1)));
        assert!(story.last_estimated_at.is_some());

        db.reset_story(id).unwrap();
        let story = db.story(id).unwrap().unwrap();
        assert_eq!(story.status, StoryStatus::Pending);
        assert!(story.final_estimate.is_none());
        // The timestamp of the last estimation is history, not state.
        assert!(story.last_estimated_at.is_some());
    }

    #[test]
    fn unknown_enum_in_storage_is_an_error() {
        let db = test_db();
        let session = seed_session(&db);
        let id = seed_story(&db, session, "US-001");
        db.conn()
            .execute("UPDATE stories SET priority = 'Urgent' WHERE id = ?1", params![id])
            .unwrap();

        assert!(db.story(id).is_err());
    }

    // ------------------------------------------------------------------
    // Estimates
    // ------------------------------------------------------------------

    #[test]
    fn estimates_accumulate_across_rounds() {
        let db = test_db();
        let session = seed_session(&db);
        let story = seed_story(&db, session, "US-001");
        let ana = seed_participant(&db, session, "Ana");
        let bo = seed_participant(&db, session, "Bo");

        let first = db
            .insert_estimates(&[
                new_estimate(session, story, ana, "3", 1),
                new_estimate(session, story, bo, "?", 1),
            ])
            .unwrap();
        assert_eq!(first.len(), 2);

        db.insert_estimates(&[
            new_estimate(session, story, ana, "5", 2),
            new_estimate(session, story, bo, "5", 2),
        ])
        .unwrap();

        let history = db.story_estimates(story).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(
            history.iter().map(|e| e.round).collect::<Vec<_>>(),
            vec![1, 1, 2, 2]
        );
        assert_eq!(history[1].value, "?");
        assert_eq!(db.estimates(session).unwrap().len(), 4);
    }

    #[test]
    fn estimate_batch_is_all_or_nothing() {
        let db = test_db();
        let session = seed_session(&db);
        let story = seed_story(&db, session, "US-001");
        let ana = seed_participant(&db, session, "Ana");

        // The second row references a participant that does not exist.
        let result = db.insert_estimates(&[
            new_estimate(session, story, ana, "3", 1),
            new_estimate(session, story, 9999, "5", 1),
        ]);
        assert!(result.is_err());
        assert!(db.story_estimates(story).unwrap().is_empty());
    }

    #[test]
    fn foreign_keys_enforced() {
        let db = test_db();
        let result = db.insert_story(&NewStory {
            session_id: 9999,
            code: "US-404".into(),
            title: "Orphan".into(),
            description: String::new(),
            acceptance_criteria: String::new(),
            priority: Priority::Low,
            created_at: Utc::now(),
        });
        assert!(result.is_err());
    }
}
