// CSV export of one session's records and headline metrics.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::Writer;
use poker_core::aggregate;
use poker_core::model::{Participant, SessionId, Story};
use poker_core::RecordStore;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write CSV record: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Exported rows
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ParticipantRow<'a> {
    id: i64,
    name: &'a str,
    role: &'a str,
    email: Option<&'a str>,
    joined_at: String,
}

#[derive(Debug, Serialize)]
struct StoryRow<'a> {
    id: i64,
    code: &'a str,
    title: &'a str,
    description: &'a str,
    acceptance_criteria: &'a str,
    priority: &'a str,
    status: &'a str,
    final_estimate: Option<String>,
    created_at: String,
    last_estimated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct EstimateRow<'a> {
    story_code: &'a str,
    story_title: &'a str,
    participant: &'a str,
    role: &'a str,
    round: u32,
    value: &'a str,
    estimated_at: String,
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    metric: &'static str,
    value: String,
}

/// A serializable row with a fixed header, matching its field order.
trait CsvRow: Serialize {
    const HEADER: &'static [&'static str];
}

impl CsvRow for ParticipantRow<'_> {
    const HEADER: &'static [&'static str] = &["id", "name", "role", "email", "joined_at"];
}

impl CsvRow for StoryRow<'_> {
    const HEADER: &'static [&'static str] = &[
        "id",
        "code",
        "title",
        "description",
        "acceptance_criteria",
        "priority",
        "status",
        "final_estimate",
        "created_at",
        "last_estimated_at",
    ];
}

impl CsvRow for EstimateRow<'_> {
    const HEADER: &'static [&'static str] = &[
        "story_code",
        "story_title",
        "participant",
        "role",
        "round",
        "value",
        "estimated_at",
    ];
}

impl CsvRow for SummaryRow {
    const HEADER: &'static [&'static str] = &["metric", "value"];
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Write `participants.csv`, `stories.csv`, `estimates.csv`, and
/// `summary.csv` for a session into `dir`, creating it if needed. Existing
/// files are overwritten. Returns the written paths.
pub fn export_session<S: RecordStore>(
    store: &S,
    session_id: SessionId,
    dir: &Path,
) -> Result<Vec<PathBuf>, ExportError> {
    if store.session(session_id)?.is_none() {
        return Err(ExportError::SessionNotFound(session_id));
    }
    let participants = store.participants(session_id)?;
    let stories = store.stories(session_id)?;
    let estimates = store.estimates(session_id)?;

    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let participant_rows = participants.iter().map(|p| ParticipantRow {
        id: p.id,
        name: &p.name,
        role: p.role.as_str(),
        email: p.email.as_deref(),
        joined_at: p.joined_at.to_rfc3339(),
    });

    let story_rows = stories.iter().map(|s| StoryRow {
        id: s.id,
        code: &s.code,
        title: &s.title,
        description: &s.description,
        acceptance_criteria: &s.acceptance_criteria,
        priority: s.priority.as_str(),
        status: s.status.as_str(),
        final_estimate: s.final_estimate.map(|v| v.to_string()),
        created_at: s.created_at.to_rfc3339(),
        last_estimated_at: s.last_estimated_at.map(|t| t.to_rfc3339()),
    });

    let by_participant: HashMap<_, &Participant> = participants.iter().map(|p| (p.id, p)).collect();
    let by_story: HashMap<_, &Story> = stories.iter().map(|s| (s.id, s)).collect();
    let estimate_rows = estimates.iter().filter_map(|e| {
        let story = by_story.get(&e.story_id)?;
        let participant = by_participant.get(&e.participant_id)?;
        Some(EstimateRow {
            story_code: &story.code,
            story_title: &story.title,
            participant: &participant.name,
            role: participant.role.as_str(),
            round: e.round,
            value: &e.value,
            estimated_at: e.estimated_at.to_rfc3339(),
        })
    });

    let story_summary = aggregate::story_summary(&stories);
    let summary_rows = [
        ("participants", participants.len().to_string()),
        ("stories", story_summary.total.to_string()),
        ("estimated stories", story_summary.estimated.to_string()),
        ("estimates", estimates.len().to_string()),
        ("story points", story_summary.total_points.to_string()),
    ]
    .into_iter()
    .map(|(metric, value)| SummaryRow { metric, value });

    let written = vec![
        write_csv(&dir.join("participants.csv"), participant_rows)?,
        write_csv(&dir.join("stories.csv"), story_rows)?,
        write_csv(&dir.join("estimates.csv"), estimate_rows)?,
        write_csv(&dir.join("summary.csv"), summary_rows)?,
    ];

    info!(
        "Exported session {} to {} ({} estimates)",
        session_id,
        dir.display(),
        estimates.len()
    );
    Ok(written)
}

/// Serialize `rows` to `path`. The header row is written even when there
/// are no rows.
fn write_csv<T: CsvRow>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
) -> Result<PathBuf, ExportError> {
    let file = File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = Writer::from_writer(file);

    let mut rows = rows.into_iter().peekable();
    if rows.peek().is_none() {
        writer.write_record(T::HEADER)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush().map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::facilitator::Facilitator;
    use poker_core::model::{Priority, Role};
    use std::collections::BTreeMap;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn writes_four_files_with_headers() {
        let f = Facilitator::new(Database::open(":memory:").unwrap());
        let session = f.create_session("Sprint 3", "Carla").unwrap();
        f.add_participant(session.id, "Ana", Role::Developer, Some("ana@example.com"))
            .unwrap();
        f.add_participant(session.id, "Bo", Role::Qa, None).unwrap();
        let story = f
            .add_story(session.id, "US-001", "Login, with SSO", "", "", Priority::High)
            .unwrap();
        f.add_story(session.id, "US-002", "Logout", "", "", Priority::Low)
            .unwrap();

        let cards: BTreeMap<String, String> = [("Ana", "0.5"), ("Bo", "0.5")]
            .iter()
            .map(|(n, c)| (n.to_string(), c.to_string()))
            .collect();
        f.submit_round(session.id, story.id, &cards).unwrap();

        let dir = temp_dir("poker_export_full");
        let written = export_session(f.store(), session.id, &dir).unwrap();
        assert_eq!(written.len(), 4);

        let participants = lines(&dir.join("participants.csv"));
        assert_eq!(participants[0], "id,name,role,email,joined_at");
        assert_eq!(participants.len(), 3);

        let stories = lines(&dir.join("stories.csv"));
        assert_eq!(stories.len(), 3);
        assert!(stories[1].contains("\"Login, with SSO\""));
        assert!(stories[1].contains(",estimated,0.5,"));

        let estimates = lines(&dir.join("estimates.csv"));
        assert_eq!(
            estimates[0],
            "story_code,story_title,participant,role,round,value,estimated_at"
        );
        assert_eq!(estimates.len(), 3);
        assert!(estimates[1].starts_with("US-001,\"Login, with SSO\",Ana,Developer,1,0.5,"));

        let summary = lines(&dir.join("summary.csv"));
        assert_eq!(
            summary,
            vec![
                "metric,value",
                "participants,2",
                "stories,2",
                "estimated stories,1",
                "estimates,2",
                "story points,0.5",
            ]
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_session_still_gets_headers() {
        let db = Database::open(":memory:").unwrap();
        let f = Facilitator::new(db);
        let session = f.create_session("Empty", "Carla").unwrap();

        let dir = temp_dir("poker_export_empty");
        export_session(f.store(), session.id, &dir).unwrap();

        assert_eq!(
            lines(&dir.join("estimates.csv")),
            vec!["story_code,story_title,participant,role,round,value,estimated_at"]
        );
        assert_eq!(lines(&dir.join("participants.csv")).len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_session_is_an_error() {
        let db = Database::open(":memory:").unwrap();
        let dir = temp_dir("poker_export_missing");
        assert!(matches!(
            export_session(&db, 7, &dir).unwrap_err(),
            ExportError::SessionNotFound(7)
        ));
        assert!(!dir.exists());
    }
}
