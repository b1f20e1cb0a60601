// Typed records for sessions, participants, stories, and estimates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deck::Points;

pub type SessionId = i64;
pub type ParticipantId = i64;
pub type StoryId = i64;
pub type EstimateId = i64;

/// Raised when a stored or user-supplied string does not name a known
/// enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `ALL`, `FromStr`, and `Display` for a string-backed
/// enum whose variants map one-to-one to stored labels.
macro_rules! labelled_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

labelled_enum!(SessionStatus, "session status", {
    Active => "active",
    Closed => "closed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Developer,
    #[serde(rename = "Senior Developer")]
    SeniorDeveloper,
    #[serde(rename = "Tech Lead")]
    TechLead,
    #[serde(rename = "Product Owner")]
    ProductOwner,
    #[serde(rename = "Scrum Master")]
    ScrumMaster,
    #[serde(rename = "QA")]
    Qa,
    Designer,
}

labelled_enum!(Role, "role", {
    Developer => "Developer",
    SeniorDeveloper => "Senior Developer",
    TechLead => "Tech Lead",
    ProductOwner => "Product Owner",
    ScrumMaster => "Scrum Master",
    Qa => "QA",
    Designer => "Designer",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

labelled_enum!(Priority, "priority", {
    Low => "Low",
    Medium => "Medium",
    High => "High",
    Critical => "Critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Pending,
    Estimated,
}

labelled_enum!(StoryStatus, "story status", {
    Pending => "pending",
    Estimated => "estimated",
});

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub facilitator: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub name: String,
    pub role: Role,
    pub email: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub session_id: SessionId,
    /// External work-item code, e.g. `US-001`.
    pub code: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub priority: Priority,
    pub status: StoryStatus,
    /// Set only while `status` is `Estimated`.
    pub final_estimate: Option<Points>,
    pub created_at: DateTime<Utc>,
    pub last_estimated_at: Option<DateTime<Utc>>,
}

impl Story {
    pub fn is_pending(&self) -> bool {
        self.status == StoryStatus::Pending
    }
}

/// One participant's submission in one round. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: EstimateId,
    pub session_id: SessionId,
    pub story_id: StoryId,
    pub participant_id: ParticipantId,
    /// Card label as submitted (`"5"`, `"0.5"`, `"?"`, `"∞"`).
    pub value: String,
    /// 1-based round counter, scoped to the story.
    pub round: u32,
    pub estimated_at: DateTime<Utc>,
}

impl Estimate {
    /// The numeric value when the label parses as a finite number.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

// ---------------------------------------------------------------------------
// Insert payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub name: String,
    pub facilitator: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewParticipant {
    pub session_id: SessionId,
    pub name: String,
    pub role: Role,
    pub email: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStory {
    pub session_id: SessionId,
    pub code: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEstimate {
    pub session_id: SessionId,
    pub story_id: StoryId,
    pub participant_id: ParticipantId,
    pub value: String,
    pub round: u32,
    pub estimated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
