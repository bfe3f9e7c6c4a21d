use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identity of the person taking the audit (their Telegram user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportSource {
    Generated,
    Fallback { reason: String },
}

/// What the synthesizer hands back: never empty, always scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBody {
    pub text: String,
    pub score: u8,
    pub source: ReportSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub subject_id: SubjectId,
    pub user_name: String,
    pub body_text: String,
    pub computed_score: u8,
    pub source: ReportSource,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(subject_id: SubjectId, user_name: impl Into<String>, body: ReportBody) -> Report {
        Report {
            subject_id,
            user_name: user_name.into(),
            body_text: body.text,
            computed_score: body.score,
            source: body.source,
            generated_at: Utc::now(),
        }
    }
}
