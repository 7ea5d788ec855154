use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an archive record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArchiveStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl ArchiveStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// Parse a stored or user-supplied status. Matching is case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "DONE" => Some(Self::Done),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capture kind, which decides the capture strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Page,
    Video,
}

impl ArchiveKind {
    pub const ALL: [Self; 2] = [Self::Page, Self::Video];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Video => "video",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "page" => Some(Self::Page),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loosely-typed scalar stored in capture metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Structured facts produced by a capture strategy, keyed and ordered by name.
pub type Metadata = BTreeMap<String, MetaValue>;

/// One submitted URL and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArchiveRecord {
    pub id: String,
    pub url: String,
    pub kind: String,
    pub title: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub out_dir: String,
    pub primary_path: Option<String>,
    pub text_path: Option<String>,
    pub meta_json: Option<String>,
}

impl ArchiveRecord {
    #[must_use]
    pub fn status_enum(&self) -> Option<ArchiveStatus> {
        ArchiveStatus::parse(&self.status)
    }

    #[must_use]
    pub fn kind_enum(&self) -> Option<ArchiveKind> {
        ArchiveKind::parse(&self.kind)
    }

    /// Parsed metadata, or `None` when absent or not valid JSON.
    #[must_use]
    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.meta_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Partial update applied to an archive record.
///
/// `None` leaves a column untouched; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct ArchiveUpdate {
    pub status: Option<ArchiveStatus>,
    pub error: Option<Option<String>>,
    pub title: Option<Option<String>>,
    pub primary_path: Option<Option<String>>,
    pub text_path: Option<Option<String>>,
    pub meta_json: Option<Option<String>>,
}

impl ArchiveUpdate {
    /// Entry into a run: RUNNING with the previous error cleared.
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: Some(ArchiveStatus::Running),
            error: Some(None),
            ..Self::default()
        }
    }

    /// Failed run: only status and message change, prior results stay.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(ArchiveStatus::Error),
            error: Some(Some(message.into())),
            ..Self::default()
        }
    }
}

/// Successful capture results written together with the search index entry.
#[derive(Debug, Clone)]
pub struct CompletedCapture {
    pub title: Option<String>,
    pub primary_path: String,
    pub text_path: Option<String>,
    pub meta_json: Option<String>,
    /// Free text indexed for search.
    pub content: Option<String>,
}

/// Filter for listing and searching archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveFilter {
    pub status: Option<ArchiveStatus>,
    pub query: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// A row of the search index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SearchIndexEntry {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// A task stored in the durable capture queue.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CaptureJob {
    pub id: i64,
    pub archive_id: String,
    pub url: String,
    pub kind: String,
    pub state: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub enqueued_at: String,
    pub claimed_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Queue depth by job state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub claimed: i64,
    pub done: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            ArchiveStatus::Queued,
            ArchiveStatus::Running,
            ArchiveStatus::Done,
            ArchiveStatus::Error,
        ] {
            assert_eq!(ArchiveStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ArchiveStatus::parse("done"), Some(ArchiveStatus::Done));
        assert_eq!(ArchiveStatus::parse("finished"), None);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(ArchiveKind::parse("page"), Some(ArchiveKind::Page));
        assert_eq!(ArchiveKind::parse("VIDEO"), Some(ArchiveKind::Video));
        assert_eq!(ArchiveKind::parse("audio"), None);
        assert_eq!(ArchiveKind::parse(""), None);
    }

    #[test]
    fn test_metadata_serializes_scalars() {
        let mut meta = Metadata::new();
        meta.insert("uploader".to_string(), "someone".into());
        meta.insert("duration".to_string(), MetaValue::Float(12.5));
        meta.insert("views".to_string(), 42_i64.into());
        meta.insert("upload_date".to_string(), MetaValue::from(None::<String>));

        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(
            json,
            r#"{"duration":12.5,"upload_date":null,"uploader":"someone","views":42}"#
        );
    }

    #[test]
    fn test_record_metadata_tolerates_garbage() {
        let mut record = ArchiveRecord {
            id: "a".to_string(),
            url: "https://example.com".to_string(),
            kind: "page".to_string(),
            title: None,
            status: "DONE".to_string(),
            error: None,
            created_at: String::new(),
            updated_at: String::new(),
            out_dir: "/tmp/a".to_string(),
            primary_path: None,
            text_path: None,
            meta_json: Some("{not json".to_string()),
        };
        assert!(record.metadata().is_none());

        record.meta_json = Some(r#"{"title":"x"}"#.to_string());
        assert_eq!(record.metadata().unwrap()["title"], "x");
    }
}
