use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("timestamp out of range: {0}")]
    Range(#[from] time::error::ComponentRange),
    #[error("failed to format timestamp: {0}")]
    Format(#[from] time::error::Format),
    #[error("failed to parse timestamp: {0}")]
    Parse(#[from] time::error::Parse),
}

/// One catalog entry. At most one record exists per `(owner_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRecord {
    /// Catalog-assigned id. Empty on optimistic snapshots of a create that
    /// the server has not answered yet.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub extension: String,
    pub content_ref: String,
    pub owner_id: String,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    /// Absent on records written by clients that never stamp one.
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub modified_by: Option<String>,
}

impl FileRecord {
    /// `Ok(None)` when the record carries no modification time.
    pub fn modified_at_millis(&self) -> Result<Option<i64>, TimestampError> {
        self.modified_at.as_deref().map(parse_millis).transpose()
    }

    pub fn uploaded_at_millis(&self) -> Result<i64, TimestampError> {
        parse_millis(&self.uploaded_at)
    }

    pub(crate) fn with_update(&self, update: &RecordUpdate) -> Self {
        Self {
            content_ref: update.content_ref.clone(),
            modified_at: Some(update.modified_at.clone()),
            modified_by: update.modified_by.clone(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewFileRecord {
    pub name: String,
    pub extension: String,
    pub content_ref: String,
    pub owner_id: String,
    pub uploaded_at: String,
    pub uploaded_by: Option<String>,
    pub modified_at: String,
    pub modified_by: Option<String>,
}

impl NewFileRecord {
    pub(crate) fn pending_snapshot(&self) -> FileRecord {
        FileRecord {
            id: String::new(),
            name: self.name.clone(),
            extension: self.extension.clone(),
            content_ref: self.content_ref.clone(),
            owner_id: self.owner_id.clone(),
            uploaded_at: self.uploaded_at.clone(),
            uploaded_by: self.uploaded_by.clone(),
            modified_at: Some(self.modified_at.clone()),
            modified_by: self.modified_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordUpdate {
    pub content_ref: String,
    pub modified_at: String,
    pub modified_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecordChange {
    pub kind: ChangeKind,
    pub record: FileRecord,
}

/// A group of catalog changes delivered together. `has_pending_writes` is set
/// on batches produced by this client's own writes before the server has
/// acknowledged them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub has_pending_writes: bool,
    pub changes: Vec<RecordChange>,
}

impl ChangeBatch {
    pub(crate) fn pending(kind: ChangeKind, record: FileRecord) -> Self {
        Self {
            has_pending_writes: true,
            changes: vec![RecordChange { kind, record }],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangePage {
    pub cursor: String,
    #[serde(default)]
    pub changes: Vec<RecordChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Account {
    pub owner_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlobRef {
    pub content_ref: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct RecordList {
    #[serde(default)]
    pub items: Vec<FileRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Lower-cased suffix after the last `.`, or an empty string.
pub fn extension_of(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

pub fn format_millis(millis: i64) -> Result<String, TimestampError> {
    let at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)?;
    Ok(at.format(&Rfc3339)?)
}

pub fn parse_millis(value: &str) -> Result<i64, TimestampError> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)?;
    Ok(parsed.unix_timestamp_nanos().div_euclid(1_000_000) as i64)
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
