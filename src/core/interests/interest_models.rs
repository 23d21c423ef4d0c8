// Interest domain models - the three interest kinds, their threads, and the
// row decoding that turns gateway rows back into typed values.
//
// These are pure domain types with no storage dependencies beyond the Row shape.

use super::interest_error::InterestError;
use crate::core::gateway::{parse_timestamp, Row};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which partition an interest lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestKind {
    CommunityProject,
    DevelopmentProject,
    MachineryRequest,
}

impl InterestKind {
    #[cfg(test)]
    pub const ALL: [InterestKind; 3] = [
        InterestKind::CommunityProject,
        InterestKind::DevelopmentProject,
        InterestKind::MachineryRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterestKind::CommunityProject => "community_project",
            InterestKind::DevelopmentProject => "development_project",
            InterestKind::MachineryRequest => "machinery_request",
        }
    }
}

impl fmt::Display for InterestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterestKind {
    type Err = InterestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "community_project" | "community" => Ok(InterestKind::CommunityProject),
            "development_project" | "development" => Ok(InterestKind::DevelopmentProject),
            "machinery_request" | "machinery" => Ok(InterestKind::MachineryRequest),
            _ => Err(InterestError::InvalidKind(s.to_string())),
        }
    }
}

/// Lifecycle of an interest. Forward progression is expected but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestStatus {
    New,
    Contacted,
    Resolved,
    Archived,
}

impl InterestStatus {
    /// Status every moderator reply moves the interest to.
    pub const ACKNOWLEDGED: InterestStatus = InterestStatus::Contacted;

    pub fn as_str(&self) -> &'static str {
        match self {
            InterestStatus::New => "new",
            InterestStatus::Contacted => "contacted",
            InterestStatus::Resolved => "resolved",
            InterestStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for InterestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterestStatus {
    type Err = InterestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(InterestStatus::New),
            "contacted" => Ok(InterestStatus::Contacted),
            "resolved" => Ok(InterestStatus::Resolved),
            "archived" => Ok(InterestStatus::Archived),
            other => Err(InterestError::InvalidInput(format!(
                "unknown interest status '{}'",
                other
            ))),
        }
    }
}

/// Who wrote a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Applicant,
    PlatformAdmin,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Applicant => "applicant",
            SenderRole::PlatformAdmin => "platform_admin",
        }
    }
}

impl FromStr for SenderRole {
    type Err = InterestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applicant" => Ok(SenderRole::Applicant),
            "platform_admin" => Ok(SenderRole::PlatformAdmin),
            other => Err(InterestError::IntegrityError(format!(
                "unknown sender role '{}'",
                other
            ))),
        }
    }
}

/// Identity of whoever is authoring a message. For moderators the caller has
/// already checked the moderation capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One message in an interest's private thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Option<String>,
    /// Name of the column that joins this message to its interest.
    pub parent_column: String,
    pub parent_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub sender_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_row(row: &Row, parent_column: &str) -> Result<Self, InterestError> {
        Ok(Self {
            id: optional_string(row, "id"),
            parent_column: parent_column.to_string(),
            parent_id: required_string(row, parent_column)?,
            sender_id: required_string(row, "sender_id")?,
            sender_role: required_string(row, "sender_role")?.parse()?,
            sender_name: optional_string(row, "sender_name").unwrap_or_default(),
            body: required_string(row, "message")?,
            created_at: required_timestamp(row, "created_at")?,
        })
    }

    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        if let Some(id) = &self.id {
            row.insert("id".into(), Value::String(id.clone()));
        }
        row.insert(
            self.parent_column.clone(),
            Value::String(self.parent_id.clone()),
        );
        row.insert("sender_id".into(), Value::String(self.sender_id.clone()));
        row.insert(
            "sender_role".into(),
            Value::String(self.sender_role.as_str().to_string()),
        );
        row.insert(
            "sender_name".into(),
            Value::String(self.sender_name.clone()),
        );
        row.insert("message".into(), Value::String(self.body.clone()));
        row.insert(
            "created_at".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        row
    }
}

/// Columns the core understands; everything else on a primary row is payload.
const INTEREST_CORE_COLUMNS: [&str; 5] = ["id", "status", "user_id", "created_at", "updated_at"];

/// An applicant's interest in a project or machinery item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interest {
    pub id: String,
    pub kind: InterestKind,
    pub status: InterestStatus,
    /// Applicant that created the interest, when the partition records one.
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Variant-specific fields, carried through untouched.
    pub payload: Row,
}

impl Interest {
    pub fn from_row(kind: InterestKind, row: &Row) -> Result<Self, InterestError> {
        let status = match optional_string(row, "status") {
            Some(s) => s.parse().map_err(|_| {
                InterestError::IntegrityError(format!("interest has unknown status '{}'", s))
            })?,
            None => InterestStatus::New,
        };

        let payload = row
            .iter()
            .filter(|(k, _)| !INTEREST_CORE_COLUMNS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id: required_string(row, "id")?,
            kind,
            status,
            owner_id: optional_string(row, "user_id"),
            created_at: required_timestamp(row, "created_at")?,
            updated_at: optional_timestamp(row, "updated_at")?,
            payload,
        })
    }
}

/// Result of a conversation read: the interest plus its thread, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterestWithConversation {
    pub interest: Interest,
    pub conversation: Vec<Message>,
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn optional_string(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn required_string(row: &Row, column: &str) -> Result<String, InterestError> {
    optional_string(row, column)
        .ok_or_else(|| InterestError::IntegrityError(format!("row is missing '{}'", column)))
}

fn optional_timestamp(row: &Row, column: &str) -> Result<Option<DateTime<Utc>>, InterestError> {
    match optional_string(row, column) {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| {
            InterestError::IntegrityError(format!("'{}' is not a timestamp: {}", column, raw))
        }),
    }
}

fn required_timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>, InterestError> {
    optional_timestamp(row, column)?
        .ok_or_else(|| InterestError::IntegrityError(format!("row is missing '{}'", column)))
}
