// The storage gateway is the one port every core component talks through.
//
// It is deliberately narrow: equality-filtered reads, ordered reads, single-row
// inserts, filtered updates, and the auth admin ban calls. The hosted store,
// SQLite and the in-memory fake all implement exactly this contract, so nothing
// in core knows which one is behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// A single table row as the gateway sees it: column name -> JSON value.
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credentials or endpoint are missing/invalid. Nothing was attempted.
    #[error("Storage gateway misconfigured: {0}")]
    Misconfigured(String),

    /// The request never got a usable answer (connection, TLS, timeout).
    #[error("Request failed: {0}")]
    Request(String),

    /// The backend answered with an error status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Backend-local failure (SQLite, injected faults).
    #[error("Storage error: {0}")]
    Storage(String),

    /// The backend answered but the payload was not what we expected.
    #[error("Decode error: {0}")]
    Decode(String),
}

// ============================================================================
// QUERY SHAPES
// ============================================================================

/// Conjunction of `column = value` conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Whether a row satisfies every condition. A null condition matches a
    /// null or missing column (SQL `IS NULL`); otherwise a missing column
    /// never matches.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| match expected {
            Value::Null => row.get(column).map_or(true, Value::is_null),
            _ => row.get(column) == Some(expected),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Compare two rows on the ordering column.
    ///
    /// Timestamps compare as instants whatever their offset, other strings
    /// lexically, numbers numerically; missing/null sorts first.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = compare_values(a.get(&self.column), b.get(&self.column));
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Parse a timestamp column as the backends write it: RFC 3339, or Postgres'
/// `timestamptz` text form with a space separator and short offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// ============================================================================
// AUTH BAN SHAPES
// ============================================================================

/// Ban instruction for the authentication subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanDuration {
    /// Ban with no planned end.
    Indefinite,
    /// Zero-duration ban, i.e. lift any existing ban immediately.
    Lift,
}

/// Ban state as reported back by the authentication subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBanState {
    NotBanned,
    Indefinite,
    Until(DateTime<Utc>),
}

impl AuthBanState {
    pub fn is_banned_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            AuthBanState::NotBanned => false,
            AuthBanState::Indefinite => true,
            AuthBanState::Until(until) => *until > now,
        }
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Relational store plus auth admin API, as consumed by the core.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Fail fast if the gateway cannot be used at all (missing url/key, etc).
    /// Called before any read or write so nothing partially proceeds.
    fn ensure_configured(&self) -> Result<(), GatewayError>;

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError>;

    async fn select_ordered(
        &self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
    ) -> Result<Vec<Row>, GatewayError>;

    /// Insert one row and return it as stored (with any generated columns).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, GatewayError>;

    /// Merge `patch` into every row matching `filter`. Returns how many rows
    /// matched; zero is not an error here, callers decide what it means.
    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, GatewayError>;

    async fn auth_admin_update_ban_state(
        &self,
        user_id: &str,
        duration: BanDuration,
    ) -> Result<(), GatewayError>;

    async fn auth_admin_get_ban_state(&self, user_id: &str) -> Result<AuthBanState, GatewayError>;
}
