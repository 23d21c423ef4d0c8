// In-memory implementation of StorageGateway.
//
// Used by the `memory` backend and as the fake behind every core test. Tables
// are plain vectors of JSON rows keyed by table name; auth bans live in their
// own map. Faults can be injected per (table, operation) so tests can make one
// half of a two-step operation fail while the other succeeds.

use crate::core::gateway::{
    AuthBanState, BanDuration, Filter, GatewayError, OrderBy, Row, StorageGateway,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;

/// Pseudo-table used to key auth admin faults.
pub const AUTH_TABLE: &str = "auth.users";

/// Operation a fault can be attached to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum GatewayOp {
    Select,
    Insert,
    Update,
    AuthUpdate,
    AuthRead,
}

pub struct InMemoryGateway {
    tables: DashMap<String, Vec<Row>>,
    auth_bans: DashMap<String, AuthBanState>,
    faults: DashMap<(String, GatewayOp), String>,
    config_error: Option<String>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            auth_bans: DashMap::new(),
            faults: DashMap::new(),
            config_error: None,
        }
    }

    /// A gateway that refuses every call up front.
    #[allow(dead_code)]
    pub fn misconfigured(reason: impl Into<String>) -> Self {
        Self {
            config_error: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Seed a row directly, bypassing faults and id generation.
    pub fn put_row(&self, table: &str, row: Value) {
        if let Value::Object(row) = row {
            self.tables.entry(table.to_string()).or_default().push(row);
        }
    }

    /// Load rows from a JSON file shaped `{ "table": [row, ...] }`.
    /// Returns the number of rows loaded.
    pub fn load_seed(&self, path: &Path) -> Result<usize, GatewayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Misconfigured(format!("{}: {}", path.display(), e)))?;
        let tables: Row = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path.display(), e)))?;

        let mut loaded = 0;
        for (table, rows) in tables {
            let Value::Array(rows) = rows else {
                return Err(GatewayError::Decode(format!(
                    "seed table '{}' is not an array",
                    table
                )));
            };
            for row in rows {
                self.put_row(&table, row);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Snapshot of a table, in insertion order.
    #[allow(dead_code)]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Make `op` on `table` fail with `message` until cleared.
    #[allow(dead_code)]
    pub fn fail(&self, table: &str, op: GatewayOp, message: impl Into<String>) {
        self.faults
            .insert((table.to_string(), op), message.into());
    }

    #[allow(dead_code)]
    pub fn clear_fault(&self, table: &str, op: GatewayOp) {
        self.faults.remove(&(table.to_string(), op));
    }

    fn check_fault(&self, table: &str, op: GatewayOp) -> Result<(), GatewayError> {
        match self.faults.get(&(table.to_string(), op)) {
            Some(message) => Err(GatewayError::Storage(message.clone())),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageGateway for InMemoryGateway {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        match &self.config_error {
            Some(reason) => Err(GatewayError::Misconfigured(reason.clone())),
            None => Ok(()),
        }
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        self.check_fault(table, GatewayOp::Select)?;

        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn select_ordered(
        &self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
    ) -> Result<Vec<Row>, GatewayError> {
        let mut rows = self.select(table, filter).await?;
        rows.sort_by(|a, b| order.compare(a, b));
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, GatewayError> {
        self.check_fault(table, GatewayOp::Insert)?;

        row.entry("id")
            .or_insert_with(|| Value::String(super::generate_record_id()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, GatewayError> {
        self.check_fault(table, GatewayOp::Update)?;

        let mut matched = 0;
        if let Some(mut rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                for (column, value) in &patch {
                    row.insert(column.clone(), value.clone());
                }
                matched += 1;
            }
        }
        Ok(matched)
    }

    async fn auth_admin_update_ban_state(
        &self,
        user_id: &str,
        duration: BanDuration,
    ) -> Result<(), GatewayError> {
        self.check_fault(AUTH_TABLE, GatewayOp::AuthUpdate)?;

        let state = match duration {
            BanDuration::Indefinite => AuthBanState::Indefinite,
            BanDuration::Lift => AuthBanState::NotBanned,
        };
        self.auth_bans.insert(user_id.to_string(), state);
        Ok(())
    }

    async fn auth_admin_get_ban_state(&self, user_id: &str) -> Result<AuthBanState, GatewayError> {
        self.check_fault(AUTH_TABLE, GatewayOp::AuthRead)?;

        Ok(self
            .auth_bans
            .get(user_id)
            .map(|state| *state)
            .unwrap_or(AuthBanState::NotBanned))
    }
}
