// SQLite-backed StorageGateway for local development.
//
// The hosted store has one table per partition with its own columns. Locally we
// don't want to maintain those schemas, so every logical table is stored as
// JSON documents in a single `records` table and filtered with json_extract.
//
// Tables:
// - records: (tbl, body) - one JSON document per logical row
// - auth_users: stand-in for the auth subsystem's ban flag

use crate::core::gateway::{
    AuthBanState, BanDuration, Filter, GatewayError, OrderBy, Row, StorageGateway,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions};
use sqlx::{query::Query, Pool, Row as SqlRow, Sqlite};
use std::path::Path;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub struct SqliteGateway {
    pool: Pool<Sqlite>,
}

fn storage_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Storage(e.to_string())
}

impl SqliteGateway {
    pub async fn new(database_url: &str) -> Result<Self, GatewayError> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| GatewayError::Misconfigured(e.to_string()))?;
            }
            std::fs::File::create(path_str)
                .map_err(|e| GatewayError::Misconfigured(e.to_string()))?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new()
            .connect(&conn_str)
            .await
            .map_err(|e| GatewayError::Misconfigured(e.to_string()))?;

        let gateway = Self { pool };
        gateway.migrate().await?;
        Ok(gateway)
    }

    async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tbl TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_tbl ON records(tbl);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_users (
                user_id TEXT PRIMARY KEY,
                banned BOOLEAN NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Build the WHERE clause for a filter. Placeholders are bound by `bind_filter`
    /// in the same order.
    fn where_clause(filter: &Filter) -> Result<String, GatewayError> {
        let mut sql = String::from("tbl = ?");
        for (column, value) in filter.conditions() {
            json_path(column)?;
            if value.is_null() {
                sql.push_str(" AND json_extract(body, ?) IS NULL");
            } else {
                sql.push_str(" AND json_extract(body, ?) = ?");
            }
        }
        Ok(sql)
    }

    fn bind_filter<'q>(
        mut query: SqliteQuery<'q>,
        table: &str,
        filter: &Filter,
    ) -> Result<SqliteQuery<'q>, GatewayError> {
        query = query.bind(table.to_string());
        for (column, value) in filter.conditions() {
            query = query.bind(json_path(column)?);
            query = match value {
                Value::Null => query,
                Value::String(s) => query.bind(s.clone()),
                Value::Bool(b) => query.bind(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                // json_extract hands nested values back as JSON text
                other => query.bind(other.to_string()),
            };
        }
        Ok(query)
    }

    async fn fetch(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Row>, GatewayError> {
        let sql = format!(
            "SELECT body FROM records WHERE {} ORDER BY id ASC",
            Self::where_clause(filter)?
        );

        let rows = Self::bind_filter(sqlx::query(&sql), table, filter)?
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        let mut decoded = rows
            .iter()
            .map(|row| {
                let body: String = row.get("body");
                decode_body(&body)
            })
            .collect::<Result<Vec<Row>, _>>()?;

        // Sorted here rather than in SQL: json_extract compares timestamps as
        // text, which is wrong across offsets. The sort is stable, so ties keep
        // insertion order.
        if let Some(order) = order {
            decoded.sort_by(|a, b| order.compare(a, b));
        }
        Ok(decoded)
    }
}

fn json_path(column: &str) -> Result<String, GatewayError> {
    if column.is_empty() || column.contains('"') {
        return Err(GatewayError::Storage(format!(
            "invalid column name '{}'",
            column
        )));
    }
    Ok(format!("$.\"{}\"", column))
}

fn decode_body(body: &str) -> Result<Row, GatewayError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(GatewayError::Decode("stored record is not an object".into())),
        Err(e) => Err(GatewayError::Decode(e.to_string())),
    }
}

#[async_trait]
impl StorageGateway for SqliteGateway {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.pool.is_closed() {
            return Err(GatewayError::Misconfigured(
                "SQLite pool has been closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        self.fetch(table, filter, None).await
    }

    async fn select_ordered(
        &self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
    ) -> Result<Vec<Row>, GatewayError> {
        self.fetch(table, filter, Some(order)).await
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, GatewayError> {
        row.entry("id")
            .or_insert_with(|| Value::String(super::generate_record_id()));
        row.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let body = serde_json::to_string(&row).map_err(|e| GatewayError::Decode(e.to_string()))?;
        sqlx::query("INSERT INTO records (tbl, body) VALUES (?, ?)")
            .bind(table)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, GatewayError> {
        let sql = format!(
            "SELECT id, body FROM records WHERE {}",
            Self::where_clause(filter)?
        );

        // Read-merge-write inside one transaction so a partial update can't stick.
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let rows = Self::bind_filter(sqlx::query(&sql), table, filter)?
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_err)?;

        let matched = rows.len() as u64;
        for row in rows {
            let record_id: i64 = row.get("id");
            let body: String = row.get("body");
            let mut merged = decode_body(&body)?;
            for (column, value) in &patch {
                merged.insert(column.clone(), value.clone());
            }
            let merged =
                serde_json::to_string(&merged).map_err(|e| GatewayError::Decode(e.to_string()))?;

            sqlx::query("UPDATE records SET body = ? WHERE id = ?")
                .bind(merged)
                .bind(record_id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(matched)
    }

    async fn auth_admin_update_ban_state(
        &self,
        user_id: &str,
        duration: BanDuration,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO auth_users (user_id, banned)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET banned = excluded.banned
            "#,
        )
        .bind(user_id)
        .bind(duration == BanDuration::Indefinite)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn auth_admin_get_ban_state(&self, user_id: &str) -> Result<AuthBanState, GatewayError> {
        let row = sqlx::query("SELECT banned FROM auth_users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(match row {
            Some(row) if row.get::<bool, _>("banned") => AuthBanState::Indefinite,
            _ => AuthBanState::NotBanned,
        })
    }
}
