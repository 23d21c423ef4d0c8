// Local StorageGateway implementations: in-memory and SQLite.

pub mod in_memory;
pub mod sqlite_gateway;

// Re-export for convenience
#[allow(unused_imports)]
pub use in_memory::{GatewayOp, InMemoryGateway, AUTH_TABLE};
pub use sqlite_gateway::SqliteGateway;

/// Id for rows inserted without one, mirroring a database-generated key.
pub(crate) fn generate_record_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}
