// The core module contains all business logic.
// Each feature gets its own submodule; storage is reached only through the
// gateway port.

#[path = "gateway/mod.rs"]
pub mod gateway;

#[path = "interests/mod.rs"]
pub mod interests;

#[path = "account_moderation/mod.rs"]
pub mod account_moderation;
