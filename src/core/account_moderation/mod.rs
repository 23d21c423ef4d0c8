// Core account moderation module - suspend/reinstate across the auth and
// profile subsystems, with explicit partial-failure reporting.

pub mod account_moderation_models;
pub mod account_moderation_service;

pub use account_moderation_models::*;
pub use account_moderation_service::*;
