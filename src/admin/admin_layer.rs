// Admin layer - command-line adapters over the core services.

pub mod commands;
pub mod render;

pub use commands::{run, AdminCommand, Services};
