// The infra module contains implementations of core traits.
// Each backend goes in its own submodule.

#[path = "storage/mod.rs"]
pub mod storage;

#[path = "supabase/mod.rs"]
pub mod supabase;
