pub mod supabase_gateway;

pub use supabase_gateway::SupabaseGateway;
