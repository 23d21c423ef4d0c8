// Core interest module - type-to-storage dispatch, conversation reads and
// moderator replies across the three interest partitions.

pub mod conversation_resolver;
pub mod entity_registry;
pub mod interest_error;
pub mod interest_models;
pub mod reply_appender;

pub use conversation_resolver::ConversationResolver;
pub use interest_error::InterestError;
pub use interest_models::*;
pub use reply_appender::ReplyAppender;
