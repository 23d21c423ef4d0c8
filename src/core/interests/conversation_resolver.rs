// Read side of the interest workflow: find an interest in its partition and
// attach its message thread.
//
// The primary record is required; the thread is best-effort. Losing the parent
// fails the call, losing the thread only empties it.

use super::entity_registry::{resolve_mapping, TableMapping};
use super::interest_error::InterestError;
use super::interest_models::{
    Interest, InterestKind, InterestStatus, InterestWithConversation, Message,
};
use crate::core::gateway::{Filter, GatewayError, OrderBy, StorageGateway};
use std::sync::Arc;

pub struct ConversationResolver<G: StorageGateway> {
    gateway: Arc<G>,
}

impl<G: StorageGateway> ConversationResolver<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Fetch one interest and its thread, oldest message first.
    ///
    /// # Errors
    /// * `Misconfigured` if the gateway is unusable (checked before any read)
    /// * `NotFound` if no primary record has this id
    /// * `IntegrityError` if more than one does, or the record is malformed
    /// * `FetchFailed` if the primary read itself fails
    ///
    /// A failing thread read is logged and yields an empty conversation.
    pub async fn fetch_interest_with_conversation(
        &self,
        id: &str,
        kind: InterestKind,
    ) -> Result<InterestWithConversation, InterestError> {
        self.gateway
            .ensure_configured()
            .map_err(InterestError::misconfigured)?;
        require_id(id)?;

        let mapping = resolve_mapping(kind);
        let interest = self.fetch_interest(id, kind, &mapping).await?;

        let conversation = match self.fetch_conversation(id, &mapping).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(
                    kind = %kind,
                    interest_id = id,
                    table = mapping.message_table,
                    "Message thread unavailable, returning empty conversation: {}",
                    e
                );
                Vec::new()
            }
        };

        Ok(InterestWithConversation {
            interest,
            conversation,
        })
    }

    /// List interests of one kind, newest first, optionally by status.
    pub async fn list_interests(
        &self,
        kind: InterestKind,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, InterestError> {
        self.gateway
            .ensure_configured()
            .map_err(InterestError::misconfigured)?;

        let mapping = resolve_mapping(kind);
        let filter = match status {
            Some(status) => Filter::eq("status", status.as_str()),
            None => Filter::all(),
        };

        let rows = self
            .gateway
            .select_ordered(mapping.primary_table, &filter, &OrderBy::desc("created_at"))
            .await
            .map_err(|e| InterestError::FetchFailed(e.to_string()))?;

        let mut interests = Vec::with_capacity(rows.len());
        for row in &rows {
            match Interest::from_row(kind, row) {
                Ok(interest) => interests.push(interest),
                Err(e) => tracing::warn!(
                    kind = %kind,
                    table = mapping.primary_table,
                    "Skipping malformed interest row: {}",
                    e
                ),
            }
        }
        Ok(interests)
    }

    /// Load exactly one primary record.
    pub(crate) async fn fetch_interest(
        &self,
        id: &str,
        kind: InterestKind,
        mapping: &TableMapping,
    ) -> Result<Interest, InterestError> {
        let rows = self
            .gateway
            .select(mapping.primary_table, &Filter::eq("id", id))
            .await
            .map_err(|e| InterestError::FetchFailed(e.to_string()))?;

        match rows.as_slice() {
            [] => Err(InterestError::NotFound {
                kind,
                id: id.to_string(),
            }),
            [row] => Interest::from_row(kind, row),
            many => Err(InterestError::IntegrityError(format!(
                "{} rows in {} share id '{}'",
                many.len(),
                mapping.primary_table,
                id
            ))),
        }
    }

    /// Load the thread for `id`. Ordering is enforced here rather than
    /// trusted from the backend: applicants and moderators write from
    /// different surfaces and their inserts can land out of order.
    async fn fetch_conversation(
        &self,
        id: &str,
        mapping: &TableMapping,
    ) -> Result<Vec<Message>, GatewayError> {
        let rows = self
            .gateway
            .select_ordered(
                mapping.message_table,
                &Filter::eq(mapping.foreign_key_column, id),
                &OrderBy::asc("created_at"),
            )
            .await?;

        let mut messages: Vec<Message> = rows
            .iter()
            .filter_map(
                |row| match Message::from_row(row, mapping.foreign_key_column) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!(
                            table = mapping.message_table,
                            "Skipping malformed message row: {}",
                            e
                        );
                        None
                    }
                },
            )
            .collect();

        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

pub(crate) fn require_id(id: &str) -> Result<(), InterestError> {
    if id.trim().is_empty() {
        return Err(InterestError::InvalidInput(
            "interest id must not be empty".to_string(),
        ));
    }
    Ok(())
}
