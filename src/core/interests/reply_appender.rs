// Write side of the interest workflow.
//
// A moderator reply is two writes: the message insert (the operation of record)
// and a status bump on the parent. Only the first one can fail the call. Nothing
// here locks or wraps a transaction, so concurrent replies race on the status
// bump and the last write wins.

use super::conversation_resolver::{require_id, ConversationResolver};
use super::entity_registry::{resolve_mapping, TableMapping};
use super::interest_error::InterestError;
use super::interest_models::{Author, InterestKind, InterestStatus, Message, SenderRole};
use crate::core::gateway::{Filter, Row, StorageGateway};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

pub struct ReplyAppender<G: StorageGateway> {
    gateway: Arc<G>,
    resolver: ConversationResolver<G>,
}

impl<G: StorageGateway> ReplyAppender<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            resolver: ConversationResolver::new(Arc::clone(&gateway)),
            gateway,
        }
    }

    /// Append a moderator reply and mark the interest as contacted.
    ///
    /// The caller has already checked that `moderator` may moderate. The
    /// interest must exist (`NotFound` otherwise, before any write). If the
    /// insert fails nothing else is attempted. If the status bump fails the
    /// reply still stands and the call succeeds.
    ///
    /// The bump happens on every reply, whatever the current status, so a
    /// reply on a resolved interest moves it back to contacted.
    pub async fn add_reply(
        &self,
        id: &str,
        kind: InterestKind,
        moderator: &Author,
        text: &str,
    ) -> Result<Message, InterestError> {
        self.gateway
            .ensure_configured()
            .map_err(InterestError::misconfigured)?;
        require_id(id)?;
        require_author(moderator)?;
        require_text(text)?;

        let mapping = resolve_mapping(kind);
        self.resolver.fetch_interest(id, kind, &mapping).await?;

        let message = self
            .insert_message(id, &mapping, moderator, SenderRole::PlatformAdmin, text)
            .await?;

        tracing::info!(
            kind = %kind,
            interest_id = id,
            moderator_id = %moderator.id,
            "Moderator reply recorded"
        );

        if let Err(e) = self
            .write_status(id, &mapping, InterestStatus::ACKNOWLEDGED)
            .await
        {
            tracing::warn!(
                kind = %kind,
                interest_id = id,
                table = mapping.primary_table,
                "Reply saved but status update failed: {}",
                e
            );
        }

        Ok(message)
    }

    /// Append a message from the applicant side. The interest must exist;
    /// its status is left alone.
    pub async fn add_applicant_message(
        &self,
        id: &str,
        kind: InterestKind,
        applicant: &Author,
        text: &str,
    ) -> Result<Message, InterestError> {
        self.gateway
            .ensure_configured()
            .map_err(InterestError::misconfigured)?;
        require_id(id)?;
        require_author(applicant)?;
        require_text(text)?;

        let mapping = resolve_mapping(kind);
        self.resolver.fetch_interest(id, kind, &mapping).await?;

        self.insert_message(id, &mapping, applicant, SenderRole::Applicant, text)
            .await
    }

    /// Explicitly move an interest to `status`. Unlike the bump in
    /// `add_reply`, this is the write of record and its failure is returned.
    pub async fn set_status(
        &self,
        id: &str,
        kind: InterestKind,
        status: InterestStatus,
    ) -> Result<(), InterestError> {
        self.gateway
            .ensure_configured()
            .map_err(InterestError::misconfigured)?;
        require_id(id)?;

        let mapping = resolve_mapping(kind);
        self.resolver.fetch_interest(id, kind, &mapping).await?;

        self.write_status(id, &mapping, status).await?;
        tracing::info!(kind = %kind, interest_id = id, status = %status, "Interest status set");
        Ok(())
    }

    async fn insert_message(
        &self,
        id: &str,
        mapping: &TableMapping,
        author: &Author,
        role: SenderRole,
        text: &str,
    ) -> Result<Message, InterestError> {
        let message = Message {
            id: None,
            parent_column: mapping.foreign_key_column.to_string(),
            parent_id: id.to_string(),
            sender_id: author.id.clone(),
            sender_role: role,
            sender_name: author.name.clone(),
            body: text.to_string(),
            created_at: Utc::now(),
        };

        let stored = self
            .gateway
            .insert(mapping.message_table, message.to_row())
            .await
            .map_err(|e| InterestError::InsertFailed(e.to_string()))?;

        // The row is in; an odd echo from the backend must not turn that into a failure.
        Ok(
            Message::from_row(&stored, mapping.foreign_key_column).unwrap_or_else(|e| {
                tracing::debug!("Could not decode stored message, using local copy: {}", e);
                Message {
                    id: stored
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    ..message
                }
            }),
        )
    }

    async fn write_status(
        &self,
        id: &str,
        mapping: &TableMapping,
        status: InterestStatus,
    ) -> Result<(), InterestError> {
        let mut patch = Row::new();
        patch.insert("status".into(), Value::String(status.as_str().to_string()));
        patch.insert(
            "updated_at".into(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let matched = self
            .gateway
            .update(mapping.primary_table, &Filter::eq("id", id), patch)
            .await
            .map_err(|e| InterestError::UpdateFailed(e.to_string()))?;

        // The parent was read moments ago; losing it since is a failed write
        if matched == 0 {
            return Err(InterestError::UpdateFailed(format!(
                "interest '{}' no longer exists in {}",
                id, mapping.primary_table
            )));
        }
        Ok(())
    }
}

fn require_text(text: &str) -> Result<(), InterestError> {
    if text.trim().is_empty() {
        return Err(InterestError::InvalidInput(
            "message text must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn require_author(author: &Author) -> Result<(), InterestError> {
    if author.id.trim().is_empty() || author.name.trim().is_empty() {
        return Err(InterestError::InvalidInput(
            "author needs an id and a display name".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::storage::{GatewayOp, InMemoryGateway};
    use serde_json::json;

    fn admin() -> Author {
        Author::new("mod-1", "Admin")
    }

    fn seeded(table: &str, id: &str, status: &str) -> Arc<InMemoryGateway> {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.put_row(
            table,
            json!({ "id": id, "status": status, "created_at": "2024-06-01T08:00:00Z" }),
        );
        gateway
    }

    #[tokio::test]
    async fn test_machinery_reply_scenario() {
        let gateway = seeded("machinery_purchase_requests", "req-1", "new");
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        let message = appender
            .add_reply(
                "req-1",
                InterestKind::MachineryRequest,
                &admin(),
                "We will review your request.",
            )
            .await
            .unwrap();

        assert_eq!(message.parent_column, "request_id");
        assert_eq!(message.parent_id, "req-1");
        assert_eq!(message.sender_role, SenderRole::PlatformAdmin);
        assert_eq!(message.sender_name, "Admin");
        assert!(message.id.is_some());

        let stored = gateway.rows("machinery_request_messages");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["request_id"], "req-1");
        assert_eq!(stored[0]["sender_role"], "platform_admin");
        assert!(!stored[0].contains_key("interest_id"));

        let parent = &gateway.rows("machinery_purchase_requests")[0];
        assert_eq!(parent["status"], "contacted");
        assert!(parent.get("updated_at").and_then(|v| v.as_str()).is_some());
    }

    #[tokio::test]
    async fn test_project_replies_use_interest_id() {
        for (kind, primary, thread) in [
            (
                InterestKind::CommunityProject,
                "community_project_interests",
                "community_project_interest_messages",
            ),
            (
                InterestKind::DevelopmentProject,
                "development_project_interests",
                "development_project_interest_messages",
            ),
        ] {
            let gateway = seeded(primary, "p-1", "new");
            let appender = ReplyAppender::new(Arc::clone(&gateway));
            appender
                .add_reply("p-1", kind, &admin(), "Thanks for your interest")
                .await
                .unwrap();

            let stored = gateway.rows(thread);
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0]["interest_id"], "p-1");
        }
    }

    #[tokio::test]
    async fn test_reply_is_not_earlier_than_existing_messages() {
        let gateway = seeded("community_project_interests", "c-1", "new");
        gateway.put_row(
            "community_project_interest_messages",
            json!({
                "interest_id": "c-1",
                "sender_id": "applicant-1",
                "sender_role": "applicant",
                "message": "Is this still open?",
                "created_at": "2024-06-01T09:00:00Z"
            }),
        );
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        let reply = appender
            .add_reply("c-1", InterestKind::CommunityProject, &admin(), "Yes it is")
            .await
            .unwrap();

        let resolver = ConversationResolver::new(gateway);
        let thread = resolver
            .fetch_interest_with_conversation("c-1", InterestKind::CommunityProject)
            .await
            .unwrap()
            .conversation;

        assert_eq!(thread.len(), 2);
        assert!(thread.iter().all(|m| m.created_at <= reply.created_at));
        assert_eq!(thread.last().map(|m| m.sender_role), Some(SenderRole::PlatformAdmin));
    }

    #[tokio::test]
    async fn test_status_failure_does_not_fail_the_reply() {
        let gateway = seeded("machinery_purchase_requests", "req-1", "new");
        gateway.fail("machinery_purchase_requests", GatewayOp::Update, "row locked");
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        let reply = appender
            .add_reply("req-1", InterestKind::MachineryRequest, &admin(), "On it")
            .await
            .unwrap();
        assert_eq!(reply.body, "On it");

        // Status untouched, but the reply is retrievable
        assert_eq!(gateway.rows("machinery_purchase_requests")[0]["status"], "new");
        let resolver = ConversationResolver::new(gateway);
        let thread = resolver
            .fetch_interest_with_conversation("req-1", InterestKind::MachineryRequest)
            .await
            .unwrap()
            .conversation;
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].body, "On it");
    }

    #[tokio::test]
    async fn test_insert_failure_skips_status_update() {
        let gateway = seeded("development_project_interests", "d-1", "new");
        gateway.fail(
            "development_project_interest_messages",
            GatewayOp::Insert,
            "violates foreign key constraint",
        );
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        let err = appender
            .add_reply("d-1", InterestKind::DevelopmentProject, &admin(), "Hello")
            .await
            .unwrap_err();

        assert!(
            matches!(err, InterestError::InsertFailed(ref m) if m.contains("violates foreign key constraint"))
        );
        let parent = &gateway.rows("development_project_interests")[0];
        assert_eq!(parent["status"], "new");
        assert!(!parent.contains_key("updated_at"));
    }

    #[tokio::test]
    async fn test_reply_to_missing_interest_writes_nothing() {
        let gateway = seeded("machinery_purchase_requests", "req-1", "new");
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        let err = appender
            .add_reply("req-404", InterestKind::MachineryRequest, &admin(), "Hello?")
            .await
            .unwrap_err();

        assert!(matches!(err, InterestError::NotFound { ref id, .. } if id == "req-404"));
        assert!(gateway.rows("machinery_request_messages").is_empty());
        assert_eq!(gateway.rows("machinery_purchase_requests")[0]["status"], "new");
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_any_write() {
        let gateway = seeded("machinery_purchase_requests", "req-1", "new");
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        let err = appender
            .add_reply("req-1", InterestKind::MachineryRequest, &admin(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, InterestError::InvalidInput(_)));

        let err = appender
            .add_reply(
                "req-1",
                InterestKind::MachineryRequest,
                &Author::new("mod-1", ""),
                "hi",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InterestError::InvalidInput(_)));

        assert!(gateway.rows("machinery_request_messages").is_empty());
    }

    #[tokio::test]
    async fn test_reply_on_resolved_interest_still_sets_contacted() {
        let gateway = seeded("community_project_interests", "c-1", "resolved");
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        appender
            .add_reply("c-1", InterestKind::CommunityProject, &admin(), "Reopening")
            .await
            .unwrap();

        assert_eq!(gateway.rows("community_project_interests")[0]["status"], "contacted");
    }

    #[tokio::test]
    async fn test_concurrent_replies_both_land() {
        let gateway = seeded("machinery_purchase_requests", "req-1", "new");
        let appender = ReplyAppender::new(Arc::clone(&gateway));
        let first = admin();
        let other = Author::new("mod-2", "Second Admin");

        let (a, b) = tokio::join!(
            appender.add_reply("req-1", InterestKind::MachineryRequest, &first, "from one"),
            appender.add_reply("req-1", InterestKind::MachineryRequest, &other, "from two"),
        );
        assert!(a.is_ok() && b.is_ok());

        // No conflict is detected: both messages exist and the status ends
        // as whichever bump landed last (both write "contacted").
        assert_eq!(gateway.rows("machinery_request_messages").len(), 2);
        assert_eq!(gateway.rows("machinery_purchase_requests")[0]["status"], "contacted");
    }

    #[tokio::test]
    async fn test_applicant_message_keeps_status_and_requires_parent() {
        let gateway = seeded("machinery_purchase_requests", "req-1", "new");
        let appender = ReplyAppender::new(Arc::clone(&gateway));
        let applicant = Author::new("applicant-1", "Ama");

        let message = appender
            .add_applicant_message("req-1", InterestKind::MachineryRequest, &applicant, "Any update?")
            .await
            .unwrap();
        assert_eq!(message.sender_role, SenderRole::Applicant);
        assert_eq!(gateway.rows("machinery_purchase_requests")[0]["status"], "new");

        let err = appender
            .add_applicant_message("req-404", InterestKind::MachineryRequest, &applicant, "Hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, InterestError::NotFound { .. }));
        assert_eq!(gateway.rows("machinery_request_messages").len(), 1);
    }

    #[tokio::test]
    async fn test_set_status_propagates_update_failure() {
        let gateway = seeded("community_project_interests", "c-1", "contacted");
        let appender = ReplyAppender::new(Arc::clone(&gateway));

        appender
            .set_status("c-1", InterestKind::CommunityProject, InterestStatus::Resolved)
            .await
            .unwrap();
        assert_eq!(gateway.rows("community_project_interests")[0]["status"], "resolved");

        gateway.fail("community_project_interests", GatewayOp::Update, "read-only replica");
        let err = appender
            .set_status("c-1", InterestKind::CommunityProject, InterestStatus::Archived)
            .await
            .unwrap_err();
        assert!(matches!(err, InterestError::UpdateFailed(ref m) if m.contains("read-only replica")));

        let err = appender
            .set_status("nope", InterestKind::CommunityProject, InterestStatus::Archived)
            .await
            .unwrap_err();
        assert!(matches!(err, InterestError::NotFound { .. }));
    }
}
