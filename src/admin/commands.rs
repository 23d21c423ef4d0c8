// Admin commands. Each one parses its arguments into core types, calls one
// service and renders the result.
//
// Authorization happens before this binary is reachable; whoever runs it is
// acting as the configured moderator.

use super::render;
use crate::core::account_moderation::AccountModerationCoordinator;
use crate::core::gateway::StorageGateway;
use crate::core::interests::{
    Author, ConversationResolver, InterestKind, InterestStatus, ReplyAppender,
};
use anyhow::{anyhow, Result};
use clap::Subcommand;
use std::sync::Arc;

#[derive(Debug, Subcommand)]
pub enum AdminCommand {
    /// Show an interest and its conversation
    Show {
        /// community_project, development_project or machinery_request
        kind: String,
        id: String,
    },

    /// List interests of one kind, newest first
    List {
        kind: String,

        /// Only interests with this status
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Reply to an applicant as the configured moderator
    Reply {
        kind: String,
        id: String,
        text: String,
    },

    /// Set the workflow status of an interest
    Status {
        kind: String,
        id: String,
        status: String,
    },

    /// Suspend a user indefinitely
    Ban { user_id: String },

    /// Lift a user's suspension
    Unban { user_id: String },

    /// Compare the auth and profile ban state of a user
    CheckBan { user_id: String },
}

/// Services shared by every command, all over the same gateway.
pub struct Services<G: StorageGateway> {
    pub resolver: ConversationResolver<G>,
    pub replies: ReplyAppender<G>,
    pub moderation: AccountModerationCoordinator<G>,
    pub moderator: Option<Author>,
}

impl<G: StorageGateway> Services<G> {
    pub fn new(gateway: Arc<G>, moderator: Option<Author>) -> Self {
        Self {
            resolver: ConversationResolver::new(Arc::clone(&gateway)),
            replies: ReplyAppender::new(Arc::clone(&gateway)),
            moderation: AccountModerationCoordinator::new(gateway),
            moderator,
        }
    }
}

/// What a command printed, and whether it fully succeeded.
#[derive(Debug)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }
}

pub async fn run<G: StorageGateway>(
    command: AdminCommand,
    services: &Services<G>,
) -> Result<CommandOutput> {
    match command {
        AdminCommand::Show { kind, id } => {
            let kind: InterestKind = kind.parse()?;
            let view = services
                .resolver
                .fetch_interest_with_conversation(&id, kind)
                .await?;
            Ok(CommandOutput::ok(render::conversation(&view)))
        }

        AdminCommand::List { kind, status } => {
            let kind: InterestKind = kind.parse()?;
            let status = status
                .map(|s| s.parse::<InterestStatus>())
                .transpose()?;
            let interests = services.resolver.list_interests(kind, status).await?;
            Ok(CommandOutput::ok(render::interest_list(&interests)))
        }

        AdminCommand::Reply { kind, id, text } => {
            let kind: InterestKind = kind.parse()?;
            let moderator = services
                .moderator
                .as_ref()
                .ok_or_else(|| anyhow!("MODERATOR_ID must be set to send replies"))?;
            let message = services
                .replies
                .add_reply(&id, kind, moderator, &text)
                .await?;
            Ok(CommandOutput::ok(render::reply(&message)))
        }

        AdminCommand::Status { kind, id, status } => {
            let kind: InterestKind = kind.parse()?;
            let status: InterestStatus = status.parse()?;
            services.replies.set_status(&id, kind, status).await?;
            Ok(CommandOutput::ok(format!("{} {} is now {}.", kind, id, status)))
        }

        AdminCommand::Ban { user_id } => moderate(services, &user_id, true).await,

        AdminCommand::Unban { user_id } => moderate(services, &user_id, false).await,

        AdminCommand::CheckBan { user_id } => {
            let report = services.moderation.check_consistency(&user_id).await?;
            Ok(CommandOutput {
                text: render::consistency_report(&report),
                success: !report.divergent,
            })
        }
    }
}

async fn moderate<G: StorageGateway>(
    services: &Services<G>,
    user_id: &str,
    should_ban: bool,
) -> Result<CommandOutput> {
    let outcome = services.moderation.set_ban_state(user_id, should_ban).await?;
    Ok(CommandOutput {
        text: render::moderation_outcome(user_id, &outcome),
        success: outcome.success(),
    })
}
