// Plain-text views of core results for the terminal.

use crate::core::account_moderation::{ConsistencyReport, ModerationOutcome};
use crate::core::gateway::AuthBanState;
use crate::core::interests::{Interest, InterestWithConversation, Message};
use std::fmt::Write;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

pub fn interest_summary(interest: &Interest) -> String {
    let owner = interest.owner_id.as_deref().unwrap_or("-");
    format!(
        "{} [{}] {} owner={} created={}",
        interest.kind,
        interest.status,
        interest.id,
        owner,
        interest.created_at.format(TIME_FORMAT)
    )
}

pub fn interest_list(interests: &[Interest]) -> String {
    if interests.is_empty() {
        return "No interests found.".to_string();
    }
    interests
        .iter()
        .map(interest_summary)
        .collect::<Vec<_>>()
        .join("\n")
}

fn message_line(message: &Message) -> String {
    format!(
        "  {} {} ({}): {}",
        message.created_at.format(TIME_FORMAT),
        message.sender_name,
        message.sender_role.as_str(),
        message.body
    )
}

pub fn conversation(view: &InterestWithConversation) -> String {
    let mut out = interest_summary(&view.interest);
    if let Some(updated) = view.interest.updated_at {
        let _ = write!(out, " updated={}", updated.format(TIME_FORMAT));
    }
    for (column, value) in &view.interest.payload {
        let _ = write!(out, "\n  {} = {}", column, value);
    }

    if view.conversation.is_empty() {
        out.push_str("\n\nNo messages yet.");
    } else {
        let _ = write!(out, "\n\nConversation ({} messages):", view.conversation.len());
        for message in &view.conversation {
            out.push('\n');
            out.push_str(&message_line(message));
        }
    }
    out
}

pub fn reply(message: &Message) -> String {
    format!("Reply sent.\n{}", message_line(message))
}

/// Partial application gets a loud block: the account is in a state an
/// operator has to look at.
pub fn moderation_outcome(user_id: &str, outcome: &ModerationOutcome) -> String {
    match outcome {
        ModerationOutcome::Applied { message, .. } => format!("{} ({})", message, user_id),
        ModerationOutcome::PartiallyApplied {
            message,
            profile_error,
            ..
        } => format!(
            "WARNING: partial moderation for {}\n  {}\n  profile error: {}\n  Run the same command again to converge.",
            user_id, message, profile_error
        ),
    }
}

pub fn consistency_report(report: &ConsistencyReport) -> String {
    let auth = match report.auth {
        AuthBanState::NotBanned => "not banned".to_string(),
        AuthBanState::Indefinite => "banned indefinitely".to_string(),
        AuthBanState::Until(until) => format!("banned until {}", until.format(TIME_FORMAT)),
    };
    let profile = match report.profile_banned_until {
        Some(until) => format!("banned_until {}", until.format(TIME_FORMAT)),
        None => "not banned".to_string(),
    };

    let verdict = if report.divergent {
        "DIVERGENT: auth and profile disagree"
    } else {
        "consistent"
    };
    let flag = |banned: bool| if banned { "blocked" } else { "active" };
    format!(
        "Ban state for {}\n  auth:    {} [{}]\n  profile: {} [{}]\n  {}",
        report.user_id,
        auth,
        flag(report.auth_banned()),
        profile,
        flag(report.profile_banned()),
        verdict
    )
}
