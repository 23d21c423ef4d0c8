// Account moderation domain models.
//
// A moderated account has two ban representations: the auth subsystem's own
// ban and the profile's denormalized `banned_until`. These types describe the
// outcome of keeping them in step.

use crate::core::gateway::{AuthBanState, GatewayError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

/// Table and columns of the profile subsystem.
pub const PROFILE_TABLE: &str = "profiles";
pub const PROFILE_KEY_COLUMN: &str = "id";
pub const PROFILE_BANNED_UNTIL_COLUMN: &str = "banned_until";

/// Length of an "indefinite" ban where a concrete expiry is needed (~100 years).
pub const INDEFINITE_BAN_HOURS: i64 = 876_000;

/// Concrete profile expiry for an indefinite ban issued at `now`. The profile
/// subsystem has no native "forever", so this is an explicit far-future date.
pub fn indefinite_ban_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(INDEFINITE_BAN_HOURS)
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Storage is not configured: {0}")]
    Misconfigured(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Step one failed; neither subsystem was changed.
    #[error("Failed to update authentication ban state: {0}")]
    AuthUpdateFailed(String),

    #[error("Failed to read ban state: {0}")]
    ReadFailed(String),
}

impl From<GatewayError> for ModerationError {
    fn from(err: GatewayError) -> Self {
        ModerationError::ReadFailed(err.to_string())
    }
}

/// Result of a ban/unban call that got past the auth write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ModerationOutcome {
    /// Both subsystems now agree.
    Applied { banned: bool, message: String },
    /// Auth changed, profile did not. The two are divergent until a later
    /// call succeeds.
    PartiallyApplied {
        banned: bool,
        message: String,
        profile_error: String,
    },
}

impl ModerationOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ModerationOutcome::Applied { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ModerationOutcome::Applied { message, .. }
            | ModerationOutcome::PartiallyApplied { message, .. } => message,
        }
    }
}

/// Side-by-side read of both ban representations.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub user_id: String,
    pub auth: AuthBanState,
    pub profile_banned_until: Option<DateTime<Utc>>,
    pub divergent: bool,
}

impl ConsistencyReport {
    pub fn new(
        user_id: impl Into<String>,
        auth: AuthBanState,
        profile_banned_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let auth_banned = auth.is_banned_at(now);
        let profile_banned = profile_banned_until.map_or(false, |until| until > now);
        Self {
            user_id: user_id.into(),
            auth,
            profile_banned_until,
            divergent: auth_banned != profile_banned,
        }
    }

    pub fn auth_banned(&self) -> bool {
        self.auth.is_banned_at(Utc::now())
    }

    pub fn profile_banned(&self) -> bool {
        self.profile_banned_until
            .map_or(false, |until| until > Utc::now())
    }
}
