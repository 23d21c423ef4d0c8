use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::account_moderation::INDEFINITE_BAN_HOURS;
use crate::core::gateway::{
    parse_timestamp, AuthBanState, BanDuration, Filter, GatewayError, OrderBy, Row,
    StorageGateway,
};

/// Expiries further out than this are reported as indefinite bans.
const INDEFINITE_THRESHOLD_YEARS: i64 = 50;

/// Hosted Postgres behind PostgREST (`/rest/v1`) plus the GoTrue admin API
/// (`/auth/v1/admin`). Exposes only the calls the core layer needs.
///
/// Configuration problems are recorded at construction and surfaced through
/// `ensure_configured`, so a bad key fails each call up front instead of
/// half-way through a two-step write.
pub struct SupabaseGateway {
    client: Client,
    base_url: String,
    service_key: String,
    config_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyClaims {
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    banned_until: Option<String>,
}

impl SupabaseGateway {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let service_key = service_key.into();
        let config_error = Self::validate(&base_url, &service_key).err();
        if let Some(reason) = &config_error {
            tracing::warn!("Supabase gateway is misconfigured: {}", reason);
        }

        Self {
            client: Client::new(),
            base_url,
            service_key,
            config_error,
        }
    }

    fn validate(base_url: &str, service_key: &str) -> Result<(), String> {
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(format!("SUPABASE_URL must be an http(s) URL, got '{}'", base_url));
        }
        if service_key.trim().is_empty() {
            return Err("SUPABASE_SERVICE_ROLE_KEY is empty".to_string());
        }
        // Opaque secret keys carry no claims to inspect
        if service_key.starts_with("sb_secret_") {
            return Ok(());
        }

        match Self::key_role(service_key)?.as_deref() {
            Some("service_role") => Ok(()),
            Some(other) => Err(format!(
                "key has role '{}'; admin calls need the service_role key",
                other
            )),
            None => Err("key carries no role claim".to_string()),
        }
    }

    /// Read the `role` claim without verifying the signature; the key is our
    /// own credential, we only want to catch the anon key being configured.
    fn key_role(key: &str) -> Result<Option<String>, String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<KeyClaims>(key, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims.role)
            .map_err(|e| format!("service key is not a valid JWT: {}", e))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Admin endpoint for one user, with the id encoded as a single path
    /// segment.
    fn admin_user_url(&self, user_id: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&format!("{}/auth/v1/admin/users", self.base_url))
            .map_err(|e| GatewayError::Misconfigured(format!("invalid SUPABASE_URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Misconfigured("SUPABASE_URL cannot be a base".to_string()))?
            .push(user_id);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// PostgREST query pairs for an equality filter.
    fn filter_query(filter: &Filter) -> Vec<(String, String)> {
        filter
            .conditions()
            .iter()
            .map(|(column, value)| {
                let op = match value {
                    Value::Null => "is.null".to_string(),
                    Value::String(s) => format!("eq.{}", s),
                    other => format!("eq.{}", other),
                };
                (column.clone(), op)
            })
            .collect()
    }

    fn order_query(order: &OrderBy) -> (String, String) {
        let direction = if order.ascending { "asc" } else { "desc" };
        ("order".to_string(), format!("{}.{}", order.column, direction))
    }

    fn ban_duration_param(duration: BanDuration) -> String {
        match duration {
            BanDuration::Indefinite => format!("{}h", INDEFINITE_BAN_HOURS),
            BanDuration::Lift => "none".to_string(),
        }
    }

    fn classify_banned_until(raw: Option<&str>, now: DateTime<Utc>) -> AuthBanState {
        match raw.and_then(parse_timestamp) {
            None => AuthBanState::NotBanned,
            Some(until) if until <= now => AuthBanState::NotBanned,
            Some(until) if until > now + Duration::days(365 * INDEFINITE_THRESHOLD_YEARS) => {
                AuthBanState::Indefinite
            }
            Some(until) => AuthBanState::Until(until),
        }
    }

    /// Turn a non-2xx answer into an `Api` error carrying the backend's message.
    async fn check(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| {
                ["message", "msg", "error_description", "error"]
                    .iter()
                    .find_map(|key| body.get(*key).and_then(|v| v.as_str()).map(str::to_string))
            })
            .unwrap_or(text);

        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Row>, GatewayError> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(Self::filter_query(filter));
        if let Some(order) = order {
            query.push(Self::order_query(order));
        }

        let response = self
            .authorized(self.client.get(self.rest_url(table)))
            .query(&query)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Self::check(response)
            .await?
            .json::<Vec<Row>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl StorageGateway for SupabaseGateway {
    fn ensure_configured(&self) -> Result<(), GatewayError> {
        match &self.config_error {
            Some(reason) => Err(GatewayError::Misconfigured(reason.clone())),
            None => Ok(()),
        }
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        self.fetch(table, filter, None).await
    }

    async fn select_ordered(
        &self,
        table: &str,
        filter: &Filter,
        order: &OrderBy,
    ) -> Result<Vec<Row>, GatewayError> {
        self.fetch(table, filter, Some(order)).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, GatewayError> {
        let response = self
            .authorized(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let mut rows = Self::check(response)
            .await?
            .json::<Vec<Row>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        if rows.is_empty() {
            return Err(GatewayError::Decode(format!(
                "insert into {} returned no representation",
                table
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, GatewayError> {
        // PATCH answers 2xx even when nothing matched; the representation
        // tells us how many rows were written.
        let response = self
            .authorized(self.client.patch(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&Self::filter_query(filter))
            .json(&patch)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let rows = Self::check(response)
            .await?
            .json::<Vec<Row>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(rows.len() as u64)
    }

    async fn auth_admin_update_ban_state(
        &self,
        user_id: &str,
        duration: BanDuration,
    ) -> Result<(), GatewayError> {
        let payload = json!({ "ban_duration": Self::ban_duration_param(duration) });

        let response = self
            .authorized(self.client.put(self.admin_user_url(user_id)?))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn auth_admin_get_ban_state(&self, user_id: &str) -> Result<AuthBanState, GatewayError> {
        let response = self
            .authorized(self.client.get(self.admin_user_url(user_id)?))
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let user: ApiUser = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(Self::classify_banned_until(
            user.banned_until.as_deref(),
            Utc::now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn key_with_role(role: &str) -> String {
        encode(
            &Header::default(),
            &json!({ "iss": "supabase", "ref": "abcd", "role": role, "iat": 1700000000 }),
            &EncodingKey::from_secret(b"project-jwt-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_service_role_key_is_accepted() {
        let gateway = SupabaseGateway::new("https://abcd.supabase.co/", key_with_role("service_role"));
        assert!(gateway.ensure_configured().is_ok());
        assert_eq!(gateway.rest_url("profiles"), "https://abcd.supabase.co/rest/v1/profiles");

        let gateway = SupabaseGateway::new("https://abcd.supabase.co", "sb_secret_123");
        assert!(gateway.ensure_configured().is_ok());
    }

    #[test]
    fn test_bad_configuration_is_reported_up_front() {
        for (url, key) in [
            ("", key_with_role("service_role")),
            ("abcd.supabase.co", key_with_role("service_role")),
            ("https://abcd.supabase.co", String::new()),
            ("https://abcd.supabase.co", key_with_role("anon")),
            ("https://abcd.supabase.co", "not-a-jwt".to_string()),
        ] {
            let gateway = SupabaseGateway::new(url, key);
            assert!(
                matches!(gateway.ensure_configured(), Err(GatewayError::Misconfigured(_))),
                "expected misconfigured for url={:?}",
                url
            );
        }
    }

    #[test]
    fn test_admin_user_url_encodes_the_id() {
        let gateway = SupabaseGateway::new("https://abcd.supabase.co/", key_with_role("service_role"));
        assert_eq!(
            gateway.admin_user_url("5f1c-uuid").unwrap().as_str(),
            "https://abcd.supabase.co/auth/v1/admin/users/5f1c-uuid"
        );
        // An id can never reach a different endpoint
        assert_eq!(
            gateway.admin_user_url("u1/factors?x=1 y").unwrap().as_str(),
            "https://abcd.supabase.co/auth/v1/admin/users/u1%2Ffactors%3Fx=1%20y"
        );
    }

    #[test]
    fn test_filter_and_order_query() {
        let filter = Filter::eq("request_id", "req-1")
            .and_eq("archived", false)
            .and_eq("banned_until", Value::Null);
        assert_eq!(
            SupabaseGateway::filter_query(&filter),
            vec![
                ("request_id".to_string(), "eq.req-1".to_string()),
                ("archived".to_string(), "eq.false".to_string()),
                ("banned_until".to_string(), "is.null".to_string()),
            ]
        );
        assert_eq!(
            SupabaseGateway::order_query(&OrderBy::asc("created_at")),
            ("order".to_string(), "created_at.asc".to_string())
        );
    }

    #[test]
    fn test_ban_duration_param() {
        assert_eq!(SupabaseGateway::ban_duration_param(BanDuration::Indefinite), "876000h");
        assert_eq!(SupabaseGateway::ban_duration_param(BanDuration::Lift), "none");
    }

    #[test]
    fn test_banned_until_classification() {
        let now = Utc::now();
        assert_eq!(
            SupabaseGateway::classify_banned_until(None, now),
            AuthBanState::NotBanned
        );
        let past = (now - Duration::hours(1)).to_rfc3339();
        assert_eq!(
            SupabaseGateway::classify_banned_until(Some(&past), now),
            AuthBanState::NotBanned
        );
        let far = (now + Duration::hours(INDEFINITE_BAN_HOURS)).to_rfc3339();
        assert_eq!(
            SupabaseGateway::classify_banned_until(Some(&far), now),
            AuthBanState::Indefinite
        );
        let soon = now + Duration::days(3);
        assert!(matches!(
            SupabaseGateway::classify_banned_until(Some(&soon.to_rfc3339()), now),
            AuthBanState::Until(_)
        ));
    }
}
