use crate::components::redis_service::RedisActorHandle;
use crate::error::{calendar_error, AppResult};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};

const TOKEN_ENDPOINT: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Scopes requested when refreshing
const SCOPES: &str = "openid profile offline_access https://graph.microsoft.com/Calendars.Read.Shared";

/// Refresh this many seconds before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone)]
pub struct TokenManager {
    client_id: String,
    client_secret: String,
    client: Client,
    redis_handle: RedisActorHandle,
}

impl TokenManager {
    pub fn new(client_id: String, client_secret: String, redis_handle: RedisActorHandle) -> Self {
        Self {
            client_id,
            client_secret,
            client: Client::new(),
            redis_handle,
        }
    }

    /// Get a usable access token, refreshing the stored one if it has expired
    pub async fn get_access_token(&self) -> AppResult<String> {
        let token = self.redis_handle.get_token().await?.ok_or_else(|| {
            calendar_error("No valid token found. Please set up token manually in Redis.")
        })?;

        let token = if is_expired(&token, Utc::now().timestamp()) {
            self.refresh_token(&token).await?
        } else {
            token
        };

        token
            .get("access_token")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| calendar_error("No access token available"))
    }

    /// Refresh an expired token and store the result
    async fn refresh_token(&self, token: &Value) -> AppResult<Value> {
        let refresh_token = token
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| calendar_error("No refresh token in token data"))?;

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", SCOPES),
        ];

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&params)
            .send()
            .await
            .map_err(|e| calendar_error(&format!("Failed to refresh token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(calendar_error(&format!(
                "Failed to refresh token: HTTP {} - {}",
                status, error_body
            )));
        }

        let new_token: Value = response
            .json()
            .await
            .map_err(|e| calendar_error(&format!("Failed to parse token response: {}", e)))?;

        let token_json = merge_refreshed(&new_token, refresh_token, Utc::now().timestamp())?;
        self.redis_handle.save_token(token_json.clone()).await?;

        Ok(token_json)
    }
}

fn is_expired(token: &Value, now: i64) -> bool {
    match token.get("expires_at").and_then(|v| v.as_i64()) {
        Some(expires_at) => expires_at - EXPIRY_MARGIN_SECS <= now,
        None => true,
    }
}

/// Combine a refresh response with the refresh token it was obtained with.
/// The identity platform may rotate the refresh token; a new one wins.
fn merge_refreshed(response: &Value, refresh_token: &str, now: i64) -> AppResult<Value> {
    let access_token = response
        .get("access_token")
        .cloned()
        .ok_or_else(|| calendar_error("Token response missing 'access_token' field"))?;

    let refresh_token = response
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .unwrap_or(refresh_token);

    let expires_in = response
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .unwrap_or(3600);

    Ok(json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_at": now + expires_in,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expired() {
        assert!(is_expired(&json!({ "access_token": "a" }), 1000));
        assert!(is_expired(&json!({ "expires_at": 1030 }), 1000));
        assert!(!is_expired(&json!({ "expires_at": 5000 }), 1000));
    }

    #[test]
    fn test_merge_refreshed_keeps_old_refresh_token() {
        let response = json!({ "access_token": "new", "expires_in": 600 });
        let merged = merge_refreshed(&response, "old-refresh", 1000).unwrap();
        assert_eq!(merged["access_token"], "new");
        assert_eq!(merged["refresh_token"], "old-refresh");
        assert_eq!(merged["expires_at"], 1600);
    }

    #[test]
    fn test_merge_refreshed_prefers_rotated_refresh_token() {
        let response = json!({ "access_token": "new", "refresh_token": "rotated" });
        let merged = merge_refreshed(&response, "old-refresh", 0).unwrap();
        assert_eq!(merged["refresh_token"], "rotated");
        assert_eq!(merged["expires_at"], 3600);
    }

    #[test]
    fn test_merge_refreshed_requires_access_token() {
        assert!(merge_refreshed(&json!({}), "r", 0).is_err());
    }
}
