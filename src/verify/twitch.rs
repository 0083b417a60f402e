//! Twitch Helix follower verification.
//!
//! Uses the client-credentials flow: the app token is fetched once, cached
//! until shortly before it expires, and dropped whenever Helix answers 401.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TwitchConfig;
use crate::error::VerifyError;
use crate::verify::FollowerVerifier;

/// Refresh the token this long before Twitch says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct HelixList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
}

#[derive(Debug, Deserialize)]
struct FollowersResponse {
    total: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn from_response(resp: TokenResponse, now: Instant) -> Self {
        let lifetime = Duration::from_secs(resp.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        Self {
            value: resp.access_token,
            expires_at: now + lifetime,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Follower verifier backed by the Twitch Helix API.
pub struct TwitchVerifier {
    config: TwitchConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl TwitchVerifier {
    pub fn new(config: TwitchConfig) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| VerifyError::RequestFailed {
                endpoint: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_base.trim_end_matches('/'))
    }

    /// Return a cached app token, or exchange credentials for a new one.
    async fn access_token(&self) -> Result<String, VerifyError> {
        let mut cached = self.token.lock().await;
        let now = Instant::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let resp = self
            .client
            .post(&self.config.auth_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| VerifyError::RequestFailed {
                endpoint: "oauth2/token".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VerifyError::AuthFailed {
                reason: format!("{status}: {body}"),
            });
        }

        let parsed: TokenResponse = resp.json().await.map_err(|e| VerifyError::InvalidResponse {
            endpoint: "oauth2/token".into(),
            reason: e.to_string(),
        })?;
        if parsed.access_token.is_empty() {
            return Err(VerifyError::InvalidResponse {
                endpoint: "oauth2/token".into(),
                reason: "empty access_token".into(),
            });
        }

        info!(expires_in = parsed.expires_in, "Obtained Twitch app access token");
        let token = CachedToken::from_response(parsed, now);
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// GET a Helix endpoint and decode the JSON body.
    async fn helix_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, VerifyError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(self.api_url(path))
            .query(query)
            .header("Client-Id", &self.config.client_id)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| VerifyError::RequestFailed {
                endpoint: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(VerifyError::AuthFailed {
                reason: format!("{path} answered 401"),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VerifyError::RequestFailed {
                endpoint: path.to_string(),
                reason: format!("{status}: {body}"),
            });
        }

        resp.json().await.map_err(|e| VerifyError::InvalidResponse {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn lookup_user(&self, login: &str) -> Result<HelixUser, VerifyError> {
        let list: HelixList<HelixUser> = self.helix_get("users", &[("login", login)]).await?;
        list.data
            .into_iter()
            .next()
            .ok_or_else(|| VerifyError::NotFound {
                handle: login.to_string(),
            })
    }

    async fn follower_count(&self, broadcaster_id: &str) -> Result<u64, VerifyError> {
        let resp: FollowersResponse = self
            .helix_get(
                "channels/followers",
                &[("broadcaster_id", broadcaster_id), ("first", "1")],
            )
            .await?;
        Ok(resp.total)
    }

    async fn verify_once(&self, handle: &str) -> Result<u64, VerifyError> {
        let user = self.lookup_user(handle).await?;
        let total = self.follower_count(&user.id).await?;
        debug!(login = %user.login, broadcaster_id = %user.id, total, "Twitch followers fetched");
        Ok(total)
    }
}

#[async_trait]
impl FollowerVerifier for TwitchVerifier {
    async fn verify(&self, handle: &str) -> Result<u64, VerifyError> {
        match self.verify_once(handle).await {
            // A revoked token gets one retry with a fresh one
            Err(VerifyError::AuthFailed { reason }) => {
                warn!(%reason, "Twitch rejected cached token; re-authenticating");
                self.verify_once(handle).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_parses() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":5011271,"token_type":"bearer"}"#)
                .unwrap();
        assert_eq!(resp.access_token, "abc");
        assert_eq!(resp.expires_in, 5011271);
    }

    #[test]
    fn cached_token_expires_early() {
        let now = Instant::now();
        let token = CachedToken::from_response(
            TokenResponse {
                access_token: "abc".into(),
                expires_in: 3600,
            },
            now,
        );
        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + Duration::from_secs(3500)));
        assert!(!token.is_fresh(now + Duration::from_secs(3541)));
    }

    #[test]
    fn short_lived_token_is_never_reused() {
        let now = Instant::now();
        let token = CachedToken::from_response(
            TokenResponse {
                access_token: "abc".into(),
                expires_in: 30,
            },
            now,
        );
        assert!(!token.is_fresh(now));
    }

    #[test]
    fn helix_payloads_parse() {
        let users: HelixList<HelixUser> = serde_json::from_str(
            r#"{"data":[{"id":"141981764","login":"twitchdev","display_name":"TwitchDev"}]}"#,
        )
        .unwrap();
        assert_eq!(users.data[0].id, "141981764");

        let empty: HelixList<HelixUser> = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(empty.data.is_empty());

        let followers: FollowersResponse =
            serde_json::from_str(r#"{"total":8,"data":[],"pagination":{}}"#).unwrap();
        assert_eq!(followers.total, 8);
    }

    #[test]
    fn api_url_joins_base() {
        let mut cfg = TwitchConfig::new("id", "secret");
        cfg.api_base = "http://127.0.0.1:9999/helix/".into();
        let verifier = TwitchVerifier::new(cfg).unwrap();
        assert_eq!(
            verifier.api_url("users"),
            "http://127.0.0.1:9999/helix/users"
        );
    }
}
