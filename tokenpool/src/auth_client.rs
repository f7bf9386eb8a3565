//! HTTP client for the identity provider's OAuth and game-session
//! endpoints. All calls carry the long Hytale timeout; status triage maps
//! 401/403 to an auth failure so the manager can invalidate and re-mint.

use crate::errors::TokenPoolError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    oauth_base: Url,
    services_base: Url,
}

#[derive(Debug, Deserialize)]
pub struct RefreshedAccess {
    pub access_token: String,
    /// Seconds until expiry.
    pub expires_in: u64,
    /// Present when the provider rotated the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileRecord {
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    #[serde(default)]
    profiles: Vec<ProfileRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedSession {
    pub session_token: Option<String>,
    pub identity_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl AuthClient {
    pub fn new(oauth_base: Url, services_base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            oauth_base,
            services_base,
        }
    }

    fn services_url(&self, path: &str) -> Result<Url, TokenPoolError> {
        self.services_base
            .join(path)
            .map_err(|e| TokenPoolError::Internal(format!("bad services url {path}: {e}")))
    }

    /// Exchanges a refresh token for a fresh access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedAccess, TokenPoolError> {
        let url = self
            .oauth_base
            .join("oauth2/token")
            .map_err(|e| TokenPoolError::Internal(format!("bad oauth url: {e}")))?;

        let response = self
            .client
            .post(url)
            .timeout(HTTP_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(TokenPoolError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TokenPoolError::AuthFailure {
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TokenPoolError::UpstreamRateLimited);
        }
        if !status.is_success() {
            return Err(TokenPoolError::Upstream {
                status: status.as_u16(),
            });
        }

        response
            .json::<RefreshedAccess>()
            .await
            .map_err(TokenPoolError::from_reqwest)
    }

    /// Lists the account's profiles; sessions are minted under the first.
    pub async fn fetch_profiles(
        &self,
        access_token: &str,
    ) -> Result<Vec<ProfileRecord>, TokenPoolError> {
        let url = self.services_url("my-account/get-profiles")?;
        let response = self
            .client
            .get(url)
            .timeout(HTTP_TIMEOUT)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(TokenPoolError::from_reqwest)?;

        let response = self.triage(response)?;
        let parsed = response
            .json::<ProfilesResponse>()
            .await
            .map_err(TokenPoolError::from_reqwest)?;
        Ok(parsed.profiles)
    }

    /// Mints a brand-new game session under the given profile.
    pub async fn create_session(
        &self,
        access_token: &str,
        profile_uuid: &str,
    ) -> Result<MintedSession, TokenPoolError> {
        let url = self.services_url("game-session/new")?;
        let response = self
            .client
            .post(url)
            .timeout(HTTP_TIMEOUT)
            .bearer_auth(access_token)
            .json(&json!({ "uuid": profile_uuid }))
            .send()
            .await
            .map_err(TokenPoolError::from_reqwest)?;

        let response = self.triage(response)?;
        response
            .json::<MintedSession>()
            .await
            .map_err(TokenPoolError::from_reqwest)
    }

    /// Extends an existing session. Callers treat any error as "drop the
    /// session", so the distinction between statuses only matters for logs.
    pub async fn refresh_session(
        &self,
        session_token: &str,
    ) -> Result<MintedSession, TokenPoolError> {
        let url = self.services_url("game-session/refresh")?;
        let response = self
            .client
            .post(url)
            .timeout(HTTP_TIMEOUT)
            .bearer_auth(session_token)
            .send()
            .await
            .map_err(TokenPoolError::from_reqwest)?;

        let response = self.triage(response)?;
        response
            .json::<MintedSession>()
            .await
            .map_err(TokenPoolError::from_reqwest)
    }

    fn triage(&self, response: reqwest::Response) -> Result<reqwest::Response, TokenPoolError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TokenPoolError::AuthFailure {
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TokenPoolError::UpstreamRateLimited);
        }
        if !status.is_success() {
            return Err(TokenPoolError::Upstream {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}
