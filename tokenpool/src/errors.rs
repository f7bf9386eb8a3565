use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the token manager. The gateway maps these onto its
/// public error codes; the variants here stay close to what actually went
/// wrong rather than how it is reported.
#[derive(Error, Debug)]
pub enum TokenPoolError {
    #[error("no refresh token is configured or stored")]
    NoRefreshToken,

    #[error("identity provider rejected our credentials (status {status})")]
    AuthFailure { status: u16 },

    #[error("account has no profiles to mint sessions under")]
    NoProfiles,

    #[error("session creation failed and the pool is empty")]
    SessionCreationFailed,

    #[error("every session is rate limited and the pool cannot grow")]
    AllSessionsRateLimited,

    #[error("identity provider rate limited the manager itself")]
    UpstreamRateLimited,

    #[error("identity provider returned status {status}")]
    Upstream { status: u16 },

    #[error("request to identity provider failed: {0}")]
    Http(String),

    #[error("token store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl TokenPoolError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        TokenPoolError::Http(e.to_string())
    }

    /// True for failures that should invalidate access and session tokens.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, TokenPoolError::AuthFailure { .. })
    }
}
