//! Public error taxonomy.
//!
//! Two kinds share one shape: a `fail` is expected and user-visible (bad
//! username, unknown player) and defaults to 400; an `internal` error is
//! infrastructure trouble (upstream down, rate limited, bad payload) and
//! defaults to 500. Every error carries a stable dotted code, a message
//! resolved from one table, and a structured `data` object that travels
//! into the response envelope.

use http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected, user-visible failure.
    Fail,
    /// Unexpected or infrastructure error.
    Internal,
}

#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub data: Value,
    pub status: Option<StatusCode>,
}

impl ApiError {
    pub fn fail(code: &str) -> Self {
        Self::with_kind(ErrorKind::Fail, code)
    }

    pub fn internal(code: &str) -> Self {
        Self::with_kind(ErrorKind::Internal, code)
    }

    fn with_kind(kind: ErrorKind, code: &str) -> Self {
        let status = if code.ends_with(".rate_limited") {
            Some(StatusCode::TOO_MANY_REQUESTS)
        } else {
            None
        };
        Self {
            kind,
            code: code.to_string(),
            message: default_message(code).to_string(),
            data: json!({}),
            status,
        }
    }

    /// Attaches structured context. A string `message` field in the data
    /// overrides the table message.
    pub fn with_data(mut self, data: Value) -> Self {
        if let Some(message) = data.get("message").and_then(Value::as_str) {
            self.message = message.to_string();
        }
        self.data = data;
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// HTTP status resolution: explicit status, then 404 for `api.404`,
    /// then the kind default.
    pub fn http_status(&self) -> StatusCode {
        if let Some(status) = self.status {
            return status;
        }
        if self.code == "api.404" {
            return StatusCode::NOT_FOUND;
        }
        match self.kind {
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Fail => StatusCode::BAD_REQUEST,
        }
    }

    /// The response body for this error.
    pub fn to_envelope(&self) -> Value {
        json!({
            "success": false,
            "error": self.kind == ErrorKind::Internal,
            "code": self.code,
            "message": self.message,
            "data": self.data,
        })
    }

    /// User-visible fails are not counted as errors in analytics.
    pub fn counts_as_error(&self) -> bool {
        self.kind == ErrorKind::Internal
    }

    /// True when the upstream rejected our credentials and the token
    /// manager should invalidate and re-mint.
    pub fn is_auth_error(&self) -> bool {
        self.data
            .get("isAuthError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl From<tokenpool::TokenPoolError> for ApiError {
    fn from(e: tokenpool::TokenPoolError) -> Self {
        use tokenpool::TokenPoolError;
        match e {
            TokenPoolError::NoRefreshToken => ApiError::internal("hytale.no_refresh_token"),
            TokenPoolError::AuthFailure { status } => ApiError::internal("hytale.auth_failure")
                .with_data(json!({ "status": status, "isAuthError": true })),
            TokenPoolError::NoProfiles => ApiError::internal("hytale.no_profiles"),
            TokenPoolError::SessionCreationFailed => {
                ApiError::internal("hytale.session_creation_failed")
            }
            TokenPoolError::AllSessionsRateLimited | TokenPoolError::UpstreamRateLimited => {
                ApiError::internal("hytale.rate_limited")
            }
            TokenPoolError::Upstream { status } => {
                ApiError::internal("hytale.api_failure").with_data(json!({ "status": status }))
            }
            TokenPoolError::Http(message) => {
                ApiError::internal("hytale.api_failure").with_data(json!({ "detail": message }))
            }
            TokenPoolError::Store(e) => {
                ApiError::internal("hytale.api_failure").with_data(json!({ "detail": e.to_string() }))
            }
            TokenPoolError::Internal(message) => {
                ApiError::internal("api.unknown_error").with_data(json!({ "detail": message }))
            }
        }
    }
}

/// One table for every code; specific codes first, shared suffixes after.
fn default_message(code: &str) -> &'static str {
    match code {
        "api.404" => "Not found",
        "api.unknown_error" => "An unknown error occurred",
        "minecraft.invalid_username" => "Invalid username",
        "steam.invalid_id" => "Invalid Steam ID or vanity URL",
        "xbox.not_found" => "No Xbox Live account matched that query",
        "xbox.bad_response" => "The Xbox API returned an error for that query",
        "xbox.bad_response_code" => "The Xbox API returned an unexpected response code",
        "hytale.not_found" => "No Hytale player matched that query",
        "hytale.invalid_identifier" => "Invalid Hytale username or UUID",
        "hytale.auth_failure" => "Authentication with the Hytale API failed",
        "hytale.no_refresh_token" => "No Hytale refresh token is configured",
        "hytale.no_profiles" => "The Hytale account has no profiles",
        "hytale.session_creation_failed" => "Could not create a Hytale game session",
        _ => match code.rsplit('.').next() {
            Some("api_failure") => "The upstream API did not return a usable response",
            Some("rate_limited") => "Rate limited by the upstream API, try again shortly",
            Some("non_json") => "The upstream API returned a non-JSON response",
            _ => "Request failed",
        },
    }
}
