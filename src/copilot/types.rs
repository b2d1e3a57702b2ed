//! Wire types for the GitHub device flow and the Copilot chat API

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One chat message, as sent to the completions endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub role: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: "user".to_string(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: "system".to_string(),
        }
    }
}

/// Body of a chat completions request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub intent: bool,
    pub model: String,
    pub n: u32,
    pub stream: bool,
    pub temperature: f64,
    pub top_p: u32,
    pub messages: Vec<Message>,
}

/// Response of `POST /login/device/code`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    /// Code the client polls with
    pub device_code: String,
    /// Code the user types on the verification page
    pub user_code: String,
    /// Page where the user authorizes the device
    pub verification_uri: String,
    /// Seconds until the device code expires
    pub expires_in: u64,
    /// Minimum seconds between polls
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Response of `POST /login/oauth/access_token`
#[derive(Clone, Deserialize)]
pub struct AccessTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// `authorization_pending`, `slow_down`, `expired_token`, `access_denied`, ...
    #[serde(default)]
    pub error: Option<String>,
    /// New minimum interval sent along with `slow_down`
    #[serde(default)]
    pub interval: Option<u64>,
}

// Debug without the token
impl std::fmt::Debug for AccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("error", &self.error)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Short-lived Copilot API token from `copilot_internal/v2/token`
#[derive(Clone, Deserialize)]
pub struct SessionToken {
    pub token: String,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

impl SessionToken {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A file (or part of one) to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExtract {
    pub filepath: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub input: Vec<String>,
    pub model: String,
}

/// Result of one poll of the device flow
#[derive(Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The user has not finished authorizing yet
    Pending,
    /// Polling too fast; wait this many seconds from now on
    SlowDown(u64),
    /// Authorized: (access token, token type)
    Authorized { access_token: String, token_type: String },
}

impl std::fmt::Debug for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollOutcome::Pending => write!(f, "Pending"),
            PollOutcome::SlowDown(interval) => write!(f, "SlowDown({})", interval),
            PollOutcome::Authorized { token_type, .. } => f
                .debug_struct("Authorized")
                .field("access_token", &"[REDACTED]")
                .field("token_type", token_type)
                .finish(),
        }
    }
}

/// Errors from the GitHub login flow and the token cache
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication timed out. Please try again.")]
    Timeout,
    #[error("Authentication failed: {0}")]
    Denied(String),
    #[error("No GitHub token found. Run :CopilotChat to sign in.")]
    NoToken,
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("token cache: {0}")]
    Cache(String),
}

/// Errors from chat and embeddings requests
#[derive(Debug, Error)]
pub enum ChatError {
    /// Non-200 reply; the message is shown to the user as is
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("No choices on {0}")]
    MissingChoices(String),
    #[error("Error fetching embeddings: {0}")]
    Embeddings(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
    /// The consumer of the streamed deltas failed
    #[error(transparent)]
    Sink(anyhow::Error),
}

impl ChatError {
    /// Map an HTTP status to the message shown to the user
    pub fn from_status(status: u16) -> Self {
        let message = match status {
            401 => "Unauthorized. Make sure you have access to Copilot Chat.".to_string(),
            500 => "Internal server error. Please try again later.".to_string(),
            400 => "The developer of this plugin has made a mistake. Please report this issue."
                .to_string(),
            419 => "You have been rate limited. Please try again later.".to_string(),
            other => format!("Unknown error: {}", other),
        };
        ChatError::Status { status, message }
    }
}
