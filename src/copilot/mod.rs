//! GitHub Copilot chat integration
//!
//! Talks to the Copilot chat API directly over HTTPS:
//!
//! - sign-in through the GitHub OAuth device flow, with the token cached in
//!   ~/.config/github-copilot/hosts.json (shared with copilot.vim/copilot.lua)
//! - exchange of the GitHub token for a short-lived Copilot session token
//! - streaming chat completions and embeddings

pub mod auth;
pub mod client;
pub mod types;

pub use auth::{load_token, PollClock, SystemClock};
pub use client::{AskRequest, CopilotClient};
pub use types::*;
