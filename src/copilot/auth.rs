//! GitHub token persistence and device-flow polling
//!
//! Tokens are stored in the location shared with copilot.vim/copilot.lua:
//! ~/.config/github-copilot/hosts.json (on macOS/Linux)
//!
//! The file format is compatible with other Copilot clients.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{AuthError, DeviceCode, PollOutcome};

/// Key of the github.com entry in hosts.json
pub const GITHUB_HOST: &str = "github.com";

/// Cached GitHub OAuth token
#[derive(Clone, Serialize, Deserialize)]
pub struct HostToken {
    /// GitHub login the token belongs to
    #[serde(default)]
    pub user: Option<String>,
    /// The OAuth token string
    pub oauth_token: String,
}

// Debug without the token
impl std::fmt::Debug for HostToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostToken")
            .field("user", &self.user)
            .field("oauth_token", &"[REDACTED]")
            .finish()
    }
}

/// hosts.json file structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostsJson {
    /// Map of host names to tokens, typically just "github.com"
    #[serde(flatten)]
    pub hosts: HashMap<String, HostToken>,
}

/// Get the path to the Copilot config directory
pub fn copilot_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config/github-copilot"))
}

/// Get the path to the hosts.json token file
pub fn hosts_json_path() -> Option<PathBuf> {
    copilot_config_dir().map(|d| d.join("hosts.json"))
}

/// Load the github.com OAuth token from the default location
pub fn load_token() -> Result<Option<String>, AuthError> {
    match hosts_json_path() {
        Some(path) => load_token_from(&path),
        None => Ok(None),
    }
}

pub fn load_token_from(path: &Path) -> Result<Option<String>, AuthError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| AuthError::Cache(format!("{}: {}", path.display(), e)))?;
    let hosts: HostsJson = serde_json::from_str(&content)?;

    Ok(hosts.hosts.get(GITHUB_HOST).map(|t| t.oauth_token.clone()))
}

/// Save the github.com token to the default location
pub fn save_token(user: &str, token: &str) -> Result<(), AuthError> {
    let path = hosts_json_path()
        .ok_or_else(|| AuthError::Cache("Cannot determine config directory".to_string()))?;
    save_token_to(&path, user, token)
}

pub fn save_token_to(path: &Path, user: &str, token: &str) -> Result<(), AuthError> {
    let cache_err = |e: std::io::Error| AuthError::Cache(format!("{}: {}", path.display(), e));

    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(cache_err)?;
        }
    }

    // Keep entries written by other clients for other hosts
    let mut hosts = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(cache_err)?;
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        HostsJson::default()
    };

    hosts.hosts.insert(
        GITHUB_HOST.to_string(),
        HostToken {
            user: Some(user.to_string()),
            oauth_token: token.to_string(),
        },
    );

    let content = serde_json::to_string(&hosts)?;

    // Use atomic file creation with secure permissions on Unix to avoid TOCTOU race
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(cache_err)?;
        file.write_all(content.as_bytes()).map_err(cache_err)?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, &content).map_err(cache_err)?;
    }

    info!(user, "cached GitHub token");
    Ok(())
}

/// Time source for device-flow polling
pub trait PollClock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

/// Wall clock; sleeps the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl PollClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Poll until the user authorizes the device or the code expires.
///
/// Sleeps `interval` between polls (longer after a `slow_down`) and gives up
/// with [`AuthError::Timeout`] once `expires_in` has elapsed.
pub fn wait_for_authorization<C, F>(
    code: &DeviceCode,
    clock: &mut C,
    mut poll: F,
) -> Result<(String, String), AuthError>
where
    C: PollClock + ?Sized,
    F: FnMut(&str) -> Result<PollOutcome, AuthError>,
{
    let deadline = clock.now() + Duration::from_secs(code.expires_in);
    let mut interval = Duration::from_secs(code.interval);

    loop {
        match poll(&code.device_code)? {
            PollOutcome::Authorized {
                access_token,
                token_type,
            } => return Ok((access_token, token_type)),
            PollOutcome::SlowDown(seconds) => {
                debug!(seconds, "device flow asked to slow down");
                interval = Duration::from_secs(seconds);
            }
            PollOutcome::Pending => {}
        }

        clock.sleep(interval);
        if clock.now() >= deadline {
            return Err(AuthError::Timeout);
        }
    }
}
