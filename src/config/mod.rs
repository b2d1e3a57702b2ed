//! Configuration system for copilot-chat
//!
//! Loads settings from ~/.config/copilot-chat/config.toml, then lets the
//! `g:copilot_chat_*` globals of the running editor override them. Globals
//! are re-read for every command, so changing one takes effect immediately.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::host::{global_var, Host, Value};

/// Fallback when the configured temperature is unusable
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

/// Main settings structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chat: ChatSettings,
    pub ui: UiSettings,
    pub network: NetworkSettings,
}

/// Chat behavior settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Model used by :CopilotChat (default: gpt-4)
    pub model: String,
    /// Sampling temperature, 0 to 1 (default: 0.1)
    pub temperature: Temperature,
    /// Language Copilot should answer in (default: unset)
    pub language: String,
    /// Write the short separators only (default: false)
    pub disable_separators: bool,
    /// Replace the system prompt in the chat buffer by a placeholder (default: false)
    pub hide_system_prompt: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: Temperature::Number(DEFAULT_TEMPERATURE),
            language: String::new(),
            disable_separators: false,
            hide_system_prompt: false,
        }
    }
}

/// Temperature as configured; validated when a chat starts
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Temperature {
    Number(f64),
    Text(String),
}

impl Temperature {
    /// The temperature if it is a number between 0 and 1
    pub fn validate(&self) -> Option<f64> {
        let value = match self {
            Temperature::Number(value) => *value,
            Temperature::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        (0.0..=1.0).contains(&value).then_some(value)
    }
}

/// In-place chat layout settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Show the help popup in the in-place chat (default: true)
    pub show_help: bool,
    /// Prompts cycled with <C-n>/<C-p> in the in-place chat
    pub user_prompts: Vec<UserPrompt>,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            show_help: true,
            user_prompts: Vec::new(),
        }
    }
}

/// A named canned prompt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserPrompt {
    pub name: String,
    pub prompt: String,
}

/// Network settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Proxy for all requests; only used when it contains "://"
    /// (default: $HTTPS_PROXY, then $ALL_PROXY)
    pub proxy: String,
}

impl NetworkSettings {
    pub fn proxy(&self) -> Option<&str> {
        if !self.proxy.is_empty() {
            return Some(&self.proxy);
        }
        None
    }
}

/// Get the path to the config file
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/copilot-chat/config.toml"))
}

/// Load settings from the default config file, falling back to defaults
pub fn load_config() -> Settings {
    let mut settings = match config_path() {
        Some(path) => load_config_from(&path),
        None => Settings::default(),
    };
    if settings.network.proxy.is_empty() {
        settings.network.proxy = std::env::var("HTTPS_PROXY")
            .or_else(|_| std::env::var("ALL_PROXY"))
            .unwrap_or_default();
    }
    settings
}

pub fn load_config_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str::<Settings>(&content) {
            Ok(settings) => {
                debug!(path = %path.display(), "loaded config");
                settings
            }
            Err(e) => {
                warn!("Failed to parse config file: {}", e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config file: {}", e);
            Settings::default()
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.as_str().unwrap_or_default().to_string(),
        other => other.to_string(),
    }
}

/// Flags are set from Vimscript as "yes"/"no"; numbers and booleans work too
fn value_to_flag(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Integer(i) => i.as_i64().unwrap_or(0) != 0,
        other => value_to_string(other) == "yes",
    }
}

fn value_to_temperature(value: &Value) -> Temperature {
    match value.as_f64().or_else(|| value.as_i64().map(|i| i as f64)) {
        Some(number) => Temperature::Number(number),
        None => Temperature::Text(value_to_string(value)),
    }
}

/// `{name: prompt}` dictionary, in the editor's key order
fn value_to_user_prompts(value: &Value) -> Vec<UserPrompt> {
    let Some(entries) = value.as_map() else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|(name, prompt)| UserPrompt {
            name: value_to_string(name),
            prompt: value_to_string(prompt),
        })
        .collect()
}

impl Settings {
    /// Apply every `g:copilot_chat_*` global that is set
    pub fn overlay_globals(&mut self, host: &mut dyn Host) -> Result<()> {
        if let Some(v) = global_var(host, "copilot_chat_language")? {
            self.chat.language = value_to_string(&v);
        }
        if let Some(v) = global_var(host, "copilot_chat_temperature")? {
            self.chat.temperature = value_to_temperature(&v);
        }
        if let Some(v) = global_var(host, "copilot_chat_proxy")? {
            self.network.proxy = value_to_string(&v);
        }
        if let Some(v) = global_var(host, "copilot_chat_disable_separators")? {
            self.chat.disable_separators = value_to_flag(&v);
        }
        if let Some(v) = global_var(host, "copilot_chat_hide_system_prompt")? {
            self.chat.hide_system_prompt = value_to_flag(&v);
        }
        if let Some(v) = global_var(host, "copilot_chat_show_help")? {
            self.ui.show_help = value_to_flag(&v);
        }
        if let Some(v) = global_var(host, "copilot_chat_user_prompts")? {
            self.ui.user_prompts = value_to_user_prompts(&v);
        }
        Ok(())
    }

    /// Settings with the current globals applied
    pub fn effective(&self, host: &mut dyn Host) -> Result<Settings> {
        let mut settings = self.clone();
        settings.overlay_globals(host)?;
        Ok(settings)
    }
}
