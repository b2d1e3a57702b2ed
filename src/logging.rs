//! Log output
//!
//! Stdout carries the RPC channel, so logs go to
//! `{state_dir}/copilot-chat/copilot-chat.log`, or stderr when that file
//! cannot be opened. `COPILOT_CHAT_LOG` takes an env-filter directive
//! (default `info`).

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "COPILOT_CHAT_LOG";

pub fn log_path() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join("copilot-chat").join("copilot-chat.log"))
}

fn open_log_file(path: &PathBuf) -> io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    let file = log_path().and_then(|path| open_log_file(&path).ok());
    let _ = match file {
        Some(file) => builder.with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(io::stderr).try_init(),
    };
}
