pub mod chat;
pub mod config;
pub mod copilot;
pub mod handlers;
pub mod host;
pub mod logging;
pub mod plugin;
pub mod prompts;
pub mod ui;

pub use chat::{ChatBackend, ChatHandler, ChatSession};
pub use config::{load_config, Settings};
pub use copilot::CopilotClient;
pub use handlers::{InPlaceChatHandler, VSplitChatHandler};
pub use host::{FakeHost, Host, RpcHost};
pub use plugin::{Command, CopilotPlugin};
pub use prompts::PromptRegistry;
