//! Chat in a vertical split next to the code

use anyhow::Result;
use tracing::debug;

use crate::chat::{ChatHandler, ChatInput, ChatSession};
use crate::config::Settings;
use crate::host::{BufferId, Host, Value, WindowId};
use crate::prompts::PromptRegistry;

/// Window variable marking the chat split
const CHAT_WINDOW_VAR: &str = "copilot_chat";

pub struct VSplitChatHandler {
    chat: ChatHandler,
}

impl VSplitChatHandler {
    pub fn new(host: &mut dyn Host, prompts: PromptRegistry) -> Result<Self> {
        let buffer = host.create_buf(false, true)?;
        host.buf_set_option(buffer, "filetype", Value::from("copilot-chat"))?;
        Ok(Self {
            chat: ChatHandler::new(buffer, prompts),
        })
    }

    pub fn buffer(&self) -> BufferId {
        self.chat.buffer()
    }

    pub fn chat_handler(&mut self) -> &mut ChatHandler {
        &mut self.chat
    }

    /// Window currently showing the chat, if any
    pub fn chat_window(&self, host: &mut dyn Host) -> Result<Option<WindowId>> {
        for window in host.list_wins()? {
            let tagged = host
                .win_get_var(window, CHAT_WINDOW_VAR)?
                .map_or(false, |value| is_truthy(&value));
            if tagged {
                return Ok(Some(window));
            }
        }
        Ok(None)
    }

    /// Focus the chat split, opening it when there is none
    pub fn vsplit(&mut self, host: &mut dyn Host) -> Result<()> {
        let buffer = self.buffer();
        host.buf_set_option(buffer, "filetype", Value::from("copilot-chat"))?;
        if let Some(window) = self.chat_window(host)? {
            return host.set_current_win(window);
        }

        host.command(&format!("vsplit | buffer {}", buffer))?;
        let window = host.get_current_win()?;
        host.win_set_option(window, "wrap", Value::from(true))?;
        host.win_set_option(window, "linebreak", Value::from(true))?;
        host.win_set_option(window, "conceallevel", Value::from(2))?;
        host.win_set_option(window, "concealcursor", Value::from("n"))?;
        host.win_set_var(window, CHAT_WINDOW_VAR, Value::from(true))?;

        host.command(":lua vim.diagnostic.disable()")?;
        debug!(window = window.0, "opened chat split");
        Ok(())
    }

    /// Close the chat split if it is open, open it otherwise
    pub fn toggle_vsplit(&mut self, host: &mut dyn Host) -> Result<()> {
        if let Some(window) = self.chat_window(host)? {
            debug!(window = window.0, "closing chat split");
            return host.win_close(window, false);
        }
        self.vsplit(host)?;
        host.buf_set_option(self.buffer(), "filetype", Value::from("markdown"))
    }

    /// Chat in the current window, which shows the chat buffer
    pub fn chat(
        &mut self,
        host: &mut dyn Host,
        session: &mut ChatSession,
        settings: &Settings,
        prompt: &str,
        filetype: &str,
        code: &str,
    ) -> Result<()> {
        host.buf_set_option(self.buffer(), "filetype", Value::from("markdown"))?;
        let window = host.get_current_win()?;
        let input = ChatInput::new(prompt, filetype, code, window);
        self.chat.chat(host, session, settings, &input)
    }

    /// Forget the conversation and clear the buffer
    pub fn reset(&mut self, host: &mut dyn Host) -> Result<()> {
        self.chat.reset();
        host.buf_replace(self.buffer(), &[])
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::Integer(i) => i.as_i64().unwrap_or(0) != 0,
        Value::Nil => false,
        _ => true,
    }
}
