//! Routing of buffer key mappings and autocommands back into the plugin
//!
//! The host can only call back into a remote plugin through commands, so a
//! mapping whose right-hand side is a plugin action is registered as
//! `<cmd>{mapping_command} {bufnr} {lhs}<CR>` and remembered here. When the
//! command arrives, [`Keymapper::execute`] hands back the stored action.
//! Autocommands work the same way through `{autocmd_command} {event} {id} {bufnr}`.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, warn};

use super::{BufferId, Host, LogLevel};

/// Right-hand side of a buffer mapping
#[derive(Debug, Clone)]
pub enum Rhs<A> {
    /// Plain key sequence or `<cmd>...<CR>` handled by the host itself
    Keys(String),
    /// Plugin action routed back through the mapping command
    Action(A),
}

/// Replace `<` and `>` so the key survives as a single command argument
pub fn escape_lhs(lhs: &str) -> String {
    lhs.replace('<', "_").replace('>', "_")
}

/// Buffer-local key mappings that call back into the plugin
#[derive(Debug)]
pub struct Keymapper<A> {
    command: String,
    callbacks: HashMap<(BufferId, String), A>,
}

impl<A: Clone> Keymapper<A> {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            callbacks: HashMap::new(),
        }
    }

    /// Map `lhs` in `mode` for `buffer`. A later mapping of the same key replaces the earlier one.
    pub fn buf_set(
        &mut self,
        host: &mut dyn Host,
        buffer: BufferId,
        mode: &str,
        lhs: &str,
        rhs: Rhs<A>,
    ) -> Result<()> {
        let rhs = match rhs {
            Rhs::Keys(keys) => keys,
            Rhs::Action(action) => {
                let escaped = escape_lhs(lhs);
                let rhs = format!("<cmd>{} {} {}<CR>", self.command, buffer, escaped);
                self.callbacks.insert((buffer, escaped), action);
                rhs
            }
        };
        host.buf_set_keymap(buffer, mode, lhs, &rhs)
    }

    /// Look up the action behind an escaped mapping
    pub fn execute(&self, buffer: BufferId, mapping: &str) -> Option<A> {
        let action = self.callbacks.get(&(buffer, mapping.to_string())).cloned();
        if action.is_none() {
            debug!(buffer = buffer.0, mapping, "no callback for mapping");
        }
        action
    }
}

/// Buffer-local autocommands that call back into the plugin
#[derive(Debug)]
pub struct AutocmdMapper<A> {
    command: String,
    callbacks: HashMap<(String, String, BufferId), A>,
}

impl<A: Clone> AutocmdMapper<A> {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            callbacks: HashMap::new(),
        }
    }

    /// Register `action` for each of `events` on `buffer` under the callback name `id`
    pub fn buf_set(
        &mut self,
        host: &mut dyn Host,
        events: &[&str],
        id: &str,
        buffer: BufferId,
        action: A,
    ) -> Result<()> {
        for event in events {
            let key = (event.to_string(), id.to_string(), buffer);
            // Only the first registration creates the host autocmd; later ones swap the action
            let is_new = self.callbacks.insert(key, action.clone()).is_none();
            if is_new {
                let command = format!("{} {} {} {}", self.command, event, id, buffer);
                host.create_autocmd(event, buffer, &command)?;
            }
        }
        Ok(())
    }

    pub fn execute(&self, event: &str, id: &str, buffer: BufferId) -> Option<A> {
        self.callbacks
            .get(&(event.to_string(), id.to_string(), buffer))
            .cloned()
    }
}

/// Both callback registries, shared by everything that owns buffers
#[derive(Debug)]
pub struct Dispatcher<A> {
    pub keymaps: Keymapper<A>,
    pub autocmds: AutocmdMapper<A>,
}

impl<A: Clone> Dispatcher<A> {
    pub fn new(mapping_command: &str, autocmd_command: &str) -> Self {
        Self {
            keymaps: Keymapper::new(mapping_command),
            autocmds: AutocmdMapper::new(autocmd_command),
        }
    }

    /// Map an action on `buffer` for one or more modes
    pub fn map(
        &mut self,
        host: &mut dyn Host,
        buffer: BufferId,
        modes: &[&str],
        lhs: &str,
        action: A,
    ) -> Result<()> {
        for mode in modes {
            self.keymaps
                .buf_set(host, buffer, mode, lhs, Rhs::Action(action.clone()))?;
        }
        Ok(())
    }

    pub fn autocmd(
        &mut self,
        host: &mut dyn Host,
        buffer: BufferId,
        events: &[&str],
        id: &str,
        action: A,
    ) -> Result<()> {
        self.autocmds.buf_set(host, events, id, buffer, action)
    }

    /// Resolve a mapping callback, notifying the user when it is unknown
    pub fn resolve_mapping(
        &self,
        host: &mut dyn Host,
        buffer: BufferId,
        mapping: &str,
    ) -> Result<Option<A>> {
        let action = self.keymaps.execute(buffer, mapping);
        if action.is_none() {
            warn!(buffer = buffer.0, mapping, "unknown mapping callback");
            host.notify(&format!("KeyError: {} {}", buffer, mapping), LogLevel::Warn)?;
        }
        Ok(action)
    }

    /// Resolve an autocmd callback, notifying the user when it is unknown
    pub fn resolve_autocmd(
        &self,
        host: &mut dyn Host,
        event: &str,
        id: &str,
        buffer: BufferId,
    ) -> Result<Option<A>> {
        let action = self.autocmds.execute(event, id, buffer);
        if action.is_none() {
            warn!(event, id, buffer = buffer.0, "unknown autocmd callback");
            host.notify(&format!("KeyError: {} {} {}", event, id, buffer), LogLevel::Warn)?;
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FakeHost;

    #[derive(Debug, Clone, PartialEq)]
    enum TestAction {
        Close,
        Submit,
        Entered,
    }

    #[test]
    fn test_escape_lhs() {
        assert_eq!(escape_lhs("<C-CR>"), "_C-CR_");
        assert_eq!(escape_lhs("q"), "q");
    }

    #[test]
    fn test_action_mapping_routes_through_command() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut keymaps = Keymapper::new("CopilotChatMapping");

        keymaps
            .buf_set(&mut host, buf, "n", "<CR>", Rhs::Action(TestAction::Submit))
            .unwrap();

        let rhs = host.keymap(buf, "n", "<CR>").unwrap();
        assert_eq!(rhs, format!("<cmd>CopilotChatMapping {} _CR_<CR>", buf));
        assert_eq!(keymaps.execute(buf, "_CR_"), Some(TestAction::Submit));
        assert_eq!(keymaps.execute(buf, "_C-CR_"), None);
    }

    #[test]
    fn test_plain_keys_are_not_tracked() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut keymaps: Keymapper<TestAction> = Keymapper::new("CopilotChatMapping");

        keymaps
            .buf_set(&mut host, buf, "n", "x", Rhs::Keys("<Nop>".to_string()))
            .unwrap();

        assert_eq!(host.keymap(buf, "n", "x").as_deref(), Some("<Nop>"));
        assert_eq!(keymaps.execute(buf, "x"), None);
    }

    #[test]
    fn test_remap_replaces_action() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut dispatcher = Dispatcher::new("Map", "Au");

        dispatcher.map(&mut host, buf, &["n"], "q", TestAction::Submit).unwrap();
        dispatcher.map(&mut host, buf, &["n"], "q", TestAction::Close).unwrap();

        assert_eq!(dispatcher.keymaps.execute(buf, "q"), Some(TestAction::Close));
    }

    #[test]
    fn test_autocmd_registered_once_per_key() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut dispatcher = Dispatcher::new("Map", "Au");

        dispatcher
            .autocmd(&mut host, buf, &["BufEnter"], "last_popup", TestAction::Entered)
            .unwrap();
        dispatcher
            .autocmd(&mut host, buf, &["BufEnter"], "last_popup", TestAction::Entered)
            .unwrap();

        assert_eq!(host.autocmds().len(), 1);
        assert_eq!(host.autocmds()[0].2, format!("Au BufEnter last_popup {}", buf));
        assert_eq!(
            dispatcher.autocmds.execute("BufEnter", "last_popup", buf),
            Some(TestAction::Entered)
        );
    }

    #[test]
    fn test_unknown_callback_notifies() {
        let mut host = FakeHost::new();
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new("Map", "Au");

        let action = dispatcher
            .resolve_mapping(&mut host, BufferId(99), "q")
            .unwrap();

        assert!(action.is_none());
        assert_eq!(host.notifications().len(), 1);
        assert!(host.notifications()[0].0.contains("KeyError"));
    }
}
