//! Command routing
//!
//! The Lua side defines the user commands and forwards each invocation as an
//! RPC notification named after the command, with params `[args, range]`.
//! Key mappings and autocommands created by the plugin come back the same
//! way through the two internal commands.

use std::rc::Rc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatBackend, ChatSession};
use crate::config::Settings;
use crate::handlers::{InPlaceAction, InPlaceChatHandler, VSplitChatHandler};
use crate::host::{BufferId, Dispatcher, Host, LogLevel, Value};
use crate::prompts::PromptRegistry;
use crate::ui::PopupEvent;

pub const PLUGIN_MAPPING_CMD: &str = "CopilotChatMapping";
pub const PLUGIN_AUTOCMD_CMD: &str = "CopilotChatAutocmd";

/// Everything a mapping or autocommand can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Popup(PopupEvent),
    InPlace(InPlaceAction),
}

impl From<PopupEvent> for Action {
    fn from(event: PopupEvent) -> Self {
        Action::Popup(event)
    }
}

impl From<InPlaceAction> for Action {
    fn from(action: InPlaceAction) -> Self {
        Action::InPlace(action)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command}: missing argument {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("{command}: invalid {argument} {value:?}")]
    InvalidArgument {
        command: &'static str,
        argument: &'static str,
        value: String,
    },
}

/// A user or internal command, decoded from its notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `:CopilotChat {prompt}`, about the unnamed register
    Chat { prompt: String },
    /// `:'<,'>CopilotChatVisual {prompt}`
    Visual { prompt: String, range: (i64, i64) },
    VsplitToggle,
    Reset,
    /// `:'<,'>CopilotChatInPlace`
    InPlace { range: (i64, i64) },
    Mapping { buffer: BufferId, lhs: String },
    Autocmd { event: String, id: String, buffer: BufferId },
}

fn value_to_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

fn string_args(params: &[Value]) -> Vec<String> {
    match params.first() {
        Some(Value::Array(args)) => args.iter().map(value_to_string).collect(),
        Some(Value::String(s)) => vec![s.as_str().unwrap_or_default().to_string()],
        _ => Vec::new(),
    }
}

/// `[line1, line2]`; the current line when missing
fn range_arg(params: &[Value]) -> (i64, i64) {
    let bounds = params
        .get(1)
        .and_then(Value::as_array)
        .map(|range| range.iter().filter_map(Value::as_i64).collect::<Vec<_>>())
        .unwrap_or_default();
    match bounds.as_slice() {
        [start, end, ..] => (*start, *end),
        [line] => (*line, *line),
        [] => (1, 1),
    }
}

fn buffer_arg(command: &'static str, raw: &str) -> Result<BufferId, CommandError> {
    raw.parse()
        .map(BufferId)
        .map_err(|_| CommandError::InvalidArgument {
            command,
            argument: "bufnr",
            value: raw.to_string(),
        })
}

impl Command {
    pub fn parse(method: &str, params: &[Value]) -> Result<Self, CommandError> {
        let args = string_args(params);
        let missing = |command, argument| CommandError::MissingArgument { command, argument };

        match method {
            "CopilotChat" => {
                if args.is_empty() {
                    return Err(missing("CopilotChat", "prompt"));
                }
                Ok(Command::Chat {
                    prompt: args.join(" "),
                })
            }
            "CopilotChatVisual" => {
                if args.is_empty() {
                    return Err(missing("CopilotChatVisual", "prompt"));
                }
                Ok(Command::Visual {
                    prompt: args.join(" "),
                    range: range_arg(params),
                })
            }
            "CopilotChatVsplitToggle" => Ok(Command::VsplitToggle),
            "CopilotChatReset" => Ok(Command::Reset),
            "CopilotChatInPlace" => Ok(Command::InPlace {
                range: range_arg(params),
            }),
            PLUGIN_MAPPING_CMD => match args.as_slice() {
                [bufnr, lhs] => Ok(Command::Mapping {
                    buffer: buffer_arg(PLUGIN_MAPPING_CMD, bufnr)?,
                    lhs: lhs.clone(),
                }),
                _ => Err(missing(PLUGIN_MAPPING_CMD, "bufnr mapping")),
            },
            PLUGIN_AUTOCMD_CMD => match args.as_slice() {
                [event, id, bufnr] => Ok(Command::Autocmd {
                    event: event.clone(),
                    id: id.clone(),
                    buffer: buffer_arg(PLUGIN_AUTOCMD_CMD, bufnr)?,
                }),
                _ => Err(missing(PLUGIN_AUTOCMD_CMD, "event id bufnr")),
            },
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Creates chat backends for every handler of the plugin
pub type SharedConnector = Rc<dyn Fn(&Settings) -> Result<Box<dyn ChatBackend>>>;

pub struct CopilotPlugin {
    settings: Settings,
    prompts: PromptRegistry,
    dispatcher: Dispatcher<Action>,
    session: ChatSession,
    vsplit: Option<VSplitChatHandler>,
    inplace: Option<InPlaceChatHandler>,
    connector: Option<SharedConnector>,
}

impl CopilotPlugin {
    /// `settings`: as loaded from the config file; globals are applied per command
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            prompts: PromptRegistry::builtin(),
            dispatcher: Dispatcher::new(PLUGIN_MAPPING_CMD, PLUGIN_AUTOCMD_CMD),
            session: ChatSession::default(),
            vsplit: None,
            inplace: None,
            connector: None,
        }
    }

    /// Use `connector` instead of the Copilot client for every chat handler
    pub fn with_connector(
        mut self,
        connector: impl Fn(&Settings) -> Result<Box<dyn ChatBackend>> + 'static,
    ) -> Self {
        self.connector = Some(Rc::new(connector));
        self
    }

    pub fn vsplit_handler(&self) -> Option<&VSplitChatHandler> {
        self.vsplit.as_ref()
    }

    pub fn inplace_handler(&self) -> Option<&InPlaceChatHandler> {
        self.inplace.as_ref()
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Handle one notification. Failures are logged and shown to the user.
    pub fn handle_notification(&mut self, host: &mut dyn Host, method: &str, params: &[Value]) {
        if let Err(e) = self.dispatch(host, method, params) {
            error!(method, "command failed: {:#}", e);
            if let Err(notify_err) = host.notify(&format!("CopilotChat: {:#}", e), LogLevel::Error) {
                warn!("failed to report error: {}", notify_err);
            }
        }
    }

    fn dispatch(&mut self, host: &mut dyn Host, method: &str, params: &[Value]) -> Result<()> {
        let command = Command::parse(method, params)?;
        debug!(?command, "command");
        self.run(host, command)
    }

    pub fn run(&mut self, host: &mut dyn Host, command: Command) -> Result<()> {
        match command {
            Command::Chat { prompt } => {
                let settings = self.settings.effective(host)?;
                let filetype = current_filetype(host)?;
                let code = value_to_string(&host.eval("getreg('\"')")?);
                let vsplit = ensure_vsplit(&mut self.vsplit, host, &self.prompts, &self.connector)?;
                vsplit.vsplit(host)?;
                vsplit.chat(host, &mut self.session, &settings, &prompt, &filetype, &code)
            }
            Command::Visual { prompt, range } => {
                let settings = self.settings.effective(host)?;
                let filetype = current_filetype(host)?;
                let code = range_text(host, range)?;
                let vsplit = ensure_vsplit(&mut self.vsplit, host, &self.prompts, &self.connector)?;
                vsplit.vsplit(host)?;
                vsplit.chat(host, &mut self.session, &settings, &prompt, &filetype, &code)
            }
            Command::VsplitToggle => {
                ensure_vsplit(&mut self.vsplit, host, &self.prompts, &self.connector)?
                    .toggle_vsplit(host)
            }
            Command::Reset => match self.vsplit.as_mut() {
                Some(vsplit) => vsplit.reset(host),
                None => Ok(()),
            },
            Command::InPlace { range } => {
                let settings = self.settings.effective(host)?;
                let filetype = current_filetype(host)?;
                let code = range_text(host, range)?;
                let user_buffer = host.get_current_buf()?;
                let inplace = ensure_inplace(
                    &mut self.inplace,
                    host,
                    &mut self.dispatcher,
                    &settings,
                    &self.prompts,
                    &self.connector,
                )?;
                inplace.mount(host, &code, &filetype, range, user_buffer)
            }
            Command::Mapping { buffer, lhs } => {
                match self.dispatcher.resolve_mapping(host, buffer, &lhs)? {
                    Some(action) => self.perform(host, action),
                    None => Ok(()),
                }
            }
            Command::Autocmd { event, id, buffer } => {
                match self.dispatcher.resolve_autocmd(host, &event, &id, buffer)? {
                    Some(action) => self.perform(host, action),
                    None => Ok(()),
                }
            }
        }
    }

    fn perform(&mut self, host: &mut dyn Host, action: Action) -> Result<()> {
        let Some(inplace) = self.inplace.as_mut() else {
            debug!(?action, "no in-place chat for action");
            return Ok(());
        };
        match action {
            Action::Popup(event) => inplace.handle_popup_event(host, event),
            Action::InPlace(action) => {
                let settings = self.settings.effective(host)?;
                inplace.handle(host, &mut self.dispatcher, &mut self.session, &settings, action)
            }
        }
    }
}

/// The vsplit chat, created on first use
fn ensure_vsplit<'a>(
    slot: &'a mut Option<VSplitChatHandler>,
    host: &mut dyn Host,
    prompts: &PromptRegistry,
    connector: &Option<SharedConnector>,
) -> Result<&'a mut VSplitChatHandler> {
    let handler = match slot.take() {
        Some(handler) => handler,
        None => {
            let mut handler = VSplitChatHandler::new(host, prompts.clone())?;
            if let Some(connector) = connector.clone() {
                handler
                    .chat_handler()
                    .set_connector(move |settings: &Settings| connector(settings));
            }
            info!("created vsplit chat");
            handler
        }
    };
    Ok(slot.insert(handler))
}

/// The in-place chat, created on first use
fn ensure_inplace<'a>(
    slot: &'a mut Option<InPlaceChatHandler>,
    host: &mut dyn Host,
    dispatcher: &mut Dispatcher<Action>,
    settings: &Settings,
    prompts: &PromptRegistry,
    connector: &Option<SharedConnector>,
) -> Result<&'a mut InPlaceChatHandler> {
    let handler = match slot.take() {
        Some(handler) => handler,
        None => {
            let mut handler = InPlaceChatHandler::new(host, dispatcher, settings, prompts.clone())?;
            if let Some(connector) = connector.clone() {
                handler
                    .chat_handler()
                    .set_connector(move |settings: &Settings| connector(settings));
            }
            info!("created in-place chat");
            handler
        }
    };
    Ok(slot.insert(handler))
}

fn current_filetype(host: &mut dyn Host) -> Result<String> {
    let buffer = host.get_current_buf()?;
    Ok(value_to_string(&host.buf_get_option(buffer, "filetype")?))
}

/// Lines `start..=end` (1-based) of the current buffer
fn range_text(host: &mut dyn Host, (start, end): (i64, i64)) -> Result<String> {
    let buffer = host.get_current_buf()?;
    Ok(host.buf_get_lines(buffer, start - 1, end)?.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Value {
        Value::Array(values.iter().map(|v| Value::from(*v)).collect())
    }

    fn range(start: i64, end: i64) -> Value {
        Value::Array(vec![Value::from(start), Value::from(end)])
    }

    #[test]
    fn test_parse_user_commands() {
        assert_eq!(
            Command::parse("CopilotChat", &[args(&["Explain this"]), range(1, 1)]),
            Ok(Command::Chat {
                prompt: "Explain this".to_string()
            })
        );
        assert_eq!(
            Command::parse("CopilotChatVisual", &[args(&["Fix", "it"]), range(3, 7)]),
            Ok(Command::Visual {
                prompt: "Fix it".to_string(),
                range: (3, 7)
            })
        );
        assert_eq!(
            Command::parse("CopilotChatInPlace", &[args(&[]), range(2, 4)]),
            Ok(Command::InPlace { range: (2, 4) })
        );
        assert_eq!(Command::parse("CopilotChatReset", &[]), Ok(Command::Reset));
        assert_eq!(
            Command::parse("CopilotChatVsplitToggle", &[]),
            Ok(Command::VsplitToggle)
        );
    }

    #[test]
    fn test_parse_internal_commands() {
        assert_eq!(
            Command::parse(PLUGIN_MAPPING_CMD, &[args(&["12", "_C-CR_"])]),
            Ok(Command::Mapping {
                buffer: BufferId(12),
                lhs: "_C-CR_".to_string()
            })
        );
        assert_eq!(
            Command::parse(PLUGIN_AUTOCMD_CMD, &[args(&["BufEnter", "update_last_popup", "5"])]),
            Ok(Command::Autocmd {
                event: "BufEnter".to_string(),
                id: "update_last_popup".to_string(),
                buffer: BufferId(5)
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Command::parse("CopilotChat", &[args(&[])]),
            Err(CommandError::MissingArgument {
                command: "CopilotChat",
                argument: "prompt"
            })
        );
        assert!(matches!(
            Command::parse(PLUGIN_MAPPING_CMD, &[args(&["x", "q"])]),
            Err(CommandError::InvalidArgument { .. })
        ));
        assert_eq!(
            Command::parse("CopilotChatNope", &[]),
            Err(CommandError::Unknown("CopilotChatNope".to_string()))
        );
    }

    #[test]
    fn test_range_defaults() {
        assert_eq!(range_arg(&[args(&[])]), (1, 1));
        assert_eq!(range_arg(&[args(&[]), Value::Array(vec![Value::from(9)])]), (9, 9));
    }
}
