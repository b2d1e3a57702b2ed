//! Chat orchestration
//!
//! A [`ChatHandler`] owns one chat buffer and the Copilot conversation
//! behind it. For each turn it writes a markdown start separator (with the
//! system prompt and code folded away), streams the answer in, and closes
//! with an end separator.

pub mod stream;

use anyhow::Result;
use tracing::{debug, info, trace, warn};

use crate::config::{Settings, DEFAULT_TEMPERATURE};
use crate::copilot::{
    self, AskRequest, AuthError, ChatError, CopilotClient, DeviceCode, PollClock, SystemClock,
};
use crate::host::{split_lines, BufferId, Host, LogLevel, WindowId};
use crate::prompts::PromptRegistry;

pub use stream::StreamSplicer;

pub const HIDDEN_SYSTEM_PROMPT: &str = "...System prompt hidden...";
pub const INVALID_TEMPERATURE: &str =
    "Invalid temperature value. Please provide a numeric value between 0 and 1.";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// State shared by every chat of one plugin instance
#[derive(Debug, Default)]
pub struct ChatSession {
    /// The long end separator is only written once per session
    pub has_shown_extra_info: bool,
}

/// The Copilot operations a chat turn needs
pub trait ChatBackend {
    fn is_signed_in(&self) -> bool;
    fn request_auth(&mut self) -> Result<DeviceCode, AuthError>;
    /// Block until the device code is authorized; returns the GitHub login
    fn complete_login(
        &mut self,
        code: &DeviceCode,
        clock: &mut dyn PollClock,
    ) -> Result<String, AuthError>;
    fn authenticate(&mut self) -> Result<(), ChatError>;
    fn ask(
        &mut self,
        request: &AskRequest<'_>,
        on_delta: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<String, ChatError>;
    fn reset(&mut self);
}

impl ChatBackend for CopilotClient {
    fn is_signed_in(&self) -> bool {
        CopilotClient::is_signed_in(self)
    }

    fn request_auth(&mut self) -> Result<DeviceCode, AuthError> {
        CopilotClient::request_auth(self)
    }

    fn complete_login(
        &mut self,
        code: &DeviceCode,
        clock: &mut dyn PollClock,
    ) -> Result<String, AuthError> {
        CopilotClient::complete_login(self, code, clock)
    }

    fn authenticate(&mut self) -> Result<(), ChatError> {
        CopilotClient::authenticate(self)
    }

    fn ask(
        &mut self,
        request: &AskRequest<'_>,
        on_delta: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<String, ChatError> {
        CopilotClient::ask(self, request, on_delta)
    }

    fn reset(&mut self) {
        CopilotClient::reset(self)
    }
}

/// Creates the backend on the first chat of a handler
pub type Connector = Box<dyn FnMut(&Settings) -> Result<Box<dyn ChatBackend>>>;

/// Copilot client with the cached GitHub token, if any
pub fn connect_copilot(settings: &Settings) -> Result<Box<dyn ChatBackend>> {
    let token = copilot::load_token()?;
    let client = CopilotClient::new(token, settings.network.proxy())?;
    Ok(Box::new(client))
}

/// One chat turn
#[derive(Debug, Clone)]
pub struct ChatInput<'a> {
    pub prompt: &'a str,
    pub filetype: &'a str,
    pub code: &'a str,
    /// Window showing the chat buffer; folds are created there
    pub window: WindowId,
    /// `None` picks one from the prompt
    pub system_prompt: Option<&'a str>,
    /// `None` uses the configured model
    pub model: Option<&'a str>,
    pub start_separator: bool,
    pub end_separator: bool,
}

impl<'a> ChatInput<'a> {
    pub fn new(prompt: &'a str, filetype: &'a str, code: &'a str, window: WindowId) -> Self {
        Self {
            prompt,
            filetype,
            code,
            window,
            system_prompt: None,
            model: None,
            start_separator: true,
            end_separator: true,
        }
    }
}

/// Temperature to send, reporting an unusable setting to the user
pub fn resolve_temperature(host: &mut dyn Host, settings: &Settings) -> Result<f64> {
    match settings.chat.temperature.validate() {
        Some(temperature) => Ok(temperature),
        None => {
            warn!(temperature = ?settings.chat.temperature, "invalid temperature");
            host.notify(INVALID_TEMPERATURE, LogLevel::Error)?;
            Ok(DEFAULT_TEMPERATURE)
        }
    }
}

/// Markdown written before the answer
pub fn start_separator(system_prompt: &str, prompt: &str, code_block: &str) -> String {
    format!(
        "### User\n\nSYSTEM PROMPT:\n```\n{}\n```\n{}{}\n\n### Copilot\n\n",
        system_prompt, prompt, code_block
    )
}

/// Start separator used when separators are disabled
pub fn reduced_start_separator(prompt: &str) -> String {
    format!("### User\n{}\n\n### Copilot\n\n", prompt)
}

/// Fenced code shown under the prompt; empty without code
pub fn code_block(code: &str, filetype: &str) -> String {
    if code.is_empty() {
        return String::new();
    }
    format!("\n        \nCODE:\n```{}\n{}\n```", filetype, code)
}

/// Markdown written after the answer. The long form carries the model and a disclaimer.
pub fn end_separator(model: &str, datetime: &str, short: bool) -> String {
    if short {
        return format!("\n{}\n\n---\n", datetime);
    }
    format!(
        "\n#### Answer provided by Copilot (Model: `{}`) on {}.\
         \n> For additional queries, please use the `CopilotChat` command.\
         \n> Please be aware that the AI's output may not always be accurate. Always cross-verify the output.",
        model, datetime
    )
}

/// Line ranges (1-based, inclusive) folded after a start separator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Folds {
    pub system: (i64, i64),
    pub code: Option<(i64, i64)>,
}

impl Folds {
    /// `last_row_before`: line count before the separator was appended
    pub fn compute(last_row_before: i64, system_prompt_height: i64, code_block: &str) -> Self {
        let system_start = last_row_before + 2;
        let system_end = system_start + system_prompt_height + 3;
        let code = (!code_block.is_empty()).then(|| {
            let code_start = system_end + 2;
            let code_height = code_block.split('\n').count() as i64;
            (code_start, code_start + code_height - 1)
        });
        Self {
            system: (system_start, system_end),
            code,
        }
    }
}

/// A chat buffer and the conversation behind it
pub struct ChatHandler {
    buffer: BufferId,
    copilot: Option<Box<dyn ChatBackend>>,
    connector: Connector,
    clock: Box<dyn PollClock>,
    prompts: PromptRegistry,
}

impl ChatHandler {
    pub fn new(buffer: BufferId, prompts: PromptRegistry) -> Self {
        Self {
            buffer,
            copilot: None,
            connector: Box::new(connect_copilot),
            clock: Box::new(SystemClock),
            prompts,
        }
    }

    /// Replace how the backend is created on the first chat
    pub fn with_connector(
        mut self,
        connector: impl FnMut(&Settings) -> Result<Box<dyn ChatBackend>> + 'static,
    ) -> Self {
        self.set_connector(connector);
        self
    }

    pub fn set_connector(
        &mut self,
        connector: impl FnMut(&Settings) -> Result<Box<dyn ChatBackend>> + 'static,
    ) {
        self.connector = Box::new(connector);
        self.copilot = None;
    }

    /// Clock the device flow sleeps on
    pub fn with_clock(mut self, clock: impl PollClock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn is_connected(&self) -> bool {
        self.copilot.is_some()
    }

    /// Forget the conversation history
    pub fn reset(&mut self) {
        if let Some(copilot) = self.copilot.as_mut() {
            copilot.reset();
        }
    }

    /// Run one chat turn into the buffer
    pub fn chat(
        &mut self,
        host: &mut dyn Host,
        session: &mut ChatSession,
        settings: &Settings,
        input: &ChatInput<'_>,
    ) -> Result<()> {
        let temperature = resolve_temperature(host, settings)?;
        let model = input.model.unwrap_or(&settings.chat.model);
        let system_prompt = match input.system_prompt {
            Some(system_prompt) => system_prompt.to_string(),
            None => self.prompts.resolve(input.prompt, &settings.chat.language),
        };
        info!("Chatting with {} model", model);

        if input.start_separator {
            self.write_start_separator(host, settings, input, &system_prompt)?;
        }

        if !self.connect(host, settings)? {
            return Ok(());
        }
        self.stream_answer(host, input, &system_prompt, model, temperature)?;

        if input.end_separator {
            let datetime = chrono::Local::now().format(DATETIME_FORMAT).to_string();
            let short = settings.chat.disable_separators || session.has_shown_extra_info;
            let separator = end_separator(model, &datetime, short);
            session.has_shown_extra_info = true;
            host.buf_append(self.buffer, &split_lines(&separator))?;
        }
        Ok(())
    }

    fn write_start_separator(
        &mut self,
        host: &mut dyn Host,
        settings: &Settings,
        input: &ChatInput<'_>,
        system_prompt: &str,
    ) -> Result<()> {
        if settings.chat.disable_separators {
            let separator = reduced_start_separator(input.prompt);
            return host.buf_append(self.buffer, &split_lines(&separator));
        }

        let system_prompt = if settings.chat.hide_system_prompt {
            HIDDEN_SYSTEM_PROMPT
        } else {
            system_prompt
        };
        let code = code_block(input.code, input.filetype);

        let last_row_before = host.buf_line_count(self.buffer)?;
        let system_prompt_height = system_prompt.split('\n').count() as i64;
        let separator = start_separator(system_prompt, input.prompt, &code);
        host.buf_append(self.buffer, &split_lines(&separator))?;

        let folds = Folds::compute(last_row_before, system_prompt_height, &code);
        host.command("set foldmethod=manual")?;
        let (start, end) = folds.system;
        host.win_execute(input.window, &format!("{}, {} fold | normal! Gzz", start, end))?;
        if let Some((start, end)) = folds.code {
            host.win_execute(input.window, &format!("{}, {} fold | normal! G", start, end))?;
        }
        Ok(())
    }

    /// Create the backend on first use, signing in through the device flow
    /// when no token is cached. `false` when sign-in timed out.
    fn connect(&mut self, host: &mut dyn Host, settings: &Settings) -> Result<bool> {
        if self.copilot.is_some() {
            return Ok(true);
        }

        let mut copilot = (self.connector)(settings)?;
        if !copilot.is_signed_in() {
            let code = copilot.request_auth()?;
            host.out_write(&format!(
                "Please visit {} and enter the code {}\n",
                code.verification_uri, code.user_code
            ))?;
            match copilot.complete_login(&code, self.clock.as_mut()) {
                Ok(user) => {
                    info!(user, "authenticated with Copilot");
                    host.out_write("Successfully authenticated with Copilot\n")?;
                }
                Err(AuthError::Timeout) => {
                    warn!("device flow timed out");
                    host.out_write("Timed out waiting for authentication\n")?;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        copilot.authenticate()?;
        self.copilot = Some(copilot);
        Ok(true)
    }

    fn stream_answer(
        &mut self,
        host: &mut dyn Host,
        input: &ChatInput<'_>,
        system_prompt: &str,
        model: &str,
        temperature: f64,
    ) -> Result<()> {
        let Some(copilot) = self.copilot.as_mut() else {
            return Ok(());
        };
        debug!(
            prompt = input.prompt,
            filetype = input.filetype,
            code_len = input.code.len(),
            model,
            temperature,
            "asking Copilot"
        );
        trace!(system_prompt, "system prompt");

        let request = AskRequest {
            system_prompt,
            prompt: input.prompt,
            code: input.code,
            language: input.filetype,
            model,
            temperature,
        };
        let mut splicer = StreamSplicer::new(self.buffer);
        let answer = copilot.ask(&request, &mut |delta: &str| {
            trace!(delta, "token");
            splicer.push(host, delta)
        })?;
        debug!(len = answer.len(), "Copilot answered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Temperature;
    use crate::host::fake::MAIN_WINDOW;
    use crate::host::FakeHost;
    use crate::prompts::{COPILOT_FIX, COPILOT_INSTRUCTIONS, FIX_SHORTCUT};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct Recorded {
        asks: Vec<(String, String, String, f64)>,
        logins: usize,
        resets: usize,
    }

    struct FakeBackend {
        signed_in: bool,
        login: Result<(), ()>,
        deltas: Vec<&'static str>,
        recorded: Rc<RefCell<Recorded>>,
    }

    impl ChatBackend for FakeBackend {
        fn is_signed_in(&self) -> bool {
            self.signed_in
        }

        fn request_auth(&mut self) -> Result<DeviceCode, AuthError> {
            Ok(DeviceCode {
                device_code: "dc".to_string(),
                user_code: "ABCD-1234".to_string(),
                verification_uri: "https://github.com/login/device".to_string(),
                expires_in: 5,
                interval: 1,
            })
        }

        fn complete_login(
            &mut self,
            _code: &DeviceCode,
            _clock: &mut dyn PollClock,
        ) -> Result<String, AuthError> {
            self.recorded.borrow_mut().logins += 1;
            match self.login {
                Ok(()) => {
                    self.signed_in = true;
                    Ok("octocat".to_string())
                }
                Err(()) => Err(AuthError::Timeout),
            }
        }

        fn authenticate(&mut self) -> Result<(), ChatError> {
            Ok(())
        }

        fn ask(
            &mut self,
            request: &AskRequest<'_>,
            on_delta: &mut dyn FnMut(&str) -> Result<()>,
        ) -> Result<String, ChatError> {
            self.recorded.borrow_mut().asks.push((
                request.system_prompt.to_string(),
                request.prompt.to_string(),
                request.model.to_string(),
                request.temperature,
            ));
            for delta in &self.deltas {
                on_delta(delta).map_err(ChatError::Sink)?;
            }
            Ok(self.deltas.concat())
        }

        fn reset(&mut self) {
            self.recorded.borrow_mut().resets += 1;
        }
    }

    fn handler(
        host: &mut FakeHost,
        signed_in: bool,
        login: Result<(), ()>,
    ) -> (ChatHandler, Rc<RefCell<Recorded>>) {
        let buffer = host.create_buf(false, true).unwrap();
        let recorded = Rc::new(RefCell::new(Recorded::default()));
        let shared = recorded.clone();
        let handler = ChatHandler::new(buffer, PromptRegistry::builtin()).with_connector(
            move |_settings: &Settings| -> Result<Box<dyn ChatBackend>> {
                Ok(Box::new(FakeBackend {
                    signed_in,
                    login,
                    deltas: vec!["Hel", "lo\n", "World"],
                    recorded: shared.clone(),
                }))
            },
        );
        (handler, recorded)
    }

    #[test]
    fn test_start_separator_layout() {
        let code = code_block("x = 1", "python");
        let separator = start_separator("SYS", "Explain", &code);
        assert_eq!(
            split_lines(&separator),
            vec![
                "### User",
                "",
                "SYSTEM PROMPT:",
                "```",
                "SYS",
                "```",
                "Explain",
                "        ",
                "CODE:",
                "```python",
                "x = 1",
                "```",
                "",
                "### Copilot",
                "",
                "",
            ]
        );
        assert_eq!(
            reduced_start_separator("Explain"),
            "### User\nExplain\n\n### Copilot\n\n"
        );
    }

    #[test]
    fn test_end_separators() {
        let long = end_separator("gpt-4", "2024-01-02 03:04:05", false);
        assert!(long.starts_with(
            "\n#### Answer provided by Copilot (Model: `gpt-4`) on 2024-01-02 03:04:05."
        ));
        assert!(long.contains("\n> For additional queries, please use the `CopilotChat` command."));
        assert!(long.ends_with("Always cross-verify the output."));

        assert_eq!(
            end_separator("gpt-4", "2024-01-02 03:04:05", true),
            "\n2024-01-02 03:04:05\n\n---\n"
        );
    }

    #[test]
    fn test_fold_ranges() {
        let code = code_block("a\nb", "rust");
        let folds = Folds::compute(1, 1, &code);
        assert_eq!(folds.system, (3, 7));
        // "", "        ", "CODE:", fence, a, b, fence
        assert_eq!(folds.code, Some((9, 9 + 7 - 1)));

        assert_eq!(Folds::compute(1, 1, "").code, None);
    }

    #[test]
    fn test_chat_writes_separators_and_answer() {
        let mut host = FakeHost::new();
        let (mut handler, recorded) = handler(&mut host, true, Ok(()));
        let mut session = ChatSession::default();
        let settings = Settings::default();

        let input = ChatInput::new("Explain", "rust", "", MAIN_WINDOW);
        handler.chat(&mut host, &mut session, &settings, &input).unwrap();

        let lines = host.lines(handler.buffer());
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "### User");
        assert!(lines.contains(&"### Copilot".to_string()));
        assert!(lines.contains(&"Hello".to_string()));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("#### Answer provided by Copilot (Model: `gpt-4`)")));
        assert!(session.has_shown_extra_info);

        let asks = &recorded.borrow().asks;
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].0, COPILOT_INSTRUCTIONS);
        assert_eq!(asks[0].2, "gpt-4");
        assert_eq!(asks[0].3, 0.1);

        assert!(host.commands().contains(&"set foldmethod=manual".to_string()));
        assert!(host
            .commands()
            .iter()
            .any(|c| c.contains("fold | normal! Gzz")));
    }

    #[test]
    fn test_second_chat_uses_short_end_separator() {
        let mut host = FakeHost::new();
        let (mut handler, _) = handler(&mut host, true, Ok(()));
        let mut session = ChatSession::default();
        let settings = Settings::default();
        let input = ChatInput::new("Explain", "rust", "", MAIN_WINDOW);

        handler.chat(&mut host, &mut session, &settings, &input).unwrap();
        handler.chat(&mut host, &mut session, &settings, &input).unwrap();

        let lines = host.lines(handler.buffer());
        let long = lines
            .iter()
            .filter(|l| l.starts_with("#### Answer provided"))
            .count();
        assert_eq!(long, 1);
        assert_eq!(lines.last().map(String::as_str), Some(""));
        assert!(lines.contains(&"---".to_string()));
    }

    #[test]
    fn test_disabled_separators() {
        let mut host = FakeHost::new();
        let (mut handler, _) = handler(&mut host, true, Ok(()));
        let mut session = ChatSession::default();
        let mut settings = Settings::default();
        settings.chat.disable_separators = true;

        let input = ChatInput::new("Explain", "rust", "fn main() {}", MAIN_WINDOW);
        handler.chat(&mut host, &mut session, &settings, &input).unwrap();

        let lines = host.lines(handler.buffer());
        assert_eq!(lines[1..4], ["### User", "Explain", ""]);
        assert!(!lines.iter().any(|l| l.starts_with("CODE:")));
        assert!(!lines.iter().any(|l| l.starts_with("#### Answer")));
        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_hidden_system_prompt_and_shortcut() {
        let mut host = FakeHost::new();
        let (mut handler, recorded) = handler(&mut host, true, Ok(()));
        let mut session = ChatSession::default();
        let mut settings = Settings::default();
        settings.chat.hide_system_prompt = true;
        settings.chat.language = "German".to_string();

        let input = ChatInput::new(FIX_SHORTCUT, "rust", "", MAIN_WINDOW);
        handler.chat(&mut host, &mut session, &settings, &input).unwrap();

        assert!(host
            .lines(handler.buffer())
            .contains(&HIDDEN_SYSTEM_PROMPT.to_string()));
        let asks = &recorded.borrow().asks;
        assert_eq!(asks[0].0, format!("Please answer in German\n{}", COPILOT_FIX));
    }

    #[test]
    fn test_invalid_temperature_falls_back() {
        let mut host = FakeHost::new();
        let (mut handler, recorded) = handler(&mut host, true, Ok(()));
        let mut session = ChatSession::default();
        let mut settings = Settings::default();
        settings.chat.temperature = Temperature::Text("warm".to_string());

        let input = ChatInput::new("Explain", "rust", "", MAIN_WINDOW);
        handler.chat(&mut host, &mut session, &settings, &input).unwrap();

        assert_eq!(recorded.borrow().asks[0].3, DEFAULT_TEMPERATURE);
        assert_eq!(
            host.notifications(),
            &[(INVALID_TEMPERATURE.to_string(), LogLevel::Error)]
        );
    }

    #[test]
    fn test_device_flow_success() {
        let mut host = FakeHost::new();
        let (mut handler, recorded) = handler(&mut host, false, Ok(()));
        let mut session = ChatSession::default();
        let input = ChatInput::new("Explain", "rust", "", MAIN_WINDOW);

        handler
            .chat(&mut host, &mut session, &Settings::default(), &input)
            .unwrap();

        assert_eq!(
            host.output(),
            &[
                "Please visit https://github.com/login/device and enter the code ABCD-1234\n"
                    .to_string(),
                "Successfully authenticated with Copilot\n".to_string(),
            ]
        );
        assert_eq!(recorded.borrow().logins, 1);
        assert_eq!(recorded.borrow().asks.len(), 1);
        assert!(handler.is_connected());
    }

    #[test]
    fn test_device_flow_timeout_stops_chat() {
        let mut host = FakeHost::new();
        let (mut handler, recorded) = handler(&mut host, false, Err(()));
        let mut session = ChatSession::default();
        let input = ChatInput::new("Explain", "rust", "", MAIN_WINDOW);

        handler
            .chat(&mut host, &mut session, &Settings::default(), &input)
            .unwrap();

        let timeouts = host
            .output()
            .iter()
            .filter(|line| *line == "Timed out waiting for authentication\n")
            .count();
        assert_eq!(timeouts, 1);
        assert!(recorded.borrow().asks.is_empty());
        assert!(!session.has_shown_extra_info);
        assert!(!handler.is_connected());
    }

    #[test]
    fn test_reset_forwards_to_backend() {
        let mut host = FakeHost::new();
        let (mut handler, recorded) = handler(&mut host, true, Ok(()));
        handler.reset();
        assert_eq!(recorded.borrow().resets, 0);

        let mut session = ChatSession::default();
        let input = ChatInput::new("Explain", "rust", "", MAIN_WINDOW);
        handler
            .chat(&mut host, &mut session, &Settings::default(), &input)
            .unwrap();
        handler.reset();
        assert_eq!(recorded.borrow().resets, 1);
    }
}
