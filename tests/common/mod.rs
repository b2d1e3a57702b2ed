#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use copilot_chat::chat::ChatBackend;
use copilot_chat::copilot::{AskRequest, AuthError, ChatError, DeviceCode, PollClock};
use copilot_chat::host::{BufferId, Value};
use copilot_chat::{CopilotPlugin, FakeHost, Settings};

/// What the fake backend was asked to do
#[derive(Debug, Default)]
pub struct Recorded {
    /// (system prompt, prompt, code, model)
    pub asks: Vec<(String, String, String, String)>,
    pub connects: usize,
    pub resets: usize,
}

pub struct FakeBackend {
    signed_in: bool,
    deltas: Vec<String>,
    recorded: Rc<RefCell<Recorded>>,
}

impl ChatBackend for FakeBackend {
    fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    fn request_auth(&mut self) -> Result<DeviceCode, AuthError> {
        Ok(DeviceCode {
            device_code: "dc".to_string(),
            user_code: "WXYZ-9876".to_string(),
            verification_uri: "https://github.com/login/device".to_string(),
            expires_in: 900,
            interval: 5,
        })
    }

    fn complete_login(
        &mut self,
        _code: &DeviceCode,
        _clock: &mut dyn PollClock,
    ) -> Result<String, AuthError> {
        self.signed_in = true;
        Ok("octocat".to_string())
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
            request.code.to_string(),
            request.model.to_string(),
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

/// Plugin whose chats stream `deltas` without touching the network
pub fn plugin_with_answer(
    settings: Settings,
    signed_in: bool,
    deltas: &[&str],
) -> (CopilotPlugin, Rc<RefCell<Recorded>>) {
    let recorded = Rc::new(RefCell::new(Recorded::default()));
    let shared = recorded.clone();
    let deltas: Vec<String> = deltas.iter().map(|d| d.to_string()).collect();
    let plugin = CopilotPlugin::new(settings).with_connector(
        move |_settings: &Settings| -> Result<Box<dyn ChatBackend>> {
            shared.borrow_mut().connects += 1;
            Ok(Box::new(FakeBackend {
                signed_in,
                deltas: deltas.clone(),
                recorded: shared.clone(),
            }))
        },
    );
    (plugin, recorded)
}

pub fn args(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| Value::from(*v)).collect())
}

pub fn range(start: i64, end: i64) -> Value {
    Value::Array(vec![Value::from(start), Value::from(end)])
}

/// Run a mapping the way the editor would: by executing its right-hand side
pub fn press(host: &mut FakeHost, plugin: &mut CopilotPlugin, buffer: BufferId, mode: &str, lhs: &str) {
    let rhs = host
        .keymap(buffer, mode, lhs)
        .unwrap_or_else(|| panic!("{} is not mapped in buffer {}", lhs, buffer));
    let command = rhs
        .strip_prefix("<cmd>")
        .and_then(|rest| rest.strip_suffix("<CR>"))
        .unwrap_or_else(|| panic!("unexpected rhs {}", rhs));
    let mut words = command.split_whitespace();
    let method = words.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = words.collect();
    plugin.handle_notification(host, &method, &[args(&rest)]);
}

/// Fire the plugin's autocommand for `event` on `buffer`
pub fn trigger(host: &mut FakeHost, plugin: &mut CopilotPlugin, event: &str, buffer: BufferId) {
    let command = host
        .autocmds()
        .iter()
        .find(|(e, b, _)| e == event && *b == buffer)
        .map(|(_, _, command)| command.clone())
        .unwrap_or_else(|| panic!("no {} autocmd on buffer {}", event, buffer));
    let mut words = command.split_whitespace();
    let method = words.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = words.collect();
    plugin.handle_notification(host, &method, &[args(&rest)]);
}
