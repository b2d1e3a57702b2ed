//! msgpack-RPC transport to Neovim
//!
//! The plugin runs as a job started with `jobstart(cmd, {rpc = true})`, so the
//! editor talks to it over stdin/stdout. Messages are msgpack arrays:
//!
//! - request:      `[0, msgid, method, params]`
//! - response:     `[1, msgid, error, result]`
//! - notification: `[2, method, params]`
//!
//! Calls are synchronous: [`RpcSession::call`] writes a request and reads until
//! the matching response arrives. Anything else read in the meantime is queued
//! and handed out later by [`RpcSession::next_event`].

use std::collections::VecDeque;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Stdin, Stdout, Write};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::{BufferId, FloatConfig, Host, LogLevel, Value, WindowId};

const REQUEST: u64 = 0;
const RESPONSE: u64 = 1;
const NOTIFICATION: u64 = 2;

/// Transport and protocol failures
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("malformed message: {0}")]
    Protocol(String),
    #[error("{method}: {message}")]
    Remote { method: String, message: String },
    #[error("connection closed")]
    Closed,
}

/// A message initiated by the editor
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    Notification { method: String, params: Vec<Value> },
    Request { id: u64, method: String, params: Vec<Value> },
}

/// One msgpack-RPC connection
pub struct RpcSession<R: Read, W: Write> {
    reader: R,
    writer: W,
    next_id: u64,
    queue: VecDeque<RpcEvent>,
}

impl<R: Read, W: Write> RpcSession<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            queue: VecDeque::new(),
        }
    }

    /// Call `method` and wait for its result
    pub fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id;
        self.next_id += 1;

        trace!(id, method, "rpc request");
        self.write(&Value::Array(vec![
            Value::from(REQUEST),
            Value::from(id),
            Value::from(method),
            Value::Array(params),
        ]))?;

        loop {
            let Some(message) = self.read()? else {
                return Err(RpcError::Closed);
            };
            match parse_message(message)? {
                Incoming::Response {
                    id: response_id,
                    error,
                    result,
                } => {
                    if response_id != id {
                        warn!(expected = id, got = response_id, "dropping unexpected response");
                        continue;
                    }
                    if !error.is_nil() {
                        return Err(RpcError::Remote {
                            method: method.to_string(),
                            message: error_message(&error),
                        });
                    }
                    return Ok(result);
                }
                Incoming::Event(event) => {
                    debug!(?event, "queueing event received during call");
                    self.queue.push_back(event);
                }
            }
        }
    }

    /// Fire-and-forget notification to the editor
    pub fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), RpcError> {
        self.write(&Value::Array(vec![
            Value::from(NOTIFICATION),
            Value::from(method),
            Value::Array(params),
        ]))
    }

    /// Answer a request the editor sent us
    pub fn respond(&mut self, id: u64, error: Option<String>, result: Value) -> Result<(), RpcError> {
        let error = error.map(Value::from).unwrap_or(Value::Nil);
        self.write(&Value::Array(vec![
            Value::from(RESPONSE),
            Value::from(id),
            error,
            result,
        ]))
    }

    /// Next editor-initiated message, `None` once the editor hangs up
    pub fn next_event(&mut self) -> Result<Option<RpcEvent>, RpcError> {
        if let Some(event) = self.queue.pop_front() {
            return Ok(Some(event));
        }
        loop {
            let Some(message) = self.read()? else {
                return Ok(None);
            };
            match parse_message(message)? {
                Incoming::Event(event) => return Ok(Some(event)),
                Incoming::Response { id, .. } => {
                    warn!(id, "dropping response with no pending call");
                }
            }
        }
    }

    fn write(&mut self, message: &Value) -> Result<(), RpcError> {
        rmpv::encode::write_value(&mut self.writer, message)
            .map_err(|e| RpcError::Encode(e.to_string()))?;
        self.writer.flush()?;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Value>, RpcError> {
        match rmpv::decode::read_value(&mut self.reader) {
            Ok(value) => Ok(Some(value)),
            Err(rmpv::decode::Error::InvalidMarkerRead(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(e) => Err(RpcError::Decode(e.to_string())),
        }
    }
}

enum Incoming {
    Response { id: u64, error: Value, result: Value },
    Event(RpcEvent),
}

fn parse_message(message: Value) -> Result<Incoming, RpcError> {
    let Value::Array(mut parts) = message else {
        return Err(RpcError::Protocol("message is not an array".to_string()));
    };
    let kind = parts
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::Protocol("missing message type".to_string()))?;

    match (kind, parts.len()) {
        (RESPONSE, 4) => {
            let result = parts.pop().unwrap_or(Value::Nil);
            let error = parts.pop().unwrap_or(Value::Nil);
            let id = parts[1]
                .as_u64()
                .ok_or_else(|| RpcError::Protocol("response id is not an integer".to_string()))?;
            Ok(Incoming::Response { id, error, result })
        }
        (REQUEST, 4) => {
            let params = into_params(parts.pop());
            let method = method_name(&parts[2])?;
            let id = parts[1]
                .as_u64()
                .ok_or_else(|| RpcError::Protocol("request id is not an integer".to_string()))?;
            Ok(Incoming::Event(RpcEvent::Request { id, method, params }))
        }
        (NOTIFICATION, 3) => {
            let params = into_params(parts.pop());
            let method = method_name(&parts[1])?;
            Ok(Incoming::Event(RpcEvent::Notification { method, params }))
        }
        _ => Err(RpcError::Protocol(format!(
            "unexpected message type {} with {} fields",
            kind,
            parts.len()
        ))),
    }
}

fn method_name(value: &Value) -> Result<String, RpcError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RpcError::Protocol("method name is not a string".to_string()))
}

fn into_params(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(params)) => params,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

/// Neovim errors are `[type, message]`
fn error_message(error: &Value) -> String {
    match error {
        Value::Array(parts) => parts
            .get(1)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::String(s) => s.as_str().unwrap_or_default().to_string(),
        other => other.to_string(),
    }
}

/// Buffer and window handles arrive as EXT values wrapping an integer
pub fn decode_handle(value: &Value) -> Result<i64, RpcError> {
    match value {
        Value::Integer(i) => i
            .as_i64()
            .ok_or_else(|| RpcError::Protocol("handle out of range".to_string())),
        Value::Ext(_, payload) => {
            let inner = rmpv::decode::read_value(&mut payload.as_slice())
                .map_err(|e| RpcError::Decode(e.to_string()))?;
            inner
                .as_i64()
                .ok_or_else(|| RpcError::Protocol("handle payload is not an integer".to_string()))
        }
        other => Err(RpcError::Protocol(format!("expected a handle, got {}", other))),
    }
}

fn map(entries: &[(&str, Value)]) -> Value {
    Value::Map(
        entries
            .iter()
            .map(|(k, v)| (Value::from(*k), v.clone()))
            .collect(),
    )
}

fn lines_value(lines: &[String]) -> Value {
    Value::Array(lines.iter().map(|l| Value::from(l.as_str())).collect())
}

/// [`Host`] backed by a live Neovim connection
pub struct RpcHost<R: Read, W: Write> {
    session: RpcSession<R, W>,
}

impl RpcHost<BufReader<Stdin>, BufWriter<Stdout>> {
    /// Connect over this process's stdin/stdout
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), BufWriter::new(io::stdout()))
    }
}

impl<R: Read, W: Write> RpcHost<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            session: RpcSession::new(reader, writer),
        }
    }

    pub fn session(&mut self) -> &mut RpcSession<R, W> {
        &mut self.session
    }

    pub fn next_event(&mut self) -> Result<Option<RpcEvent>, RpcError> {
        self.session.next_event()
    }

    fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value> {
        Ok(self.session.call(method, params)?)
    }

    fn call_handle(&mut self, method: &str, params: Vec<Value>) -> Result<i64> {
        let value = self.call(method, params)?;
        Ok(decode_handle(&value)?)
    }
}

impl<R: Read, W: Write> Host for RpcHost<R, W> {
    fn create_buf(&mut self, listed: bool, scratch: bool) -> Result<BufferId> {
        let id = self.call_handle(
            "nvim_create_buf",
            vec![Value::from(listed), Value::from(scratch)],
        )?;
        Ok(BufferId(id))
    }

    fn open_win(&mut self, buffer: BufferId, enter: bool, config: &FloatConfig) -> Result<WindowId> {
        let id = self.call_handle(
            "nvim_open_win",
            vec![Value::from(buffer.0), Value::from(enter), config.to_value()],
        )?;
        Ok(WindowId(id))
    }

    fn win_close(&mut self, window: WindowId, force: bool) -> Result<()> {
        self.call("nvim_win_close", vec![Value::from(window.0), Value::from(force)])?;
        Ok(())
    }

    fn get_current_win(&mut self) -> Result<WindowId> {
        Ok(WindowId(self.call_handle("nvim_get_current_win", Vec::new())?))
    }

    fn set_current_win(&mut self, window: WindowId) -> Result<()> {
        self.call("nvim_set_current_win", vec![Value::from(window.0)])?;
        Ok(())
    }

    fn get_current_buf(&mut self) -> Result<BufferId> {
        Ok(BufferId(self.call_handle("nvim_get_current_buf", Vec::new())?))
    }

    fn list_wins(&mut self) -> Result<Vec<WindowId>> {
        let value = self.call("nvim_list_wins", Vec::new())?;
        let Value::Array(handles) = value else {
            return Ok(Vec::new());
        };
        handles
            .iter()
            .map(|h| Ok(WindowId(decode_handle(h)?)))
            .collect()
    }

    fn win_get_size(&mut self, window: WindowId) -> Result<(i64, i64)> {
        let width = self.call("nvim_win_get_width", vec![Value::from(window.0)])?;
        let height = self.call("nvim_win_get_height", vec![Value::from(window.0)])?;
        Ok((width.as_i64().unwrap_or(0), height.as_i64().unwrap_or(0)))
    }

    fn editor_size(&mut self) -> Result<(i64, i64)> {
        let columns = self.call(
            "nvim_get_option_value",
            vec![Value::from("columns"), map(&[])],
        )?;
        let lines = self.call(
            "nvim_get_option_value",
            vec![Value::from("lines"), map(&[])],
        )?;
        Ok((columns.as_i64().unwrap_or(0), lines.as_i64().unwrap_or(0)))
    }

    fn buf_get_lines(&mut self, buffer: BufferId, start: i64, end: i64) -> Result<Vec<String>> {
        let value = self.call(
            "nvim_buf_get_lines",
            vec![
                Value::from(buffer.0),
                Value::from(start),
                Value::from(end),
                Value::from(false),
            ],
        )?;
        let Value::Array(lines) = value else {
            return Ok(Vec::new());
        };
        Ok(lines
            .iter()
            .map(|l| l.as_str().unwrap_or_default().to_string())
            .collect())
    }

    fn buf_set_lines(
        &mut self,
        buffer: BufferId,
        start: i64,
        end: i64,
        strict: bool,
        lines: &[String],
    ) -> Result<()> {
        self.call(
            "nvim_buf_set_lines",
            vec![
                Value::from(buffer.0),
                Value::from(start),
                Value::from(end),
                Value::from(strict),
                lines_value(lines),
            ],
        )?;
        Ok(())
    }

    fn buf_set_text(
        &mut self,
        buffer: BufferId,
        start_row: i64,
        start_col: i64,
        end_row: i64,
        end_col: i64,
        lines: &[String],
    ) -> Result<()> {
        self.call(
            "nvim_buf_set_text",
            vec![
                Value::from(buffer.0),
                Value::from(start_row),
                Value::from(start_col),
                Value::from(end_row),
                Value::from(end_col),
                lines_value(lines),
            ],
        )?;
        Ok(())
    }

    fn buf_line_count(&mut self, buffer: BufferId) -> Result<i64> {
        let count = self.call("nvim_buf_line_count", vec![Value::from(buffer.0)])?;
        Ok(count.as_i64().unwrap_or(0))
    }

    fn buf_set_option(&mut self, buffer: BufferId, name: &str, value: Value) -> Result<()> {
        self.call(
            "nvim_set_option_value",
            vec![Value::from(name), value, map(&[("buf", Value::from(buffer.0))])],
        )?;
        Ok(())
    }

    fn buf_get_option(&mut self, buffer: BufferId, name: &str) -> Result<Value> {
        self.call(
            "nvim_get_option_value",
            vec![Value::from(name), map(&[("buf", Value::from(buffer.0))])],
        )
    }

    fn win_set_option(&mut self, window: WindowId, name: &str, value: Value) -> Result<()> {
        self.call(
            "nvim_set_option_value",
            vec![Value::from(name), value, map(&[("win", Value::from(window.0))])],
        )?;
        Ok(())
    }

    fn win_get_var(&mut self, window: WindowId, name: &str) -> Result<Option<Value>> {
        match self
            .session
            .call("nvim_win_get_var", vec![Value::from(window.0), Value::from(name)])
        {
            Ok(value) => Ok(Some(value)),
            // "Key not found" is the only way the API reports an unset variable
            Err(RpcError::Remote { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn win_set_var(&mut self, window: WindowId, name: &str, value: Value) -> Result<()> {
        self.call(
            "nvim_win_set_var",
            vec![Value::from(window.0), Value::from(name), value],
        )?;
        Ok(())
    }

    fn buf_set_keymap(&mut self, buffer: BufferId, mode: &str, lhs: &str, rhs: &str) -> Result<()> {
        self.call(
            "nvim_buf_set_keymap",
            vec![
                Value::from(buffer.0),
                Value::from(mode),
                Value::from(lhs),
                Value::from(rhs),
                map(&[("noremap", Value::from(true)), ("silent", Value::from(true))]),
            ],
        )?;
        Ok(())
    }

    fn create_autocmd(&mut self, event: &str, buffer: BufferId, command: &str) -> Result<()> {
        self.call(
            "nvim_create_autocmd",
            vec![
                Value::from(event),
                map(&[
                    ("buffer", Value::from(buffer.0)),
                    ("command", Value::from(command)),
                ]),
            ],
        )?;
        Ok(())
    }

    fn eval(&mut self, expr: &str) -> Result<Value> {
        self.call("nvim_eval", vec![Value::from(expr)])
    }

    fn command(&mut self, command: &str) -> Result<()> {
        self.call("nvim_command", vec![Value::from(command)])?;
        Ok(())
    }

    fn exec_lua(&mut self, code: &str, args: Vec<Value>) -> Result<Value> {
        self.call("nvim_exec_lua", vec![Value::from(code), Value::Array(args)])
    }

    fn out_write(&mut self, message: &str) -> Result<()> {
        self.call("nvim_out_write", vec![Value::from(message)])?;
        Ok(())
    }

    fn notify(&mut self, message: &str, level: LogLevel) -> Result<()> {
        self.call(
            "nvim_notify",
            vec![Value::from(message), Value::from(level as i64), map(&[])],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(messages: &[Value]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for message in messages {
            rmpv::encode::write_value(&mut bytes, message).unwrap();
        }
        bytes
    }

    fn decode_all(mut bytes: &[u8]) -> Vec<Value> {
        let mut values = Vec::new();
        while !bytes.is_empty() {
            values.push(rmpv::decode::read_value(&mut bytes).unwrap());
        }
        values
    }

    fn response(id: u64, error: Value, result: Value) -> Value {
        Value::Array(vec![Value::from(1), Value::from(id), error, result])
    }

    fn notification(method: &str, params: Vec<Value>) -> Value {
        Value::Array(vec![Value::from(2), Value::from(method), Value::Array(params)])
    }

    fn ext_handle(kind: i8, id: i64) -> Value {
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, &Value::from(id)).unwrap();
        Value::Ext(kind, payload)
    }

    #[test]
    fn test_call_writes_request_and_returns_result() {
        let input = encode(&[response(1, Value::Nil, Value::from(42))]);
        let mut output = Vec::new();
        let mut session = RpcSession::new(Cursor::new(input), &mut output);

        let result = session.call("nvim_buf_line_count", vec![Value::from(3)]).unwrap();
        assert_eq!(result.as_i64(), Some(42));

        let written = decode_all(&output);
        assert_eq!(written.len(), 1);
        let request = written[0].as_array().unwrap();
        assert_eq!(request[0].as_u64(), Some(0));
        assert_eq!(request[1].as_u64(), Some(1));
        assert_eq!(request[2].as_str(), Some("nvim_buf_line_count"));
    }

    #[test]
    fn test_notifications_during_call_are_queued() {
        let input = encode(&[
            notification("CopilotChatAutocmd", vec![Value::from("BufEnter")]),
            response(1, Value::Nil, Value::Nil),
        ]);
        let mut output = Vec::new();
        let mut session = RpcSession::new(Cursor::new(input), &mut output);

        session.call("nvim_command", vec![Value::from("echo 1")]).unwrap();

        let event = session.next_event().unwrap();
        assert_eq!(
            event,
            Some(RpcEvent::Notification {
                method: "CopilotChatAutocmd".to_string(),
                params: vec![Value::from("BufEnter")],
            })
        );
        assert_eq!(session.next_event().unwrap(), None);
    }

    #[test]
    fn test_remote_error_is_reported() {
        let error = Value::Array(vec![Value::from(0), Value::from("Invalid window id: 7")]);
        let input = encode(&[response(1, error, Value::Nil)]);
        let mut output = Vec::new();
        let mut session = RpcSession::new(Cursor::new(input), &mut output);

        let err = session.call("nvim_win_close", Vec::new()).unwrap_err();
        match err {
            RpcError::Remote { method, message } => {
                assert_eq!(method, "nvim_win_close");
                assert_eq!(message, "Invalid window id: 7");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_eof_while_waiting_is_closed() {
        let mut output = Vec::new();
        let mut session = RpcSession::new(Cursor::new(Vec::new()), &mut output);
        assert!(matches!(
            session.call("nvim_eval", Vec::new()),
            Err(RpcError::Closed)
        ));
    }

    #[test]
    fn test_decode_ext_handle() {
        assert_eq!(decode_handle(&ext_handle(1, 1003)).unwrap(), 1003);
        assert_eq!(decode_handle(&Value::from(5)).unwrap(), 5);
        assert!(decode_handle(&Value::from("x")).is_err());
    }

    #[test]
    fn test_host_open_win_decodes_window() {
        let input = encode(&[response(1, Value::Nil, ext_handle(1, 1001))]);
        let mut output = Vec::new();
        let mut host = RpcHost::new(Cursor::new(input), &mut output);
        let config = FloatConfig {
            relative: crate::host::Relative::Editor,
            anchor: crate::host::Anchor::NW,
            width: 20,
            height: 4,
            row: 2,
            col: 3,
            zindex: 500,
            style: crate::host::Style::Minimal,
            border: crate::host::Border::Single,
            title: String::new(),
            title_pos: crate::host::TitlePos::Center,
            noautocmd: false,
        };

        let window = host.open_win(BufferId(2), true, &config).unwrap();
        assert_eq!(window, WindowId(1001));
    }

    #[test]
    fn test_missing_window_var_is_none() {
        let error = Value::Array(vec![Value::from(0), Value::from("Key not found: copilot_chat")]);
        let input = encode(&[response(1, error, Value::Nil)]);
        let mut output = Vec::new();
        let mut host = RpcHost::new(Cursor::new(input), &mut output);

        assert_eq!(host.win_get_var(WindowId(1000), "copilot_chat").unwrap(), None);
    }
}
