//! In-memory host for tests
//!
//! Keeps buffers, windows, options, mappings and autocommands in plain maps
//! and records every command and message, so layout and chat code can be
//! exercised without a running editor.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};

use super::{BufferId, FloatConfig, Host, LogLevel, Value, WindowId};

/// Handle of the window that exists before the plugin opens anything
pub const MAIN_WINDOW: WindowId = WindowId(1000);
/// Handle of the buffer shown in [`MAIN_WINDOW`]
pub const MAIN_BUFFER: BufferId = BufferId(1);

#[derive(Debug, Clone)]
struct FakeBuffer {
    lines: Vec<String>,
    options: HashMap<String, Value>,
}

impl FakeBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            options: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeWindow {
    buffer: BufferId,
    /// `None` for split windows
    config: Option<FloatConfig>,
    options: HashMap<String, Value>,
    vars: HashMap<String, Value>,
}

/// Deterministic stand-in for the editor
#[derive(Debug)]
pub struct FakeHost {
    buffers: HashMap<BufferId, FakeBuffer>,
    windows: HashMap<WindowId, FakeWindow>,
    window_order: Vec<WindowId>,
    next_buffer: i64,
    next_window: i64,
    current_win: WindowId,
    editor_size: (i64, i64),
    main_window_size: (i64, i64),
    globals: HashMap<String, Value>,
    registers: HashMap<char, String>,
    keymaps: HashMap<(BufferId, String, String), String>,
    autocmds: Vec<(String, BufferId, String)>,
    commands: Vec<String>,
    lua_calls: Vec<(String, Vec<Value>)>,
    output: Vec<String>,
    notifications: Vec<(String, LogLevel)>,
    opened: Vec<(WindowId, BufferId, bool, FloatConfig)>,
    closed: Vec<WindowId>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// Editor of 100 columns by 50 lines with a single 100x48 window
    pub fn new() -> Self {
        let mut buffers = HashMap::new();
        buffers.insert(MAIN_BUFFER, FakeBuffer::new());
        let mut windows = HashMap::new();
        windows.insert(
            MAIN_WINDOW,
            FakeWindow {
                buffer: MAIN_BUFFER,
                config: None,
                options: HashMap::new(),
                vars: HashMap::new(),
            },
        );
        Self {
            buffers,
            windows,
            window_order: vec![MAIN_WINDOW],
            next_buffer: MAIN_BUFFER.0 + 1,
            next_window: MAIN_WINDOW.0 + 1,
            current_win: MAIN_WINDOW,
            editor_size: (100, 50),
            main_window_size: (100, 48),
            globals: HashMap::new(),
            registers: HashMap::new(),
            keymaps: HashMap::new(),
            autocmds: Vec::new(),
            commands: Vec::new(),
            lua_calls: Vec::new(),
            output: Vec::new(),
            notifications: Vec::new(),
            opened: Vec::new(),
            closed: Vec::new(),
        }
    }

    pub fn with_editor_size(mut self, columns: i64, lines: i64) -> Self {
        self.editor_size = (columns, lines);
        self
    }

    pub fn with_window_size(mut self, width: i64, height: i64) -> Self {
        self.main_window_size = (width, height);
        self
    }

    /// Define `g:{name}`
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn set_register(&mut self, register: char, content: &str) {
        self.registers.insert(register, content.to_string());
    }

    /// Lines of a buffer (empty when the buffer does not exist)
    pub fn lines(&self, buffer: BufferId) -> Vec<String> {
        self.buffers
            .get(&buffer)
            .map(|b| b.lines.clone())
            .unwrap_or_default()
    }

    pub fn set_lines(&mut self, buffer: BufferId, lines: &[&str]) {
        if let Some(buf) = self.buffers.get_mut(&buffer) {
            buf.lines = lines.iter().map(|l| l.to_string()).collect();
        }
    }

    pub fn buffer_option(&self, buffer: BufferId, name: &str) -> Option<&Value> {
        self.buffers.get(&buffer)?.options.get(name)
    }

    pub fn window_option(&self, window: WindowId, name: &str) -> Option<&Value> {
        self.windows.get(&window)?.options.get(name)
    }

    /// Configuration of a currently open float
    pub fn window_config(&self, window: WindowId) -> Option<&FloatConfig> {
        self.windows.get(&window)?.config.as_ref()
    }

    pub fn window_buffer(&self, window: WindowId) -> Option<BufferId> {
        self.windows.get(&window).map(|w| w.buffer)
    }

    pub fn is_open(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }

    /// Open windows other than the main one, in opening order
    pub fn floats(&self) -> Vec<WindowId> {
        self.window_order
            .iter()
            .copied()
            .filter(|w| self.windows.get(w).is_some_and(|win| win.config.is_some()))
            .collect()
    }

    /// Every `open_win` call: (window, buffer, enter, config)
    pub fn opened(&self) -> &[(WindowId, BufferId, bool, FloatConfig)] {
        &self.opened
    }

    pub fn closed(&self) -> &[WindowId] {
        &self.closed
    }

    pub fn current_win(&self) -> WindowId {
        self.current_win
    }

    pub fn keymap(&self, buffer: BufferId, mode: &str, lhs: &str) -> Option<String> {
        self.keymaps
            .get(&(buffer, mode.to_string(), lhs.to_string()))
            .cloned()
    }

    /// Registered autocmds: (event, buffer, command)
    pub fn autocmds(&self) -> &[(String, BufferId, String)] {
        &self.autocmds
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn lua_calls(&self) -> &[(String, Vec<Value>)] {
        &self.lua_calls
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn notifications(&self) -> &[(String, LogLevel)] {
        &self.notifications
    }

    fn buffer_mut(&mut self, buffer: BufferId) -> Result<&mut FakeBuffer> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| anyhow!("Invalid buffer id: {}", buffer))
    }

    fn window(&self, window: WindowId) -> Result<&FakeWindow> {
        self.windows
            .get(&window)
            .ok_or_else(|| anyhow!("Invalid window id: {}", window))
    }

    fn window_mut(&mut self, window: WindowId) -> Result<&mut FakeWindow> {
        self.windows
            .get_mut(&window)
            .ok_or_else(|| anyhow!("Invalid window id: {}", window))
    }

    fn add_window(&mut self, buffer: BufferId, config: Option<FloatConfig>) -> WindowId {
        let id = WindowId(self.next_window);
        self.next_window += 1;
        self.windows.insert(
            id,
            FakeWindow {
                buffer,
                config,
                options: HashMap::new(),
                vars: HashMap::new(),
            },
        );
        self.window_order.push(id);
        id
    }
}

/// Host-style line index: negative values count from one past the end
fn line_index(index: i64, len: usize) -> Result<usize> {
    let resolved = if index < 0 { len as i64 + 1 + index } else { index };
    if resolved < 0 || resolved > len as i64 {
        bail!("Index out of bounds");
    }
    Ok(resolved as usize)
}

impl Host for FakeHost {
    fn create_buf(&mut self, _listed: bool, _scratch: bool) -> Result<BufferId> {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, FakeBuffer::new());
        Ok(id)
    }

    fn open_win(&mut self, buffer: BufferId, enter: bool, config: &FloatConfig) -> Result<WindowId> {
        if !self.buffers.contains_key(&buffer) {
            bail!("Invalid buffer id: {}", buffer);
        }
        if config.width <= 0 || config.height <= 0 {
            bail!("'width' and 'height' must be positive");
        }
        let id = self.add_window(buffer, Some(config.clone()));
        self.opened.push((id, buffer, enter, config.clone()));
        if enter {
            self.current_win = id;
        }
        Ok(id)
    }

    fn win_close(&mut self, window: WindowId, _force: bool) -> Result<()> {
        if self.windows.remove(&window).is_none() {
            bail!("Invalid window id: {}", window);
        }
        self.window_order.retain(|w| *w != window);
        self.closed.push(window);
        if self.current_win == window {
            self.current_win = MAIN_WINDOW;
        }
        Ok(())
    }

    fn get_current_win(&mut self) -> Result<WindowId> {
        Ok(self.current_win)
    }

    fn set_current_win(&mut self, window: WindowId) -> Result<()> {
        self.window(window)?;
        self.current_win = window;
        Ok(())
    }

    fn get_current_buf(&mut self) -> Result<BufferId> {
        Ok(self.window(self.current_win)?.buffer)
    }

    fn list_wins(&mut self) -> Result<Vec<WindowId>> {
        Ok(self.window_order.clone())
    }

    fn win_get_size(&mut self, window: WindowId) -> Result<(i64, i64)> {
        match &self.window(window)?.config {
            Some(config) => Ok((config.width, config.height)),
            None => Ok(self.main_window_size),
        }
    }

    fn editor_size(&mut self) -> Result<(i64, i64)> {
        Ok(self.editor_size)
    }

    fn buf_get_lines(&mut self, buffer: BufferId, start: i64, end: i64) -> Result<Vec<String>> {
        let buf = self.buffer_mut(buffer)?;
        let len = buf.lines.len();
        let (start, end) = (line_index(start, len)?, line_index(end, len)?);
        if start > end {
            bail!("'start' is higher than 'end'");
        }
        Ok(buf.lines[start..end].to_vec())
    }

    fn buf_set_lines(
        &mut self,
        buffer: BufferId,
        start: i64,
        end: i64,
        _strict: bool,
        lines: &[String],
    ) -> Result<()> {
        let buf = self.buffer_mut(buffer)?;
        let len = buf.lines.len();
        let (start, end) = (line_index(start, len)?, line_index(end, len)?);
        if start > end {
            bail!("'start' is higher than 'end'");
        }
        buf.lines.splice(start..end, lines.iter().cloned());
        if buf.lines.is_empty() {
            buf.lines.push(String::new());
        }
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
        let buf = self.buffer_mut(buffer)?;
        let (start_row, end_row) = (start_row as usize, end_row as usize);
        if start_row >= buf.lines.len() || end_row >= buf.lines.len() || start_row > end_row {
            bail!("Index out of bounds");
        }
        let (start_col, end_col) = (start_col as usize, end_col as usize);
        let first = &buf.lines[start_row];
        let last = &buf.lines[end_row];
        if start_col > first.len() || end_col > last.len() {
            bail!("Index out of bounds");
        }
        let prefix = first[..start_col].to_string();
        let suffix = last[end_col..].to_string();

        let mut replacement: Vec<String> = if lines.is_empty() {
            vec![String::new()]
        } else {
            lines.to_vec()
        };
        replacement[0] = format!("{}{}", prefix, replacement[0]);
        if let Some(tail) = replacement.last_mut() {
            tail.push_str(&suffix);
        }
        buf.lines.splice(start_row..=end_row, replacement);
        Ok(())
    }

    fn buf_line_count(&mut self, buffer: BufferId) -> Result<i64> {
        Ok(self.buffer_mut(buffer)?.lines.len() as i64)
    }

    fn buf_set_option(&mut self, buffer: BufferId, name: &str, value: Value) -> Result<()> {
        self.buffer_mut(buffer)?.options.insert(name.to_string(), value);
        Ok(())
    }

    fn buf_get_option(&mut self, buffer: BufferId, name: &str) -> Result<Value> {
        Ok(self
            .buffer_mut(buffer)?
            .options
            .get(name)
            .cloned()
            .unwrap_or(Value::from("")))
    }

    fn win_set_option(&mut self, window: WindowId, name: &str, value: Value) -> Result<()> {
        self.window_mut(window)?.options.insert(name.to_string(), value);
        Ok(())
    }

    fn win_get_var(&mut self, window: WindowId, name: &str) -> Result<Option<Value>> {
        Ok(self.window(window)?.vars.get(name).cloned())
    }

    fn win_set_var(&mut self, window: WindowId, name: &str, value: Value) -> Result<()> {
        self.window_mut(window)?.vars.insert(name.to_string(), value);
        Ok(())
    }

    fn buf_set_keymap(&mut self, buffer: BufferId, mode: &str, lhs: &str, rhs: &str) -> Result<()> {
        self.buffer_mut(buffer)?;
        self.keymaps
            .insert((buffer, mode.to_string(), lhs.to_string()), rhs.to_string());
        Ok(())
    }

    fn create_autocmd(&mut self, event: &str, buffer: BufferId, command: &str) -> Result<()> {
        self.autocmds
            .push((event.to_string(), buffer, command.to_string()));
        Ok(())
    }

    fn eval(&mut self, expr: &str) -> Result<Value> {
        if let Some(name) = expr
            .strip_prefix("exists('g:")
            .and_then(|rest| rest.strip_suffix("')"))
        {
            return Ok(Value::from(self.globals.contains_key(name) as i64));
        }
        if let Some(name) = expr.strip_prefix("g:") {
            return self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("E121: Undefined variable: {}", expr));
        }
        if let Some(register) = expr
            .strip_prefix("getreg('")
            .and_then(|rest| rest.strip_suffix("')"))
            .and_then(|r| r.chars().next())
        {
            let content = self.registers.get(&register).cloned().unwrap_or_default();
            return Ok(Value::from(content));
        }
        bail!("FakeHost cannot evaluate: {}", expr)
    }

    fn command(&mut self, command: &str) -> Result<()> {
        self.commands.push(command.to_string());
        let trimmed = command.trim_start_matches(':');
        if trimmed == "close" {
            let current = self.current_win;
            if current != MAIN_WINDOW {
                self.win_close(current, false)?;
            }
        } else if let Some(rest) = trimmed.strip_prefix("vsplit | buffer ") {
            let buffer = BufferId(rest.trim().parse()?);
            self.buffer_mut(buffer)?;
            let window = self.add_window(buffer, None);
            self.current_win = window;
        }
        Ok(())
    }

    fn exec_lua(&mut self, code: &str, args: Vec<Value>) -> Result<Value> {
        self.lua_calls.push((code.to_string(), args));
        Ok(Value::Nil)
    }

    fn out_write(&mut self, message: &str) -> Result<()> {
        self.output.push(message.to_string());
        Ok(())
    }

    fn notify(&mut self, message: &str, level: LogLevel) -> Result<()> {
        self.notifications.push((message.to_string(), level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::split_lines;

    #[test]
    fn test_new_buffer_has_one_empty_line() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        assert_eq!(host.lines(buf), vec![String::new()]);
    }

    #[test]
    fn test_set_lines_append_and_replace() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();

        host.buf_append(buf, &split_lines("a\nb")).unwrap();
        assert_eq!(host.lines(buf), vec!["", "a", "b"]);

        host.buf_replace(buf, &split_lines("x")).unwrap();
        assert_eq!(host.lines(buf), vec!["x"]);

        host.buf_replace(buf, &[]).unwrap();
        assert_eq!(host.lines(buf), vec![""]);
    }

    #[test]
    fn test_get_lines_ranges() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        host.set_lines(buf, &["one", "two", "three"]);

        assert_eq!(host.buf_get_lines(buf, 0, -1).unwrap().len(), 3);
        assert_eq!(host.buf_get_lines(buf, 1, 2).unwrap(), vec!["two"]);
        assert!(host.buf_get_lines(buf, 0, 9).is_err());
    }

    #[test]
    fn test_set_text_inserts_inside_line() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        host.set_lines(buf, &["Held"]);

        host.buf_set_text(buf, 0, 3, 0, 3, &split_lines("lo\nWor"))
            .unwrap();

        assert_eq!(host.lines(buf), vec!["Hello", "Word"]);
    }

    #[test]
    fn test_open_and_close_windows() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let config = FloatConfig {
            relative: crate::host::Relative::Editor,
            anchor: crate::host::Anchor::NW,
            width: 10,
            height: 5,
            row: 1,
            col: 1,
            zindex: 50,
            style: crate::host::Style::Minimal,
            border: crate::host::Border::Single,
            title: String::new(),
            title_pos: crate::host::TitlePos::Center,
            noautocmd: false,
        };

        let win = host.open_win(buf, true, &config).unwrap();
        assert_eq!(host.current_win(), win);
        assert_eq!(host.win_get_size(win).unwrap(), (10, 5));

        host.win_close(win, true).unwrap();
        assert!(!host.is_open(win));
        assert_eq!(host.current_win(), MAIN_WINDOW);
        assert!(host.win_close(win, true).is_err());
    }

    #[test]
    fn test_eval_globals() {
        let mut host = FakeHost::new();
        host.set_global("copilot_chat_language", Value::from("French"));

        assert_eq!(
            host.eval("exists('g:copilot_chat_language')").unwrap().as_i64(),
            Some(1)
        );
        assert_eq!(
            host.eval("g:copilot_chat_language").unwrap().as_str(),
            Some("French")
        );
        assert!(host.eval("g:missing").is_err());
    }
}
