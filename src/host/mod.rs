//! Host editor capability surface
//!
//! Everything the plugin does to the editor goes through the [`Host`] trait:
//! floating windows, buffer text, options, key mappings, autocommands and
//! command execution. The production implementation speaks msgpack-RPC to
//! Neovim ([`rpc::RpcHost`]); tests use the in-memory [`fake::FakeHost`].

pub mod dispatch;
pub mod fake;
pub mod rpc;

use anyhow::Result;

pub use dispatch::{AutocmdMapper, Dispatcher, Keymapper, Rhs};
pub use fake::FakeHost;
pub use rmpv::Value;
pub use rpc::{RpcEvent, RpcHost};

/// Handle of a host buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub i64);

/// Handle of a host window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub i64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a floating window's position is relative to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relative {
    #[default]
    Editor,
    Win,
    Cursor,
}

impl Relative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relative::Editor => "editor",
            Relative::Win => "win",
            Relative::Cursor => "cursor",
        }
    }
}

/// Which corner of the float sits at (row, col)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    #[default]
    NW,
    NE,
    SW,
    SE,
}

impl Anchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anchor::NW => "NW",
            Anchor::NE => "NE",
            Anchor::SW => "SW",
            Anchor::SE => "SE",
        }
    }
}

/// Window decoration style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    /// Host default decorations (number column, sign column, ...)
    Default,
    /// No UI decorations
    #[default]
    Minimal,
}

/// Float border
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Border {
    None,
    #[default]
    Single,
    Double,
    Rounded,
    Solid,
    Shadow,
    /// Eight (or fewer, repeated) border characters, clockwise from top-left
    Custom(Vec<String>),
}

impl Border {
    /// Whether the border takes up screen cells around the window
    pub fn is_none(&self) -> bool {
        matches!(self, Border::None)
    }

    pub fn to_value(&self) -> Value {
        let name = match self {
            Border::None => "none",
            Border::Single => "single",
            Border::Double => "double",
            Border::Rounded => "rounded",
            Border::Solid => "solid",
            Border::Shadow => "shadow",
            Border::Custom(chars) => {
                return Value::Array(chars.iter().map(|c| Value::from(c.as_str())).collect());
            }
        };
        Value::from(name)
    }
}

/// Title alignment on the top border
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitlePos {
    Left,
    #[default]
    Center,
    Right,
}

impl TitlePos {
    pub fn as_str(&self) -> &'static str {
        match self {
            TitlePos::Left => "left",
            TitlePos::Center => "center",
            TitlePos::Right => "right",
        }
    }
}

/// Fully resolved floating window configuration, as handed to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatConfig {
    pub relative: Relative,
    pub anchor: Anchor,
    pub width: i64,
    pub height: i64,
    pub row: i64,
    pub col: i64,
    pub zindex: i64,
    pub style: Style,
    pub border: Border,
    pub title: String,
    pub title_pos: TitlePos,
    pub noautocmd: bool,
}

impl FloatConfig {
    /// Encode as the `config` map of `nvim_open_win`
    pub fn to_value(&self) -> Value {
        let mut entries: Vec<(Value, Value)> = vec![
            (Value::from("relative"), Value::from(self.relative.as_str())),
            (Value::from("anchor"), Value::from(self.anchor.as_str())),
            (Value::from("width"), Value::from(self.width)),
            (Value::from("height"), Value::from(self.height)),
            (Value::from("row"), Value::from(self.row)),
            (Value::from("col"), Value::from(self.col)),
            (Value::from("zindex"), Value::from(self.zindex)),
            (Value::from("border"), self.border.to_value()),
            (Value::from("noautocmd"), Value::from(self.noautocmd)),
        ];
        if self.style == Style::Minimal {
            entries.push((Value::from("style"), Value::from("minimal")));
        }
        // The host rejects a title without a border
        if !self.title.is_empty() && !self.border.is_none() {
            entries.push((Value::from("title"), Value::from(self.title.as_str())));
            entries.push((Value::from("title_pos"), Value::from(self.title_pos.as_str())));
        }
        Value::Map(entries)
    }
}

/// Notification severity, matching `vim.log.levels`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

/// The editor operations the plugin depends on
pub trait Host {
    /// Create a buffer (`listed`: shows in :ls, `scratch`: nofile + bufhidden=hide)
    fn create_buf(&mut self, listed: bool, scratch: bool) -> Result<BufferId>;
    /// Open a floating window on `buffer`
    fn open_win(&mut self, buffer: BufferId, enter: bool, config: &FloatConfig) -> Result<WindowId>;
    fn win_close(&mut self, window: WindowId, force: bool) -> Result<()>;
    fn get_current_win(&mut self) -> Result<WindowId>;
    fn set_current_win(&mut self, window: WindowId) -> Result<()>;
    fn get_current_buf(&mut self) -> Result<BufferId>;
    fn list_wins(&mut self) -> Result<Vec<WindowId>>;
    /// Returns (width, height) of a window
    fn win_get_size(&mut self, window: WindowId) -> Result<(i64, i64)>;
    /// Returns (columns, lines) of the whole editor
    fn editor_size(&mut self) -> Result<(i64, i64)>;

    fn buf_get_lines(&mut self, buffer: BufferId, start: i64, end: i64) -> Result<Vec<String>>;
    fn buf_set_lines(
        &mut self,
        buffer: BufferId,
        start: i64,
        end: i64,
        strict: bool,
        lines: &[String],
    ) -> Result<()>;
    fn buf_set_text(
        &mut self,
        buffer: BufferId,
        start_row: i64,
        start_col: i64,
        end_row: i64,
        end_col: i64,
        lines: &[String],
    ) -> Result<()>;
    fn buf_line_count(&mut self, buffer: BufferId) -> Result<i64>;

    fn buf_set_option(&mut self, buffer: BufferId, name: &str, value: Value) -> Result<()>;
    fn buf_get_option(&mut self, buffer: BufferId, name: &str) -> Result<Value>;
    fn win_set_option(&mut self, window: WindowId, name: &str, value: Value) -> Result<()>;
    /// Window-local variable, `None` when unset
    fn win_get_var(&mut self, window: WindowId, name: &str) -> Result<Option<Value>>;
    fn win_set_var(&mut self, window: WindowId, name: &str, value: Value) -> Result<()>;

    fn buf_set_keymap(&mut self, buffer: BufferId, mode: &str, lhs: &str, rhs: &str) -> Result<()>;
    fn create_autocmd(&mut self, event: &str, buffer: BufferId, command: &str) -> Result<()>;

    fn eval(&mut self, expr: &str) -> Result<Value>;
    fn command(&mut self, command: &str) -> Result<()>;
    fn exec_lua(&mut self, code: &str, args: Vec<Value>) -> Result<Value>;
    fn out_write(&mut self, message: &str) -> Result<()>;
    fn notify(&mut self, message: &str, level: LogLevel) -> Result<()>;

    /// Run an Ex command in the context of `window`
    fn win_execute(&mut self, window: WindowId, command: &str) -> Result<()> {
        let escaped = command.replace('\'', "''");
        self.command(&format!("call win_execute({}, '{}')", window, escaped))
    }

    /// Replace a buffer's whole content
    fn buf_replace(&mut self, buffer: BufferId, lines: &[String]) -> Result<()> {
        self.buf_set_lines(buffer, 0, -1, false, lines)
    }

    /// Append lines at the end of a buffer
    fn buf_append(&mut self, buffer: BufferId, lines: &[String]) -> Result<()> {
        self.buf_set_lines(buffer, -1, -1, true, lines)
    }
}

/// Split text into buffer lines the way the host does (`"a\nb"` -> `["a", "b"]`)
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

/// Read a global variable, `None` when it is not defined
pub fn global_var(host: &mut dyn Host, name: &str) -> Result<Option<Value>> {
    let exists = host.eval(&format!("exists('g:{}')", name))?;
    if exists.as_i64().unwrap_or(0) == 0 {
        return Ok(None);
    }
    host.eval(&format!("g:{}", name)).map(Some)
}
