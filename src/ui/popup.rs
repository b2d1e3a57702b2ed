//! Floating window bound to a scratch buffer
//!
//! A popup is either *uncontrolled* (its own declared geometry, centered on
//! its row/col) or *controlled* (geometry pushed down by the box that holds
//! it). Every mount starts again from the declared configuration, so a popup
//! can be mounted, unmounted and remounted any number of times while its
//! buffer and content survive.

use std::ops::{Index, IndexMut};

use anyhow::Result;
use tracing::{debug, warn};

use super::calculator::{self, Bounds, Dimension};
use super::LayoutError;
use crate::host::{
    Anchor, Border, BufferId, Dispatcher, FloatConfig, Host, Relative, Style, TitlePos, Value,
    WindowId,
};

/// Declared popup configuration, before geometry is resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PopUpConfiguration {
    pub relative: Relative,
    pub anchor: Anchor,
    pub width: Dimension,
    pub height: Dimension,
    pub row: Dimension,
    pub col: Dimension,
    pub zindex: i64,
    pub style: Style,
    pub border: Border,
    pub title: String,
    pub title_pos: TitlePos,
    pub noautocmd: bool,
}

impl Default for PopUpConfiguration {
    fn default() -> Self {
        Self {
            relative: Relative::Editor,
            anchor: Anchor::NW,
            width: Dimension::Absolute(40),
            height: Dimension::Absolute(10),
            row: Dimension::Absolute(0),
            col: Dimension::Absolute(0),
            zindex: 500,
            style: Style::Minimal,
            border: Border::Single,
            title: String::new(),
            title_pos: TitlePos::Center,
            noautocmd: false,
        }
    }
}

/// Space between the padding window's edge and the content window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Padding {
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
    pub left: i64,
}

impl Padding {
    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.right == 0 && self.bottom == 0 && self.left == 0
    }
}

/// Index of a popup in its [`PopupStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopupId(pub usize);

/// Callbacks every popup registers for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupEvent {
    /// `q` pressed in the popup
    Unmount(PopupId),
    /// The popup's buffer was entered
    Entered(PopupId),
}

/// Builder for a [`PopUp`]; nothing touches the host until [`PopupStore::create`]
#[derive(Debug, Clone, Default)]
pub struct PopUpBuilder {
    config: PopUpConfiguration,
    padding: Padding,
    enter: bool,
    window_options: Vec<(String, Value)>,
}

impl PopUpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PopUpConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.config.title = title.into();
        self
    }

    pub fn border(mut self, border: Border) -> Self {
        self.config.border = border;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Enter the content window when it opens
    pub fn enter(mut self, enter: bool) -> Self {
        self.enter = enter;
        self
    }

    /// Window option applied after every mount
    pub fn window_option(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.window_options.push((name.to_string(), value.into()));
        self
    }
}

pub struct PopUp {
    id: PopupId,
    original: PopUpConfiguration,
    controlled: Option<FloatConfig>,
    config: Option<FloatConfig>,
    padding: Padding,
    enter: bool,
    window_options: Vec<(String, Value)>,
    buffer: BufferId,
    padding_buffer: BufferId,
    window: Option<WindowId>,
    padding_window: Option<WindowId>,
}

impl PopUp {
    pub fn id(&self) -> PopupId {
        self.id
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Content window, while mounted
    pub fn window(&self) -> Option<WindowId> {
        self.window
    }

    pub fn padding_window(&self) -> Option<WindowId> {
        self.padding_window
    }

    pub fn is_mounted(&self) -> bool {
        self.window.is_some()
    }

    pub fn title(&self) -> &str {
        &self.original.title
    }

    /// Configuration the content window was last opened with
    pub fn live_config(&self) -> Option<&FloatConfig> {
        self.config.as_ref()
    }

    /// Update the title; shows up on the next mount
    pub fn set_title(&mut self, title: &str) {
        self.original.title = title.to_string();
        if let Some(config) = self.config.as_mut() {
            if self.padding.is_empty() {
                config.title = title.to_string();
            }
        }
        if let Some(controlled) = self.controlled.as_mut() {
            controlled.title = title.to_string();
        }
    }

    /// Geometry handed down by the enclosing box
    pub fn define_controlled_configurations(
        &mut self,
        width: i64,
        height: i64,
        row: i64,
        col: i64,
        relative: Relative,
    ) {
        let original = &self.original;
        self.controlled = Some(FloatConfig {
            relative,
            anchor: original.anchor,
            width,
            height,
            row,
            col,
            zindex: original.zindex,
            style: original.style,
            border: original.border.clone(),
            title: original.title.clone(),
            title_pos: original.title_pos,
            noautocmd: original.noautocmd,
        });
    }

    /// Open the popup. A mounted popup is closed and reopened.
    pub fn mount(&mut self, host: &mut dyn Host, controlled: bool) -> Result<()> {
        if self.is_mounted() || self.padding_window.is_some() {
            self.unmount(host)?;
        }

        let mut config = if controlled {
            self.controlled
                .clone()
                .ok_or(LayoutError::Unprocessed(self.id.0))?
        } else {
            let bounds = Bounds::fetch(host)?;
            calculator::center(&self.original, &bounds)?
        };

        if !self.padding.is_empty() {
            let padding_window = host.open_win(self.padding_buffer, false, &config)?;
            self.padding_window = Some(padding_window);
            shrink_for_padding(&mut config, &self.padding);
        }

        debug!(
            popup = self.id.0,
            width = config.width,
            height = config.height,
            row = config.row,
            col = config.col,
            "mounting popup"
        );
        let window = match host.open_win(self.buffer, self.enter, &config) {
            Ok(window) => window,
            Err(e) => {
                // Take the padding window down with the failed content window
                self.unmount(host)?;
                return Err(e);
            }
        };
        self.window = Some(window);
        self.config = Some(config);

        for (name, value) in &self.window_options {
            host.win_set_option(window, name, value.clone())?;
        }
        Ok(())
    }

    /// Close the content window, then the padding window
    pub fn unmount(&mut self, host: &mut dyn Host) -> Result<()> {
        for window in [self.window.take(), self.padding_window.take()]
            .into_iter()
            .flatten()
        {
            // The user may already have closed it with :q
            if let Err(e) = host.win_close(window, true) {
                warn!(popup = self.id.0, window = window.0, "failed to close window: {}", e);
            }
        }
        Ok(())
    }

    /// Make the content window current
    pub fn focus(&self, host: &mut dyn Host) -> Result<()> {
        match self.window {
            Some(window) => host.set_current_win(window),
            None => Ok(()),
        }
    }

    /// Map `lhs` in this popup's buffer to a plugin action
    pub fn map<A: Clone>(
        &self,
        host: &mut dyn Host,
        dispatcher: &mut Dispatcher<A>,
        mode: &str,
        lhs: &str,
        action: A,
    ) -> Result<()> {
        dispatcher.map(host, self.buffer, &[mode], lhs, action)
    }

    /// Run an Ex command in the content window, if mounted
    pub fn window_command(&self, host: &mut dyn Host, command: &str) -> Result<()> {
        match self.window {
            Some(window) => host.win_execute(window, command),
            None => Ok(()),
        }
    }
}

/// The padding window takes the popup's place; the content shrinks inside it
fn shrink_for_padding(config: &mut FloatConfig, padding: &Padding) {
    config.border = Border::None;
    config.title.clear();
    config.width -= padding.left + padding.right;
    config.height -= padding.top + padding.bottom;
    config.row += padding.top;
    config.col += padding.left;
}

/// Owner of every popup of a handler
#[derive(Default)]
pub struct PopupStore {
    popups: Vec<PopUp>,
}

impl PopupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the popup's buffers and wire its default callbacks:
    /// `q` and entering the buffer both report back as [`PopupEvent`]s
    pub fn create<A>(
        &mut self,
        host: &mut dyn Host,
        dispatcher: &mut Dispatcher<A>,
        builder: PopUpBuilder,
    ) -> Result<PopupId>
    where
        A: Clone + From<PopupEvent>,
    {
        let id = PopupId(self.popups.len());
        let buffer = host.create_buf(false, true)?;
        let padding_buffer = host.create_buf(false, true)?;

        dispatcher.map(host, buffer, &["n"], "q", A::from(PopupEvent::Unmount(id)))?;
        dispatcher.autocmd(
            host,
            buffer,
            &["BufEnter"],
            "update_last_popup",
            A::from(PopupEvent::Entered(id)),
        )?;

        self.popups.push(PopUp {
            id,
            original: builder.config,
            controlled: None,
            config: None,
            padding: builder.padding,
            enter: builder.enter,
            window_options: builder.window_options,
            buffer,
            padding_buffer,
            window: None,
            padding_window: None,
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.popups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.popups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PopUp> {
        self.popups.iter()
    }

    /// Popup whose content buffer is `buffer`
    pub fn find_by_buffer(&self, buffer: BufferId) -> Option<PopupId> {
        self.popups.iter().find(|p| p.buffer == buffer).map(|p| p.id)
    }
}

impl Index<PopupId> for PopupStore {
    type Output = PopUp;

    fn index(&self, id: PopupId) -> &PopUp {
        &self.popups[id.0]
    }
}

impl IndexMut<PopupId> for PopupStore {
    fn index_mut(&mut self, id: PopupId) -> &mut PopUp {
        &mut self.popups[id.0]
    }
}
