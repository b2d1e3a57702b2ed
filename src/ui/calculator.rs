//! Resolution of popup geometry
//!
//! Width, height, row and col are declared either as absolute cell counts or
//! as percentages of a reference size. For editor-relative popups the
//! reference is the whole editor (`columns` x `lines`); for window- and
//! cursor-relative popups it is the current window.

use anyhow::Result;

use super::popup::PopUpConfiguration;
use super::LayoutError;
use crate::host::{FloatConfig, Host, Relative};

/// A size or position: absolute cells, or a percentage like `"50%"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dimension {
    Absolute(i64),
    Percent(String),
}

impl Default for Dimension {
    fn default() -> Self {
        Dimension::Absolute(0)
    }
}

impl From<i64> for Dimension {
    fn from(value: i64) -> Self {
        Dimension::Absolute(value)
    }
}

impl From<i32> for Dimension {
    fn from(value: i32) -> Self {
        Dimension::Absolute(i64::from(value))
    }
}

impl From<&str> for Dimension {
    fn from(value: &str) -> Self {
        Dimension::Percent(value.to_string())
    }
}

impl Dimension {
    /// Resolve against `max`: `p%` becomes `floor(p * max / 100)`
    pub fn resolve(&self, max: i64) -> Result<i64, LayoutError> {
        match self {
            Dimension::Absolute(value) => Ok(*value),
            Dimension::Percent(raw) => {
                let percent = raw
                    .trim()
                    .strip_suffix('%')
                    .and_then(|p| p.trim().parse::<i64>().ok())
                    .ok_or_else(|| LayoutError::InvalidDimension(raw.clone()))?;
                percent
                    .checked_mul(max)
                    .map(|scaled| scaled.div_euclid(100))
                    .ok_or_else(|| LayoutError::InvalidDimension(raw.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Horizontal,
    Vertical,
}

/// Reference sizes percentages resolve against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// (columns, lines)
    pub editor: (i64, i64),
    /// (width, height) of the current window
    pub window: (i64, i64),
}

impl Bounds {
    pub fn fetch(host: &mut dyn Host) -> Result<Self> {
        let editor = host.editor_size()?;
        let current = host.get_current_win()?;
        let window = host.win_get_size(current)?;
        Ok(Self { editor, window })
    }

    fn max(&self, relative: Relative, axis: Axis) -> i64 {
        let (width, height) = match relative {
            Relative::Editor => self.editor,
            Relative::Win | Relative::Cursor => self.window,
        };
        match axis {
            Axis::Horizontal => width,
            Axis::Vertical => height,
        }
    }
}

/// Resolve every dimension of `config` to absolute cells
pub fn to_absolute(config: &PopUpConfiguration, bounds: &Bounds) -> Result<FloatConfig, LayoutError> {
    let relative = config.relative;
    let horizontal = bounds.max(relative, Axis::Horizontal);
    let vertical = bounds.max(relative, Axis::Vertical);

    Ok(FloatConfig {
        relative,
        anchor: config.anchor,
        width: config.width.resolve(horizontal)?,
        height: config.height.resolve(vertical)?,
        row: config.row.resolve(vertical)?,
        col: config.col.resolve(horizontal)?,
        zindex: config.zindex,
        style: config.style,
        border: config.border.clone(),
        title: config.title.clone(),
        title_pos: config.title_pos,
        noautocmd: config.noautocmd,
    })
}

/// Resolve, then treat (row, col) as the center of the popup.
/// Cursor-relative popups keep their position.
pub fn center(config: &PopUpConfiguration, bounds: &Bounds) -> Result<FloatConfig, LayoutError> {
    let mut resolved = to_absolute(config, bounds)?;
    if matches!(resolved.relative, Relative::Editor | Relative::Win) {
        resolved.row -= resolved.height.div_euclid(2) + 1;
        resolved.col -= resolved.width.div_euclid(2) + 1;
    }
    Ok(resolved)
}
