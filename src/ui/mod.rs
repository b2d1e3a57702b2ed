//! Popup and layout engine
//!
//! A [`Layout`] owns a tree of [`LayoutBox`]es whose leaves are popups kept in
//! a [`PopupStore`]. Mounting resolves the layout's percentage geometry
//! against the editor, splits it down the tree and opens one floating window
//! per popup.

pub mod calculator;
pub mod layout;
pub mod popup;

use thiserror::Error;

pub use calculator::{Bounds, Dimension};
pub use layout::{BoxItems, Direction, Layout, LayoutBox};
pub use popup::{Padding, PopUp, PopUpBuilder, PopUpConfiguration, PopupEvent, PopupId, PopupStore};

/// Geometry errors; any of these aborts the mount in progress
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("invalid dimension {0:?}: expected an integer or a percentage like \"50%\"")]
    InvalidDimension(String),
    #[error("invalid box size {0:?}: expected a percentage like \"50%\"")]
    InvalidSize(String),
    #[error("box declares {sizes} sizes for {items} items")]
    SizeMismatch { sizes: usize, items: usize },
    #[error("popup {0} was mounted as controlled before its box was processed")]
    Unprocessed(usize),
}
