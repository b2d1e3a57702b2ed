//! Chat front ends: a vertical split beside the code, and the in-place
//! popup layout over it

pub mod inplace;
pub mod vsplit;

pub use inplace::{InPlaceAction, InPlaceChatHandler};
pub use vsplit::VSplitChatHandler;
