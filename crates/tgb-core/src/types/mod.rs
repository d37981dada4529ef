//! Wire types for the subset of the Bot API the dispatcher inspects.
//!
//! Every struct keeps unknown fields in an `extra` map so nothing the remote
//! service sends is lost when a payload is handed to a listener.

mod message;
mod update;

pub use message::{Chat, Message, MessageKind, User, MESSAGE_KINDS};
pub use update::{CallbackQuery, InlineQuery, Update, UpdateKind};
