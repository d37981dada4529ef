//! Bot facade over the request executor, the long-poll engine and the
//! webhook server.

pub mod bot;
pub mod polling;
pub mod webhook;

pub use bot::Bot;
