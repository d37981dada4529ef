//! Request Executor over `reqwest`.
//!
//! Implements the `tgb-core` [`BotApi`](tgb_core::ports::BotApi) port against
//! the remote HTTP API.

mod client;
mod files;

pub use client::ApiClient;
