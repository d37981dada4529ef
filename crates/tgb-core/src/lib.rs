//! Core of the bot API client: wire types, update dispatch and the request port.
//!
//! This crate is transport-agnostic. The HTTP request executor lives in
//! `tgb-http`; the long-poll engine, webhook server and facade live in
//! `tgb-bot`.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod events;
pub mod listeners;
pub mod logging;
pub mod ports;
pub mod types;

pub use errors::{Error, Result};
