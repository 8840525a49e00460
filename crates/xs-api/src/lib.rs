//! # xs-api: REST and SSE boundary for xswitch
//!
//! Exposes url-test, start/stop/status of the single tunnel, auto-connect,
//! engine availability and the live log stream over HTTP.

#![deny(unused_must_use)]

pub mod error;
pub mod handlers;
pub mod server;
pub mod stream;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiState};
