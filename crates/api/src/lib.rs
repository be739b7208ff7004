//! HTTP surface for generation jobs and agent runs.
//!
//! Exposes config, state, error mapping, routes and the websocket event
//! streams so integration tests and the binary entrypoint share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
