//! Chronicle Runtime — wiring for the event-sourced command path.
//!
//! A [`context::RuntimeContext`] is built once from a
//! [`config::RuntimeConfig`] and hands out repositories, the command bus
//! and the idempotent handler invoker. Tests build independent contexts.

pub mod bus;
pub mod cache;
pub mod command_result;
pub mod config;
pub mod context;
pub mod error;
pub mod handling;
pub mod repository;
pub mod telemetry;
