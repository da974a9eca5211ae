//! Chronicle Core — event-sourcing abstractions.
//!
//! This crate defines the aggregate lifecycle, event and command types, and
//! the storage and handling boundaries that the runtime orchestrates. It
//! contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod handling;
pub mod identity;
pub mod snapshot;
pub mod store;
pub mod transport;
