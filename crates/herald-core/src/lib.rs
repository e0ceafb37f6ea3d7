//! Core types and pure logic for the Herald scheduled notification engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. It owns
//! the notification state model, policy resolution, schedule generation and
//! template rendering, plus the two seams every other crate plugs into: the
//! [`store::ScheduleStore`] and [`transport::MessageTransport`] traits.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod generator;
pub mod notification;
pub mod policy;
pub mod recurrence;
pub mod store;
pub mod subject;
pub mod template;
pub mod transport;

pub use error::{Error, Result};
