//! SQLite backend for the Herald notification engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Besides the notification table it holds
//! the billing-side tables the engine reads (tenants, settings, customers,
//! subjects, payments, broadcasts, templates), with inherent methods to
//! populate them.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
