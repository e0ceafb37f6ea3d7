//! The two periodic jobs of Herald and the loop that drives them.
//!
//! - [`Reconciler`] cancels pending rows that became moot and tops up the
//!   queue for a rolling window of due dates and broadcast series.
//! - [`Dispatcher`] sends due rows through a
//!   [`herald_core::transport::MessageTransport`] and advances recurrence.
//! - [`Runner`] calls both on their cadences until told to stop.
//!
//! Both jobs tolerate overlapping invocations; all coordination happens in
//! the store.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod runner;

pub use config::{EngineConfig, ScheduleConfig};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{Error, Result};
pub use reconciler::{ReconcileReport, Reconciler};
pub use runner::Runner;
