//! Operator JSON API for Herald.
//!
//! Exposes an axum [`Router`] backed by any
//! [`herald_core::store::ScheduleStore`]: inspect notification rows, cancel a
//! pending row, requeue a failed one. Auth and TLS are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", herald_api::api_router(store.clone()))
//! ```

pub mod error;
pub mod notifications;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use herald_core::store::ScheduleStore;

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: ScheduleStore + 'static,
{
  Router::new()
    .route("/notifications", get(notifications::list::<S>))
    .route("/notifications/{id}", get(notifications::get_one::<S>))
    .route("/notifications/{id}/cancel", post(notifications::cancel::<S>))
    .route("/notifications/{id}/requeue", post(notifications::requeue::<S>))
    .with_state(store)
}
