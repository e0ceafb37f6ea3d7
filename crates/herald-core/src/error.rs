//! Error types for `herald-core`.
//!
//! The variants follow the recovery taxonomy of the engine: configuration
//! problems are recovered with defaults, missing subjects and templates with a
//! fallback or a skip, dedup conflicts are treated as "already scheduled",
//! transport failures end up on the row, and storage failures skip one item.

use thiserror::Error;
use uuid::Uuid;

use crate::notification::{DedupKey, NotificationStatus};

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("notification already scheduled: {0}")]
  Conflict(DedupKey),

  #[error("transport error: {0}")]
  Transport(#[from] crate::transport::TransportError),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("notification {id} cannot move from {from} to {to}")]
  InvalidTransition {
    id:   Uuid,
    from: NotificationStatus,
    to:   NotificationStatus,
  },

  #[error("unknown {what} discriminant: {value:?}")]
  UnknownDiscriminant { what: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error into [`Error::Storage`].
  pub fn storage<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
