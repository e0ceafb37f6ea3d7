//! Error type for `herald-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] herald_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {column} value: {value:?}")]
  Decode { column: &'static str, value: String },

  /// `update_status` only accepts terminal statuses.
  #[error("status update for {0} must target a terminal status")]
  NonTerminalUpdate(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
