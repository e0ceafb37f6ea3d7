//! Error type for `herald-engine`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] herald_core::Error),
}

impl Error {
  /// Wrap a store error.
  pub fn storage<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Core(herald_core::Error::storage(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
