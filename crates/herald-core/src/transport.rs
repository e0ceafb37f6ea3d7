//! The messaging channel seam.
//!
//! Any provider that can send a text and an (optionally captioned) image to a
//! chat identifier can carry notifications.

use std::future::Future;

use thiserror::Error;

/// A failed send, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
  pub message: String,
}

impl TransportError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

pub trait MessageTransport: Send + Sync {
  fn send_text<'a>(
    &'a self,
    recipient: &'a str,
    text: &'a str,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a;

  fn send_image<'a>(
    &'a self,
    recipient: &'a str,
    image_url: &'a str,
    caption: Option<&'a str>,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a;
}
