//! Concrete [`MessageTransport`]s: a JSON bot API over HTTP, and a logging
//! stand-in for dry runs.

use std::{future::Future, time::Duration};

use anyhow::Context as _;
use herald_core::transport::{MessageTransport, TransportError};
use reqwest::Client;
use serde::Serialize;

use crate::config::{TransportConfig, TransportKind};

// ─── HTTP ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SendMessage<'a> {
  chat_id: &'a str,
  text:    &'a str,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
  chat_id: &'a str,
  photo:   &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  caption: Option<&'a str>,
}

/// Sends through a Telegram-style bot API: `POST {base_url}/sendMessage` and
/// `POST {base_url}/sendPhoto` with JSON bodies.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpTransport {
  client:   Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base_url: base_url.into() })
  }

  fn url(&self, method: &str) -> String {
    format!("{}/{method}", self.base_url.trim_end_matches('/'))
  }

  async fn post<B: Serialize + Sync>(&self, method: &str, body: &B) -> Result<(), TransportError> {
    let resp = self
      .client
      .post(self.url(method))
      .json(body)
      .send()
      .await
      .map_err(|e| TransportError::new(format!("{method} failed: {e}")))?;

    let status = resp.status();
    if status.is_success() {
      return Ok(());
    }
    let detail = resp.text().await.unwrap_or_default();
    Err(TransportError::new(format!("{method} → {status}: {detail}")))
  }
}

impl MessageTransport for HttpTransport {
  fn send_text<'a>(
    &'a self,
    recipient: &'a str,
    text: &'a str,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
    async move {
      self
        .post("sendMessage", &SendMessage { chat_id: recipient, text })
        .await
    }
  }

  fn send_image<'a>(
    &'a self,
    recipient: &'a str,
    image_url: &'a str,
    caption: Option<&'a str>,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
    async move {
      self
        .post("sendPhoto", &SendPhoto {
          chat_id: recipient,
          photo: image_url,
          caption,
        })
        .await
    }
  }
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// Logs each message and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl MessageTransport for LogTransport {
  fn send_text<'a>(
    &'a self,
    recipient: &'a str,
    text: &'a str,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
    tracing::info!(%recipient, %text, "send_text (dry run)");
    std::future::ready(Ok(()))
  }

  fn send_image<'a>(
    &'a self,
    recipient: &'a str,
    image_url: &'a str,
    caption: Option<&'a str>,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
    tracing::info!(%recipient, %image_url, ?caption, "send_image (dry run)");
    std::future::ready(Ok(()))
  }
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// The transport chosen by configuration.
#[derive(Clone)]
pub enum Transport {
  Http(HttpTransport),
  Log(LogTransport),
}

impl Transport {
  pub fn from_config(cfg: &TransportConfig) -> anyhow::Result<Self> {
    match cfg.kind {
      TransportKind::Log => Ok(Self::Log(LogTransport)),
      TransportKind::Http => {
        anyhow::ensure!(
          !cfg.base_url.is_empty(),
          "transport.base_url is required for the http transport"
        );
        let http = HttpTransport::new(&cfg.base_url, Duration::from_secs(cfg.timeout_secs))?;
        Ok(Self::Http(http))
      }
    }
  }
}

impl MessageTransport for Transport {
  fn send_text<'a>(
    &'a self,
    recipient: &'a str,
    text: &'a str,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
    async move {
      match self {
        Self::Http(t) => t.send_text(recipient, text).await,
        Self::Log(t) => t.send_text(recipient, text).await,
      }
    }
  }

  fn send_image<'a>(
    &'a self,
    recipient: &'a str,
    image_url: &'a str,
    caption: Option<&'a str>,
  ) -> impl Future<Output = Result<(), TransportError>> + Send + 'a {
    async move {
      match self {
        Self::Http(t) => t.send_image(recipient, image_url, caption).await,
        Self::Log(t) => t.send_image(recipient, image_url, caption).await,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
  };
  use serde_json::{Value, json};
  use tokio::net::TcpListener;

  use super::*;

  type Seen = Arc<Mutex<Vec<(String, Value)>>>;

  /// A fake bot API that records requests and rejects chat `"blocked"`.
  async fn fake_api() -> (String, Seen) {
    let seen: Seen = Arc::default();

    async fn handle(
      State(seen): State<Seen>,
      Path(method): Path<String>,
      Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
      let blocked = body["chat_id"] == "blocked";
      seen.lock().unwrap().push((method, body));
      if blocked {
        (StatusCode::FORBIDDEN, Json(json!({ "description": "bot was blocked" })))
      } else {
        (StatusCode::OK, Json(json!({ "ok": true })))
      }
    }

    let app = Router::new()
      .route("/bot/{method}", post(handle))
      .with_state(seen.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (format!("http://{addr}/bot/"), seen)
  }

  #[tokio::test]
  async fn http_transport_posts_json_bodies() {
    let (base_url, seen) = fake_api().await;
    let transport = HttpTransport::new(base_url, Duration::from_secs(5)).unwrap();

    transport.send_text("chat-1", "hello").await.unwrap();
    transport.send_image("chat-1", "https://img/1.png", None).await.unwrap();
    transport
      .send_image("chat-1", "https://img/2.png", Some("look"))
      .await
      .unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![
      ("sendMessage".to_owned(), json!({ "chat_id": "chat-1", "text": "hello" })),
      (
        "sendPhoto".to_owned(),
        json!({ "chat_id": "chat-1", "photo": "https://img/1.png" })
      ),
      (
        "sendPhoto".to_owned(),
        json!({ "chat_id": "chat-1", "photo": "https://img/2.png", "caption": "look" })
      ),
    ]);
  }

  #[tokio::test]
  async fn http_error_carries_status_and_body() {
    let (base_url, _) = fake_api().await;
    let transport = HttpTransport::new(base_url, Duration::from_secs(5)).unwrap();

    let err = transport.send_text("blocked", "hello").await.unwrap_err();
    assert!(err.message.contains("403"), "{}", err.message);
    assert!(err.message.contains("bot was blocked"), "{}", err.message);
  }

  #[test]
  fn http_kind_needs_base_url() {
    let cfg = TransportConfig { kind: TransportKind::Http, ..TransportConfig::default() };
    assert!(Transport::from_config(&cfg).is_err());
    assert!(matches!(
      Transport::from_config(&TransportConfig::default()),
      Ok(Transport::Log(_))
    ));
  }
}
