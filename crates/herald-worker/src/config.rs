//! Runtime configuration, read from a TOML file layered under `HERALD_`
//! environment variables (`HERALD_ENGINE__CONCURRENCY=4`).

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use herald_engine::{EngineConfig, ScheduleConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HeraldConfig {
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default)]
  pub engine:     EngineConfig,
  #[serde(default)]
  pub schedule:   ScheduleConfig,
  #[serde(default)]
  pub transport:  TransportConfig,
  #[serde(default)]
  pub api:        ApiConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("herald.db") }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
  Http,
  /// Log every message instead of sending it.
  #[default]
  Log,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  pub kind:         TransportKind,
  /// Bot API root, e.g. `https://api.telegram.org/bot<token>`.
  pub base_url:     String,
  pub timeout_secs: u64,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      kind:         TransportKind::Log,
      base_url:     String::new(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub enabled: bool,
  pub host:    String,
  pub port:    u16,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      host:    "127.0.0.1".into(),
      port:    8080,
    }
  }
}

impl HeraldConfig {
  /// Load `path` (if it exists) and apply environment overrides.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let builder = config::Config::builder()
      .add_source(config::File::from(path).required(false));
    Self::build(builder)
  }

  /// Parse a TOML document, with environment overrides applied on top.
  pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
    let builder = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml));
    Self::build(builder)
  }

  fn build(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> anyhow::Result<Self> {
    let settings = builder
      .add_source(
        config::Environment::with_prefix("HERALD")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read configuration")?;

    settings
      .try_deserialize()
      .context("failed to deserialise HeraldConfig")
  }
}
