//! Runtime configuration: an optional TOML file layered under `TALLY_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path:      PathBuf,
  /// Uploaded files are copied here before ingestion.
  pub upload_dir:      PathBuf,
  /// Data table that uploads are materialised into.
  pub table:           String,
  pub batch_size:      usize,
  pub sample_size:     usize,
  pub chart_row_limit: usize,
  /// Without this, every question and analysis uses the built-in fallback.
  pub completion:      Option<CompletionSettings>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:      PathBuf::from("tally.db"),
      upload_dir:      PathBuf::from("uploads"),
      table:           "business_data".to_owned(),
      batch_size:      10_000,
      sample_size:     10_000,
      chart_row_limit: 1_000,
      completion:      None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionSettings {
  /// Accepts `POST {"prompt": ...}` and answers `{"text": ...}`.
  pub endpoint:     String,
  #[serde(default)]
  pub api_key:      Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 { 30 }

impl Settings {
  /// Read `path` if it exists, then apply `TALLY_*` overrides
  /// (`TALLY_COMPLETION__ENDPOINT` for nested keys).
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings: Self = config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("TALLY").separator("__"))
      .build()
      .with_context(|| format!("failed to read config file {path:?}"))?
      .try_deserialize()
      .context("failed to deserialise settings")?;

    Ok(Self {
      store_path: expand_tilde(&settings.store_path),
      upload_dir: expand_tilde(&settings.upload_dir),
      ..settings
    })
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
