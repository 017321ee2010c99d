//! Configuration loading for the runner.
//!
//! A config file (TOML, YAML or JSON, chosen by extension) is parsed into
//! [`EdrrConfig`]; missing fields keep their defaults. `EDRR_*` environment
//! variables are applied on top.

use std::path::Path;

use anyhow::{bail, Context, Result};
use edrr_coordination::{BackendConfig, EdrrConfig, ProviderKind, TransitionMode};
use tracing::debug;

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            other => bail!(
                "unsupported config extension '{}' for {} (expected toml, yaml, yml or json)",
                other,
                path.display()
            ),
        }
    }

    pub fn parse(self, text: &str) -> Result<EdrrConfig> {
        let config = match self {
            Self::Toml => toml::from_str(text).context("invalid TOML config")?,
            Self::Yaml => serde_yaml::from_str(text).context("invalid YAML config")?,
            Self::Json => serde_json::from_str(text).context("invalid JSON config")?,
        };
        Ok(config)
    }
}

/// Load the config file at `path` (defaults when `None`), then apply the
/// process environment.
pub fn load_config(path: Option<&Path>) -> Result<EdrrConfig> {
    let config = match path {
        Some(path) => {
            let format = ConfigFormat::from_path(path)?;
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            format
                .parse(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => EdrrConfig::default(),
    };
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Apply `EDRR_*` overrides read through `lookup`.
///
/// | Variable               | Effect                                   |
/// |------------------------|------------------------------------------|
/// | `EDRR_PROVIDER`        | provider kind (`offline`, `openai`)      |
/// | `EDRR_MODEL`           | chat model name                          |
/// | `EDRR_BASE_URL`        | provider base URL                        |
/// | `EDRR_MAX_ITERATIONS`  | max iterations per phase                 |
/// | `EDRR_TRANSITION_MODE` | `automatic` or `manual`                  |
/// | `EDRR_MEMORY_DIR`      | JSON file store as the primary backend   |
pub fn apply_env_overrides<F>(mut config: EdrrConfig, lookup: F) -> Result<EdrrConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(kind) = lookup("EDRR_PROVIDER") {
        config.provider.kind = kind
            .parse::<ProviderKind>()
            .map_err(anyhow::Error::msg)
            .context("EDRR_PROVIDER")?;
    }
    if let Some(model) = lookup("EDRR_MODEL") {
        config.provider.model = model;
    }
    if let Some(url) = lookup("EDRR_BASE_URL") {
        config.provider.base_url = url;
    }
    if let Some(max) = lookup("EDRR_MAX_ITERATIONS") {
        config.max_iterations_per_phase = max
            .trim()
            .parse()
            .with_context(|| format!("EDRR_MAX_ITERATIONS is not a number: {max}"))?;
    }
    if let Some(mode) = lookup("EDRR_TRANSITION_MODE") {
        config.transition_mode = mode
            .parse::<TransitionMode>()
            .map_err(anyhow::Error::msg)
            .context("EDRR_TRANSITION_MODE")?;
    }
    if let Some(dir) = lookup("EDRR_MEMORY_DIR") {
        config.memory.primary = BackendConfig::JsonFile { path: dir.into() };
    }

    debug!(
        provider = %config.provider.kind,
        mode = %config.transition_mode,
        max_iterations = config.max_iterations_per_phase,
        "Configuration resolved"
    );
    Ok(config)
}
