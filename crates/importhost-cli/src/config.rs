//! Configuration file management for the importhost CLI.
//!
//! Provides a TOML config file at `~/.config/importhost/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use importhost_core::{Backend, HarnessConfig};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub backend: BackendSection,
    pub harness: HarnessConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// Backend name, e.g. `"git"`.
    pub name: String,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            name: Backend::Git.to_string(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the importhost config directory.
///
/// Uses `$XDG_CONFIG_HOME/importhost` or `~/.config/importhost` on every
/// platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("importhost");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("importhost")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write a config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

/// Write a default config file unless one exists (or `force` is set).
pub fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    save_config(path, &ConfigFile::default())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved CLI configuration.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub backend: Backend,
    pub harness: HarnessConfig,
}

/// Overrides taken from command-line flags.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub backend: Option<String>,
    pub listen_host: Option<String>,
    pub readiness_timeout_ms: Option<u64>,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// A missing file at the default location is not an error; a missing
    /// file at an explicitly given `config_path` is.
    pub fn resolve(config_path: Option<&Path>, overrides: CliOverrides) -> Result<Self> {
        let file = match config_path {
            Some(path) => load_config(path)?,
            None => load_config(&self::config_path()).unwrap_or_default(),
        };

        let mut harness = file.harness.with_env_overrides();
        if let Some(host) = overrides.listen_host {
            harness.listen_host = host;
        }
        if let Some(ms) = overrides.readiness_timeout_ms {
            harness.readiness_timeout = std::time::Duration::from_millis(ms);
        }

        let backend_name = overrides
            .backend
            .or_else(|| std::env::var("IMPORTHOST_BACKEND").ok())
            .unwrap_or(file.backend.name);
        let backend = backend_name
            .parse::<Backend>()
            .with_context(|| format!("invalid backend {backend_name:?}"))?;

        Ok(Self { backend, harness })
    }
}
