//! Configuration for vigiad.
//!
//! Tunables come from an optional TOML file (`vigia.toml` in the
//! working directory, the user config dir, or `--config`). Credentials
//! never live in the file: they come from the environment, with the
//! same variable names the deployment has always used (`GLPI_USER`,
//! `GLPI_PASS`, `GMAIL_USER`, `GMAIL_PASSWORD`, `DESTINATARIO`); a
//! `.env` file is honored. A missing or blank credential is
//! startup-fatal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Default config file, resolved against the working directory.
pub const CONFIG_PATH: &str = "vigia.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("config {path} is malformed: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("environment variable {0} is not set or is empty")]
    MissingVar(&'static str),
}

/// Daemon tunables. Every field has a default, so running without a
/// config file is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub glpi: GlpiConfig,
    pub mail: MailConfig,

    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,

    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,

    /// Where the knowledge base, ledger and downloaded images live.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlpiConfig {
    /// Portal root, without a trailing slash.
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    /// Implicit-TLS submission port.
    pub smtp_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            glpi: GlpiConfig::default(),
            mail: MailConfig::default(),
            poll_interval_secs: 600,
            http_timeout_secs: 30,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for GlpiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://suporte.rn.senac.br".to_string(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
        }
    }
}

impl Config {
    /// Load the config. An explicit `--config` path must exist. Without
    /// one the search order is the working directory, then the user
    /// config dir, then built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(explicit) = path {
            return Self::load_from_path(explicit);
        }

        let local = Path::new(CONFIG_PATH);
        if local.exists() {
            return Self::load_from_path(local);
        }
        if let Some(user) = dirs::config_dir().map(|d| d.join("vigia").join(CONFIG_PATH)) {
            if user.exists() {
                return Self::load_from_path(&user);
            }
        }

        info!("No {} found, using defaults", CONFIG_PATH);
        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.data_dir.join("base_de_conhecimentos.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("chamados_enviados.json")
    }

    pub fn image_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

/// Required account credentials, environment-only so they never end up
/// committed inside a config file.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub glpi_user: String,
    pub glpi_pass: String,
    pub mail_user: String,
    pub mail_password: String,
    pub recipient: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Resolve through `get` so tests can inject values without touching
    /// the process environment.
    pub fn resolve<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| match get(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ConfigError::MissingVar(name)),
        };

        Ok(Self {
            glpi_user: required("GLPI_USER")?,
            glpi_pass: required("GLPI_PASS")?,
            mail_user: required("GMAIL_USER")?,
            mail_password: required("GMAIL_PASSWORD")?,
            recipient: required("DESTINATARIO")?,
        })
    }
}
