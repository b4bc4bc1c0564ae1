//! # configs
//!
//! Runtime settings for the AppShare binary.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults,
//! 2. an optional `config/default.{toml,yaml,json}` file,
//! 3. environment variables prefixed `APPSHARE__`, with `__` between
//!    nested keys (`APPSHARE__DATABASE__URL`, `APPSHARE__STORAGE__BACKEND`).
//!
//! `.env` is read first by [`Settings::load`] so local development can keep
//! those variables in a file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const ENV_PREFIX: &str = "APPSHARE";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_FILE: &str = "config/default";

/// Signing keys shorter than this are rejected.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("{key} is required when {when}")]
    Missing { key: &'static str, when: &'static str },

    #[error("{key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub ingestion: IngestionSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    /// Process-local tables, lost on restart.
    Memory,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,
    pub url: Option<SecretString>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            url: None,
            max_connections: 25,
            acquire_timeout_secs: 5,
        }
    }
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
    Memory,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Objects are public under this URL. For the local backend it must be
    /// the API's own `/files` route.
    pub public_base_url: String,
    pub local: LocalStorageSettings,
    pub s3: S3Settings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            public_base_url: "http://localhost:8080/files".into(),
            local: LocalStorageSettings::default(),
            s3: S3Settings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LocalStorageSettings {
    pub root: PathBuf,
    /// HMAC key for signed upload URLs.
    pub signing_key: Option<SecretString>,
}

impl Default for LocalStorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/objects"),
            signing_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<SecretString>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            // R2 expects "auto".
            region: "auto".into(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Scratch directory for downloaded binaries; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Settings {
    /// Reads `.env`, the optional config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let builder = Config::builder()
            .add_source(File::with_name(DEFAULT_FILE).required(false))
            .add_source(environment());
        Self::build(builder)
    }

    /// Same layering as [`Settings::load`], with `vars` standing in for the
    /// process environment. Keys carry the `APPSHARE__` prefix.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(environment().source(Some(vars)));
        Self::build(builder)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects combinations that would only fail later, at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.backend == DatabaseBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Missing {
                key: "database.url",
                when: "database.backend is postgres",
            });
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "database.max_connections",
                message: "must be at least 1".into(),
            });
        }

        let base = url::Url::parse(&self.storage.public_base_url).map_err(|e| {
            ConfigError::Invalid {
                key: "storage.public_base_url",
                message: e.to_string(),
            }
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                key: "storage.public_base_url",
                message: "expected an http(s) URL".into(),
            });
        }

        match self.storage.backend {
            StorageBackend::Local => {
                let key = self
                    .storage
                    .local
                    .signing_key
                    .as_ref()
                    .ok_or(ConfigError::Missing {
                        key: "storage.local.signing_key",
                        when: "storage.backend is local",
                    })?;
                if key.expose_secret().len() < MIN_SIGNING_KEY_LEN {
                    return Err(ConfigError::Invalid {
                        key: "storage.local.signing_key",
                        message: format!("must be at least {MIN_SIGNING_KEY_LEN} characters"),
                    });
                }
            }
            StorageBackend::S3 => {
                if self.storage.s3.bucket.trim().is_empty() {
                    return Err(ConfigError::Missing {
                        key: "storage.s3.bucket",
                        when: "storage.backend is s3",
                    });
                }
                if self.storage.s3.access_key_id.is_some()
                    != self.storage.s3.secret_access_key.is_some()
                {
                    return Err(ConfigError::Invalid {
                        key: "storage.s3.access_key_id",
                        message: "access key id and secret must be set together".into(),
                    });
                }
            }
            StorageBackend::Memory => {}
        }
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
