//! Daemon configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via OVSDB_MIRROR_CONFIG or the first argument)
//! 3. Environment variables

use ovsdb_client::{ClientConfig, Endpoint, TlsClientConfig};
use ovsdb_core::{Condition, DbSchema, Generation, MonitorRequest, MonitorRequests};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server connection settings.
    pub connection: ConnectionConfig,
    /// TLS settings, used by `ssl:` endpoints.
    pub tls: TlsClientConfig,
    /// What to mirror.
    pub mirror: MirrorConfig,
}

impl Config {
    /// Loads configuration from a YAML file, then applies environment
    /// variable overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parses a YAML file without overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up by variable name.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.connection.apply_overrides(&var);

        if let Some(path) = var("OVSDB_TLS_CA_CERT") {
            self.tls.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("OVSDB_TLS_CLIENT_CERT") {
            self.tls.client_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = var("OVSDB_TLS_CLIENT_KEY") {
            self.tls.client_key_path = Some(PathBuf::from(path));
        }

        self.mirror.apply_overrides(&var);
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.connection.endpoint()?;

        if endpoint.is_tls()
            && (self.tls.ca_cert_path.is_none()
                || self.tls.client_cert_path.is_none()
                || self.tls.client_key_path.is_none())
        {
            return Err(ConfigError::Validation(format!(
                "{} requires tls.ca_cert_path, tls.client_cert_path and tls.client_key_path",
                endpoint
            )));
        }
        self.tls
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.mirror.database.is_empty() {
            return Err(ConfigError::Validation("mirror.database is empty".to_string()));
        }
        if self.mirror.name.is_empty() {
            return Err(ConfigError::Validation("mirror.name is empty".to_string()));
        }
        if self.mirror.tables.is_empty() {
            return Err(ConfigError::Validation("mirror.tables is empty".to_string()));
        }
        for table in &self.mirror.tables {
            if table.where_.is_some() && !self.mirror.generation.is_conditional() {
                return Err(ConfigError::Validation(format!(
                    "table {} has a where clause but {} cannot filter",
                    table.table, self.mirror.generation
                )));
            }
        }
        Ok(())
    }

    /// Builds the client configuration.
    pub fn to_client_config(&self) -> Result<ClientConfig, ConfigError> {
        let endpoint = self.connection.endpoint()?;
        let mut config = ClientConfig::new(endpoint.clone())
            .with_connect_timeout(Duration::from_secs(self.connection.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(self.connection.request_timeout_secs))
            .with_reconnect_backoff(Duration::from_millis(self.connection.reconnect_backoff_ms))
            .with_keepalive(
                self.connection.keepalive_interval(),
                Duration::from_secs(self.connection.keepalive_timeout_secs),
            );
        if endpoint.is_tls() {
            config = config.with_tls(self.tls.clone());
        }
        Ok(config)
    }

    /// Builds the request set against the fetched schema.
    pub fn to_requests(&self, schema: Arc<DbSchema>) -> Result<MonitorRequests, ConfigError> {
        let mut requests = MonitorRequests::new(schema.clone(), self.mirror.generation);
        for entry in &self.mirror.tables {
            let table = schema
                .table(&entry.table)
                .map_err(|e| ConfigError::Validation(e.to_string()))?;

            let mut request = if entry.columns.is_empty() {
                MonitorRequest::all()
            } else {
                MonitorRequest::columns(entry.columns.iter().cloned())
            };

            if let Some(conditions) = &entry.where_ {
                let items = conditions.as_array().ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "where of table {} must be a list of conditions",
                        entry.table
                    ))
                })?;
                let parsed = items
                    .iter()
                    .map(|c| Condition::from_json(c, table))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::Validation(e.to_string()))?;
                request = request.with_where(parsed);
            }

            requests = requests.add(entry.table.as_str(), request);
        }

        requests
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(requests)
    }
}

/// Server connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `tcp:HOST:PORT`, `ssl:HOST:PORT` or `unix:PATH`.
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub reconnect_backoff_ms: u64,
    /// 0 disables keep-alive.
    pub keepalive_interval_secs: u64,
    pub keepalive_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "unix:/var/run/openvswitch/db.sock".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            reconnect_backoff_ms: 1000,
            keepalive_interval_secs: 30,
            keepalive_timeout_secs: 5,
        }
    }
}

impl ConnectionConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = var("OVSDB_ENDPOINT") {
            self.endpoint = endpoint;
        }

        if let Some(secs) = var("OVSDB_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.connect_timeout_secs = secs;
        }

        if let Some(secs) = var("OVSDB_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }

        if let Some(ms) = var("OVSDB_RECONNECT_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_backoff_ms = ms;
        }

        if let Some(secs) = var("OVSDB_KEEPALIVE_INTERVAL").and_then(|v| v.parse().ok()) {
            self.keepalive_interval_secs = secs;
        }
    }

    /// Parses the endpoint string.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        self.endpoint
            .parse()
            .map_err(|e: ovsdb_client::ClientError| ConfigError::Validation(e.to_string()))
    }

    /// Returns the keep-alive interval, `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }
}

/// What to mirror.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub database: String,
    /// Subscription name.
    pub name: String,
    pub generation: Generation,
    pub tables: Vec<TableConfig>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            database: "Open_vSwitch".to_string(),
            name: "mirror".to_string(),
            generation: Generation::ConditionalSince,
            tables: vec![TableConfig {
                table: "Open_vSwitch".to_string(),
                columns: Vec::new(),
                where_: None,
            }],
        }
    }
}

impl MirrorConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(database) = var("OVSDB_DATABASE") {
            self.database = database;
        }

        if let Some(name) = var("OVSDB_MONITOR_NAME") {
            self.name = name;
        }

        if let Some(generation) = var("OVSDB_GENERATION").and_then(|v| Generation::parse(&v)) {
            self.generation = generation;
        }
    }
}

/// One mirrored table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub table: String,
    /// Empty means all columns.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Conditions as `[column, function, value]` triples.
    #[serde(default, rename = "where")]
    pub where_: Option<Value>,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
