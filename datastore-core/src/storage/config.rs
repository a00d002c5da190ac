//! Backend selection and connection configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};
use crate::constants::{POOL_CONNECTIONS_MAX_DEFAULT, POSTGRES_HOST_DEFAULT, POSTGRES_PORT_DEFAULT};

// =============================================================================
// Backend Kind
// =============================================================================

/// Which backend implements the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Volatile in-process map
    #[default]
    #[serde(rename = "memory")]
    Memory,
    /// Durable PostgreSQL table
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
}

impl BackendKind {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgresql",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgresql" | "postgres" => Ok(Self::Postgres),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Identity Key
// =============================================================================

/// Identity of a cached backend instance.
///
/// Credentials, SSL and pool sizing do not participate: two configurations
/// addressing the same endpoint as the same user share one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// The single memory backend
    Memory,
    /// One pool per endpoint and user
    Postgres {
        /// Server host
        host: String,
        /// Server port
        port: u16,
        /// Database name
        database: String,
        /// Login role
        user: String,
    },
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Postgres {
                host,
                port,
                database,
                user,
            } => write!(f, "postgresql_{host}_{port}_{database}_{user}"),
        }
    }
}

// =============================================================================
// PostgresConfig
// =============================================================================

/// Connection parameters for the relational backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Server host
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    pub database: String,
    /// Login role
    pub user: String,
    /// Login password
    #[serde(default)]
    pub password: String,
    /// Encrypt the connection (certificates are not verified)
    #[serde(default)]
    pub ssl: bool,
    /// Upper bound on pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_host() -> String {
    POSTGRES_HOST_DEFAULT.to_string()
}

fn default_port() -> u16 {
    POSTGRES_PORT_DEFAULT
}

fn default_max_connections() -> u32 {
    POOL_CONNECTIONS_MAX_DEFAULT
}

impl PostgresConfig {
    /// Create a config with default host, port, SSL and pool size.
    #[must_use]
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ssl: false,
            max_connections: default_max_connections(),
        }
    }

    /// Set host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable SSL.
    #[must_use]
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Set the pool bound.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Check the fields that can be checked without connecting.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must be positive"));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::invalid("database", "cannot be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::invalid("user", "cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("max_connections", "must be positive"));
        }
        Ok(())
    }

    /// Identity key used by the factory cache.
    #[must_use]
    pub fn identity(&self) -> StorageKey {
        StorageKey::Postgres {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
        }
    }

    /// Load from `{prefix}_HOST`, `{prefix}_PORT`, `{prefix}_DATABASE`,
    /// `{prefix}_USER`, `{prefix}_PASSWORD`, `{prefix}_SSL` and
    /// `{prefix}_MAX_CONNECTIONS`.
    ///
    /// Unset variables take their defaults; database and user default to
    /// empty and are caught by [`validate`](Self::validate).
    ///
    /// # Errors
    /// Returns `ConfigError::Env` if a numeric or boolean variable does not
    /// parse.
    pub fn from_env(prefix: &str) -> ConfigResult<Self> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            let value = lookup(&name);
            (name, value)
        };

        let mut config = Self::new("", "", "");

        if let (_, Some(host)) = var("HOST") {
            config.host = host;
        }
        if let (name, Some(port)) = var("PORT") {
            config.port = parse_env(&name, &port)?;
        }
        if let (_, Some(database)) = var("DATABASE") {
            config.database = database;
        }
        if let (_, Some(user)) = var("USER") {
            config.user = user;
        }
        if let (_, Some(password)) = var("PASSWORD") {
            config.password = password;
        }
        if let (name, Some(ssl)) = var("SSL") {
            config.ssl = parse_env_bool(&name, &ssl)?;
        }
        if let (name, Some(max)) = var("MAX_CONNECTIONS") {
            config.max_connections = parse_env(&name, &max)?;
        }

        Ok(config)
    }
}

fn parse_env<T>(var: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

fn parse_env_bool(var: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Env {
            var: var.to_string(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
