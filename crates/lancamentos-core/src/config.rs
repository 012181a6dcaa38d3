//! Process configuration, built once at start-up and passed down.
//!
//! Values come from an optional TOML file and are then overridden by
//! environment variables:
//!
//! | variable                  | default      |
//! |---------------------------|--------------|
//! | `DATABASE_URL`            | unset        |
//! | `DB_HOST`                 | `localhost`  |
//! | `DB_PORT`                 | `5432`       |
//! | `DB_USER`                 | `postgres`   |
//! | `DB_PASSWORD`             | `postgres`   |
//! | `DB_NAME`                 | `loretto_dw` |
//! | `DB_MAX_CONNECTIONS`      | `5`          |
//! | `DB_ACQUIRE_TIMEOUT_SECS` | `10`         |
//! | `ETL_STAGING_CHUNK_SIZE`  | `1000`       |
//!
//! `DATABASE_URL`, when set, takes precedence over the individual `DB_*`
//! connection parts.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    /// Rows per multi-row INSERT when filling staging.
    pub staging_chunk_size: usize,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            staging_chunk_size: 1000,
        }
    }
}

#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "loretto_dw".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match &self.url {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|err| EtlError::Config(format!("invalid DATABASE_URL: {err}"))),
            None => Ok(PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .password(&self.password)
                .database(&self.name)),
        }
    }
}

impl EtlConfig {
    /// Reads the optional TOML file, then applies the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|err| EtlError::Config(format!("{}: {err}", path.display())))
    }

    /// Overrides fields from `lookup`, which maps a variable name to its
    /// value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = &mut self.database;
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            db.url = Some(url);
        }
        if let Some(host) = lookup("DB_HOST") {
            db.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            db.port = parse_var("DB_PORT", &port)?;
        }
        if let Some(user) = lookup("DB_USER") {
            db.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            db.password = password;
        }
        if let Some(name) = lookup("DB_NAME") {
            db.name = name;
        }
        if let Some(max) = lookup("DB_MAX_CONNECTIONS") {
            db.max_connections = parse_var("DB_MAX_CONNECTIONS", &max)?;
        }
        if let Some(timeout) = lookup("DB_ACQUIRE_TIMEOUT_SECS") {
            db.acquire_timeout_secs = parse_var("DB_ACQUIRE_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(chunk) = lookup("ETL_STAGING_CHUNK_SIZE") {
            self.staging_chunk_size = parse_var("ETL_STAGING_CHUNK_SIZE", &chunk)?;
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| EtlError::Config(format!("{name}='{value}': {err}")))
}
