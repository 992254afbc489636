use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::store::{MigrationFailurePolicy, StoreOptions};

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
    pub on_migration_failure: MigrationFailurePolicy,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub host: String,
    pub port: u16,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let on_migration_failure = match std::env::var("MIGRATION_FAILURE") {
            Ok(v) => v.parse().context("MIGRATION_FAILURE")?,
            Err(_) => MigrationFailurePolicy::default(),
        };
        Ok(Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://credstore.db".into()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 5),
            busy_timeout_secs: env_or("DB_BUSY_TIMEOUT_SECS", 5),
            on_migration_failure,
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            database_url: self.url.clone(),
            max_connections: self.max_connections,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
            on_migration_failure: self.on_migration_failure,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig::from_env()?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "credstore".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "credstore-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };
        Ok(Self {
            database,
            jwt,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_missing_or_garbage() {
        std::env::set_var("CREDSTORE_TEST_GARBAGE_PORT", "not-a-number");
        assert_eq!(env_or("CREDSTORE_TEST_GARBAGE_PORT", 8080u16), 8080);
        assert_eq!(env_or("CREDSTORE_TEST_UNSET_KEY", 3u32), 3);
        std::env::set_var("CREDSTORE_TEST_GOOD_PORT", "9090");
        assert_eq!(env_or("CREDSTORE_TEST_GOOD_PORT", 8080u16), 9090);
    }

    #[test]
    fn store_options_carry_database_settings() {
        let db = DatabaseConfig {
            url: "sqlite::memory:".into(),
            max_connections: 3,
            busy_timeout_secs: 7,
            on_migration_failure: MigrationFailurePolicy::Rebuild,
        };
        let opts = db.store_options();
        assert_eq!(opts.database_url, "sqlite::memory:");
        assert_eq!(opts.max_connections, 3);
        assert_eq!(opts.busy_timeout, Duration::from_secs(7));
        assert_eq!(opts.on_migration_failure, MigrationFailurePolicy::Rebuild);
    }
}
