//! Credential store: the `users` table, its schema lifecycle and the
//! register/login operations over it.
//!
//! Layout:
//! - `schema.rs`: canonical column names and DDL per schema version
//! - `migrate.rs`: version state machine and failure policy
//! - `models.rs`: row types
//! - `repo.rs`: [`CredentialStore`] operations
//! - `error.rs`: [`StoreError`] taxonomy

pub mod error;
pub mod migrate;
pub mod models;
pub mod repo;
pub mod schema;

pub use error::{StoreError, StoreResult};
pub use migrate::MigrationFailurePolicy;
pub use models::UserProfile;
pub use repo::{connect, normalize_email, CredentialStore, StoreOptions};

/// In-memory SQLite pool pinned to one connection so the database outlives
/// each query.
#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("Failed to create test pool")
}
