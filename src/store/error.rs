use thiserror::Error;

/// Failure kinds surfaced by [`CredentialStore`](crate::store::CredentialStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("user not found")]
    NotFound,

    /// Wrong password and unknown email both map here so callers cannot
    /// tell which accounts exist.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("schema migration {from} -> {to} failed: {source}")]
    Migration {
        from: i64,
        to: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },

    #[error("password hashing error: {0}")]
    Hashing(String),
}

impl StoreError {
    /// Maps a write error, turning a unique-constraint violation into
    /// [`StoreError::DuplicateEmail`].
    pub(crate) fn from_insert(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
            _ => StoreError::Storage(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
