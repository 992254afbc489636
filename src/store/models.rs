use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Public view of a user row. Has no hash field, so it cannot leak one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

/// Row used only inside the store to verify a login attempt.
#[derive(Debug, FromRow)]
pub(crate) struct StoredCredential {
    pub id: i64,
    pub password_hash: String,
}
