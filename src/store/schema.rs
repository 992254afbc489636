//! Canonical column set and per-version DDL for the `users` table.
//! The persisted schema version lives in SQLite's `PRAGMA user_version`.

/// Version the code expects after migrations have run.
pub const SCHEMA_VERSION: i64 = 2;

pub const TABLE_USERS: &str = "users";
pub const COLUMN_ID: &str = "id";
pub const COLUMN_EMAIL: &str = "email";
pub const COLUMN_PASSWORD_HASH: &str = "password_hash";
pub const COLUMN_FULL_NAME: &str = "full_name";
pub const COLUMN_CREATED_AT: &str = "created_at";
pub const COLUMN_LAST_LOGIN: &str = "last_login";
pub const EMAIL_INDEX: &str = "idx_users_email";

/// Version 1: identity and credentials only.
pub const CREATE_USERS_V1: &str = r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT NOT NULL DEFAULT ''
)
"#;

/// Version 2 adds timestamps and a secondary index on email.
/// SQLite rejects `ADD COLUMN` with a non-constant default, so `created_at`
/// is added bare and backfilled by [`BACKFILL_CREATED_AT_V2`].
pub const MIGRATE_V2: &[&str] = &[
    "ALTER TABLE users ADD COLUMN created_at TEXT",
    "ALTER TABLE users ADD COLUMN last_login TEXT",
    "CREATE INDEX idx_users_email ON users(email)",
];

/// Binds the migration timestamp as `?1`.
pub const BACKFILL_CREATED_AT_V2: &str =
    "UPDATE users SET created_at = ?1 WHERE created_at IS NULL";

pub const TABLE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)";

/// Highest id AUTOINCREMENT has handed out for `users`.
pub const SELECT_USERS_SEQ: &str = "SELECT seq FROM sqlite_sequence WHERE name = 'users'";
pub const SELECT_USERS_MAX_ROWID: &str = "SELECT MAX(rowid) FROM users";
pub const RESTORE_USERS_SEQ: &[&str] = &[
    "DELETE FROM sqlite_sequence WHERE name = 'users'",
    "INSERT INTO sqlite_sequence (name, seq) VALUES ('users', ?1)",
];

pub const DROP_USERS: &[&str] = &[
    "DROP INDEX IF EXISTS idx_users_email",
    "DROP TABLE IF EXISTS users",
];

/// Public projection; never selects the hash.
pub const SELECT_PROFILE: &str = r#"
SELECT id, email, full_name, created_at, last_login
FROM users
"#;
