use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::password::PasswordHasher;
use crate::store::error::{StoreError, StoreResult};
use crate::store::migrate::{self, MigrationFailurePolicy};
use crate::store::models::{StoredCredential, UserProfile};
use crate::store::schema::SELECT_PROFILE;

/// Connection and lifecycle settings for [`CredentialStore::open`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub on_migration_failure: MigrationFailurePolicy,
}

/// Owns the `users` table. Nothing else reads or writes it.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
    hasher: PasswordHasher,
}

/// Emails are compared case-insensitively and without surrounding blanks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Opens (creating if missing) the database file without touching the schema.
pub async fn connect(options: &StoreOptions) -> StoreResult<SqlitePool> {
    let connect = SqliteConnectOptions::from_str(&options.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect)
        .await?;
    Ok(pool)
}

impl CredentialStore {
    /// Opens the database and migrates the schema.
    pub async fn open(options: &StoreOptions, hasher: PasswordHasher) -> StoreResult<Self> {
        let pool = connect(options).await?;
        Self::with_pool(pool, hasher, options.on_migration_failure).await
    }

    /// Wraps an existing pool and runs pending migrations.
    pub async fn with_pool(
        pool: SqlitePool,
        hasher: PasswordHasher,
        policy: MigrationFailurePolicy,
    ) -> StoreResult<Self> {
        let found = migrate::run(&pool, policy).await?;
        debug!(found_version = found, "credential store ready");
        Ok(Self { pool, hasher })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drops every user and recreates the schema. Operator use only.
    pub async fn rebuild(&self) -> StoreResult<()> {
        migrate::rebuild(&self.pool).await
    }

    /// Hashes the password and inserts the user in one transaction.
    #[instrument(skip(self, password, full_name))]
    pub async fn register(&self, email: &str, password: &str, full_name: &str) -> StoreResult<i64> {
        let email = normalize_email(email);
        let hash = self
            .hasher
            .spawn_hash(password)
            .await
            .map_err(|e| StoreError::Hashing(format!("{e:#}")))?;

        let mut tx = self.pool.begin().await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (email, password_hash, full_name, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(&email)
        .bind(&hash)
        .bind(full_name.trim())
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_insert)?;

        tx.commit().await?;
        info!(user_id = id, email = %email, "user registered");
        Ok(id)
    }

    /// Verifies a login attempt and stamps `last_login` on success.
    ///
    /// Unknown email and wrong password both yield
    /// [`StoreError::InvalidCredentials`] after the same amount of hashing work.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> StoreResult<UserProfile> {
        let email = normalize_email(email);
        let stored = sqlx::query_as::<_, StoredCredential>(
            "SELECT id, password_hash FROM users WHERE email = ?1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(stored) = stored else {
            self.hasher.spawn_verify_dummy(password).await;
            warn!("login for unknown email");
            return Err(StoreError::InvalidCredentials);
        };

        let verified = self
            .hasher
            .spawn_verify(password, &stored.password_hash)
            .await
            .map_err(|e| {
                error!(user_id = stored.id, error = %e, "stored hash unusable");
                StoreError::Hashing(format!("{e:#}"))
            })?;
        if !verified {
            warn!(user_id = stored.id, "login with wrong password");
            return Err(StoreError::InvalidCredentials);
        }

        self.touch_last_login(stored.id).await?;
        info!(user_id = stored.id, "user logged in");
        self.find_by_id(stored.id).await
    }

    async fn touch_last_login(&self, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_login = ?1 WHERE id = ?2")
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn email_exists(&self, email: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)")
                .bind(normalize_email(email))
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn find_by_email(&self, email: &str) -> StoreResult<UserProfile> {
        sqlx::query_as::<_, UserProfile>(&format!("{SELECT_PROFILE} WHERE email = ?1"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_by_id(&self, id: i64) -> StoreResult<UserProfile> {
        sqlx::query_as::<_, UserProfile>(&format!("{SELECT_PROFILE} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::test_hasher;
    use crate::store::test_pool;

    async fn store() -> CredentialStore {
        CredentialStore::with_pool(test_pool().await, test_hasher(), MigrationFailurePolicy::Fail)
            .await
            .expect("store should open")
    }

    #[tokio::test]
    async fn end_to_end_register_and_login() {
        let store = store().await;

        let id = store.register("a@x.com", "secret1", "Alice").await.unwrap();
        assert_eq!(id, 1);

        let profile = store.authenticate("a@x.com", "secret1").await.unwrap();
        assert_eq!(profile.id, 1);
        assert_eq!(profile.full_name, "Alice");

        let err = store.authenticate("a@x.com", "wrong").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCredentials));

        assert!(store.email_exists("a@x.com").await.unwrap());
        assert!(!store.email_exists("b@x.com").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_and_original_kept() {
        let store = store().await;
        store.register("a@x.com", "secret1", "Alice").await.unwrap();
        let before = store.find_by_email("a@x.com").await.unwrap();

        let err = store.register("A@X.com ", "other-pass", "Mallory").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let after = store.find_by_email("a@x.com").await.unwrap();
        assert_eq!(before, after);
        assert!(store.authenticate("a@x.com", "secret1").await.is_ok());
        assert!(store.authenticate("a@x.com", "other-pass").await.is_err());
    }

    #[tokio::test]
    async fn unknown_email_looks_like_wrong_password() {
        let store = store().await;
        let err = store.authenticate("ghost@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCredentials));
    }

    #[tokio::test]
    async fn successful_login_advances_last_login() {
        let store = store().await;
        store.register("a@x.com", "secret1", "Alice").await.unwrap();

        let fresh = store.find_by_email("a@x.com").await.unwrap();
        assert!(fresh.last_login.is_none());

        let first = store.authenticate("a@x.com", "secret1").await.unwrap();
        let first_login = first.last_login.expect("last_login set");
        assert!(first_login >= first.created_at);

        let second = store.authenticate("a@x.com", "secret1").await.unwrap();
        let second_login = second.last_login.expect("last_login set");
        assert!(second_login >= first_login);
        assert_eq!(second.created_at, fresh.created_at);
    }

    #[tokio::test]
    async fn failed_login_leaves_last_login_alone() {
        let store = store().await;
        store.register("a@x.com", "secret1", "Alice").await.unwrap();
        let _ = store.authenticate("a@x.com", "nope").await;
        assert!(store.find_by_email("a@x.com").await.unwrap().last_login.is_none());
    }

    #[tokio::test]
    async fn ids_increase_and_lookup_by_id_matches_email() {
        let store = store().await;
        let a = store.register("a@x.com", "secret1", "Alice").await.unwrap();
        let b = store.register("b@x.com", "secret2", "Bob").await.unwrap();
        assert!(b > a);

        let by_id = store.find_by_id(b).await.unwrap();
        let by_email = store.find_by_email("b@x.com").await.unwrap();
        assert_eq!(by_id, by_email);
        assert!(matches!(store.find_by_id(999).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.find_by_email("nobody@x.com").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn password_is_stored_hashed() {
        let store = store().await;
        store.register("a@x.com", "secret1", "Alice").await.unwrap();
        let stored: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE email = 'a@x.com'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_ne!(stored, "secret1");
        assert!(stored.starts_with("$argon2id$"));
    }

    fn temp_db(tag: &str, max_connections: u32) -> (std::path::PathBuf, StoreOptions) {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "credstore-{tag}-{}-{}.sqlite",
            std::process::id(),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let options = StoreOptions {
            database_url: format!("sqlite:{}", path.display()),
            max_connections,
            busy_timeout: Duration::from_secs(10),
            on_migration_failure: MigrationFailurePolicy::Fail,
        };
        (path, options)
    }

    fn remove_db(path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        let (path, options) = temp_db("reopen", 2);

        {
            let store = CredentialStore::open(&options, test_hasher()).await.unwrap();
            store.register("a@x.com", "secret1", "Alice").await.unwrap();
            store.pool().close().await;
        }

        let store = CredentialStore::open(&options, test_hasher()).await.unwrap();
        assert!(store.authenticate("a@x.com", "secret1").await.is_ok());
        store.pool().close().await;
        remove_db(&path);
    }

    #[tokio::test]
    async fn rebuild_never_hands_out_an_old_id() {
        let store = store().await;
        let old_id = store.register("alice@x.com", "secret1", "Alice").await.unwrap();

        store.rebuild().await.unwrap();

        let new_id = store.register("mallory@x.com", "secret2", "Mallory").await.unwrap();
        assert!(new_id > old_id, "id {old_id} reused after rebuild");
        assert!(matches!(store.find_by_id(old_id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn raw_pool_rebuild_recovers_database_newer_than_build() {
        let (path, options) = temp_db("newer", 2);
        {
            let pool = connect(&options).await.unwrap();
            sqlx::query("PRAGMA user_version = 99")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let err = CredentialStore::open(&options, test_hasher()).await.err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedVersion { found: 99, .. }));

        let pool = connect(&options).await.unwrap();
        migrate::rebuild(&pool).await.unwrap();
        pool.close().await;

        let store = CredentialStore::open(&options, test_hasher()).await.unwrap();
        store.register("a@x.com", "secret1", "Alice").await.unwrap();
        store.pool().close().await;
        remove_db(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_email_registrations_admit_exactly_one() {
        let (path, options) = temp_db("race-same", 4);
        let store = CredentialStore::open(&options, test_hasher()).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.register("race@x.com", &format!("secret-{i}"), "Racer").await
                })
            })
            .collect();

        let (mut ok, mut dup, mut other) = (0, 0, Vec::new());
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::DuplicateEmail) => dup += 1,
                Err(e) => other.push(e.to_string()),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(dup, 7);
        assert!(other.is_empty(), "{other:?}");

        store.pool().close().await;
        remove_db(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_registrations_and_logins_all_succeed() {
        let (path, options) = temp_db("race-distinct", 4);
        let store = CredentialStore::open(&options, test_hasher()).await.unwrap();

        let registrations: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .register(&format!("user{i}@x.com"), &format!("secret-{i}"), "User")
                        .await
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in registrations {
            ids.push(task.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);

        let logins: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .authenticate(&format!("user{i}@x.com"), &format!("secret-{i}"))
                        .await
                })
            })
            .collect();
        for task in logins {
            let profile = task.await.unwrap().unwrap();
            assert!(profile.last_login.is_some());
        }

        store.pool().close().await;
        remove_db(&path);
    }
}
