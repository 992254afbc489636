//! Schema lifecycle: `Absent (0) -> V1 -> V2`, forward only.
//!
//! Every pending step runs inside a single transaction together with the
//! `user_version` bump, so a failed step leaves the database exactly as it
//! was. What happens next is decided by [`MigrationFailurePolicy`].

use std::str::FromStr;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::store::error::{StoreError, StoreResult};
use crate::store::schema::{
    BACKFILL_CREATED_AT_V2, CREATE_USERS_V1, DROP_USERS, MIGRATE_V2, RESTORE_USERS_SEQ,
    SCHEMA_VERSION, SELECT_USERS_MAX_ROWID, SELECT_USERS_SEQ, TABLE_EXISTS,
};

/// Last version [`apply_step`] knows how to produce.
const LAST_STEP: i64 = 2;
const _: () = assert!(LAST_STEP == SCHEMA_VERSION, "every schema version needs a migration step");

/// Reaction to a migration step that cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationFailurePolicy {
    /// Roll back and report [`StoreError::Migration`]; data is left untouched.
    #[default]
    Fail,
    /// Drop the table and recreate it at the current version. Loses all users.
    Rebuild,
}

impl FromStr for MigrationFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "rebuild" => Ok(Self::Rebuild),
            other => anyhow::bail!("unknown migration failure policy: {other}"),
        }
    }
}

pub async fn current_version(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("PRAGMA user_version")
        .fetch_one(conn)
        .await
}

async fn set_version(conn: &mut SqliteConnection, version: i64) -> Result<(), sqlx::Error> {
    // PRAGMA does not accept bound parameters.
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(conn)
        .await?;
    Ok(())
}

async fn apply_step(tx: &mut Transaction<'_, Sqlite>, version: i64) -> Result<(), sqlx::Error> {
    match version {
        1 => {
            sqlx::query(CREATE_USERS_V1).execute(&mut **tx).await?;
        }
        2 => {
            for stmt in MIGRATE_V2 {
                sqlx::query(stmt).execute(&mut **tx).await?;
            }
            sqlx::query(BACKFILL_CREATED_AT_V2)
                .bind(OffsetDateTime::now_utc())
                .execute(&mut **tx)
                .await?;
        }
        other => {
            return Err(sqlx::Error::Configuration(
                format!("no migration step for schema version {other}").into(),
            ))
        }
    }
    Ok(())
}

async fn apply_from(tx: &mut Transaction<'_, Sqlite>, from: i64) -> Result<(), sqlx::Error> {
    for version in (from + 1)..=SCHEMA_VERSION {
        apply_step(tx, version).await?;
        info!(version, "schema step applied");
    }
    set_version(&mut **tx, SCHEMA_VERSION).await
}

/// Brings the schema up to [`SCHEMA_VERSION`]. Returns the version found on disk.
pub async fn run(pool: &SqlitePool, policy: MigrationFailurePolicy) -> StoreResult<i64> {
    let mut tx = pool.begin().await?;
    let found = current_version(&mut *tx).await?;

    if found > SCHEMA_VERSION {
        error!(found, supported = SCHEMA_VERSION, "database schema is newer than this build");
        return Err(StoreError::UnsupportedVersion {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(found);
    }

    match apply_from(&mut tx, found).await {
        Ok(()) => {
            tx.commit().await?;
            info!(from = found, to = SCHEMA_VERSION, "schema migrated");
            Ok(found)
        }
        Err(source) => {
            if let Err(e) = tx.rollback().await {
                error!(error = %e, "rollback after failed migration also failed");
            }
            error!(from = found, to = SCHEMA_VERSION, error = %source, "schema migration failed");
            match policy {
                MigrationFailurePolicy::Fail => Err(StoreError::Migration {
                    from: found,
                    to: SCHEMA_VERSION,
                    source,
                }),
                MigrationFailurePolicy::Rebuild => {
                    warn!("rebuilding users table after failed migration; existing users are lost");
                    rebuild(pool).await?;
                    Ok(found)
                }
            }
        }
    }
}

async fn table_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(TABLE_EXISTS)
        .bind(name)
        .fetch_one(conn)
        .await
}

/// Highest id ever assigned, so a rebuilt table never hands it out again.
async fn id_high_water(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let mut high = 0;
    if table_exists(conn, "sqlite_sequence").await? {
        let seq = sqlx::query_scalar::<_, i64>(SELECT_USERS_SEQ)
            .fetch_optional(&mut *conn)
            .await?;
        high = high.max(seq.unwrap_or(0));
    }
    if table_exists(conn, "users").await? {
        let max_rowid = sqlx::query_scalar::<_, Option<i64>>(SELECT_USERS_MAX_ROWID)
            .fetch_one(&mut *conn)
            .await?;
        high = high.max(max_rowid.unwrap_or(0));
    }
    Ok(high)
}

async fn restore_id_high_water(conn: &mut SqliteConnection, high: i64) -> Result<(), sqlx::Error> {
    if high == 0 {
        return Ok(());
    }
    sqlx::query(RESTORE_USERS_SEQ[0]).execute(&mut *conn).await?;
    sqlx::query(RESTORE_USERS_SEQ[1])
        .bind(high)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Drops the `users` table and recreates it at [`SCHEMA_VERSION`].
///
/// Works whatever version is on disk. The AUTOINCREMENT counter is carried
/// over, so ids issued before the rebuild are never reassigned.
pub async fn rebuild(pool: &SqlitePool) -> StoreResult<()> {
    let mut tx = pool.begin().await?;
    let result = async {
        let high = id_high_water(&mut *tx).await?;
        for stmt in DROP_USERS {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        apply_from(&mut tx, 0).await?;
        restore_id_high_water(&mut *tx, high).await?;
        Ok::<i64, sqlx::Error>(high)
    }
    .await;

    match result {
        Ok(high) => {
            tx.commit().await?;
            warn!(version = SCHEMA_VERSION, next_id_after = high, "users table rebuilt");
            Ok(())
        }
        Err(source) => {
            if let Err(e) = tx.rollback().await {
                error!(error = %e, "rollback after failed rebuild also failed");
            }
            Err(StoreError::Migration {
                from: 0,
                to: SCHEMA_VERSION,
                source,
            })
        }
    }
}
