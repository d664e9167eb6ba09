//! Schema migrations
//!
//! Migration scripts are compiled into the crate and applied in name order.
//! Each script runs in its own transaction together with the insert into the
//! `schema_migrations` ledger, so a failed script leaves no trace and a
//! completed one is never applied twice.

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection, PgPool};
use std::collections::HashSet;

/// An embedded `*.up.sql` script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    name: "0001_create_files.up.sql",
    sql: include_str!("../../migrations/0001_create_files.up.sql"),
}];

/// All embedded migrations, sorted by name.
pub fn migrations() -> Vec<Migration> {
    let mut all: Vec<Migration> = MIGRATIONS
        .iter()
        .copied()
        .filter(|m| m.name.ends_with(".up.sql"))
        .collect();
    all.sort_by_key(|m| m.name);
    all
}

fn pending(applied: &HashSet<String>) -> Vec<Migration> {
    migrations()
        .into_iter()
        .filter(|m| !applied.contains(m.name))
        .collect()
}

/// Session-level advisory lock serializing concurrent migration runs.
const MIGRATION_LOCK_ID: i64 = 0x6472_6f70_6c69_7465;

/// Apply every embedded migration not yet recorded in `schema_migrations`.
///
/// Concurrent callers (several processes starting at once) are serialized
/// with a Postgres advisory lock. Returns the names of the scripts applied
/// by this call.
pub async fn run_migrations(pool: &PgPool) -> Result<Vec<String>> {
    let mut conn = pool
        .acquire()
        .await
        .context("Failed to acquire connection for migrations")?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await
        .context("Failed to take migration lock")?;

    let result = apply_pending(&mut conn).await;

    if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await
    {
        tracing::warn!(error = %e, "Failed to release migration lock");
    }

    result
}

async fn apply_pending(conn: &mut PgConnection) -> Result<Vec<String>> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to ensure schema_migrations table")?;

    let applied: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT name FROM schema_migrations")
        .fetch_all(&mut *conn)
        .await
        .context("Failed to read schema_migrations")?
        .into_iter()
        .collect();

    let mut newly_applied = Vec::new();
    for migration in pending(&applied) {
        let start = std::time::Instant::now();
        let mut tx = conn
            .begin()
            .await
            .context("Failed to begin migration transaction")?;

        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to apply migration {}", migration.name))?;

        sqlx::query("INSERT INTO schema_migrations (name) VALUES ($1)")
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to record migration {}", migration.name))?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit migration {}", migration.name))?;

        tracing::info!(
            migration = migration.name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Applied migration"
        );
        newly_applied.push(migration.name.to_string());
    }

    if newly_applied.is_empty() {
        tracing::debug!("Database schema is up to date");
    }

    Ok(newly_applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_sorted_up_scripts() {
        let all = migrations();
        assert!(!all.is_empty());
        assert!(all.windows(2).all(|w| w[0].name < w[1].name));
        assert!(all.iter().all(|m| m.name.ends_with(".up.sql")));
    }

    #[test]
    fn initial_migration_creates_files_table() {
        let first = migrations()[0];
        assert!(first.sql.contains("CREATE TABLE IF NOT EXISTS files"));
        assert!(first.sql.contains("metadata"));
    }

    #[test]
    fn applied_migrations_are_skipped() {
        let everything = migrations();
        assert_eq!(pending(&HashSet::new()).len(), everything.len());

        let applied: HashSet<String> = everything.iter().map(|m| m.name.to_string()).collect();
        assert!(pending(&applied).is_empty());
    }
}
