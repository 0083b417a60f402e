//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! On first run against a database written by the old Python bot (a
//! `movies` table exists, no `_migrations` table), the legacy rows are
//! imported into the V1 schema instead of being left behind.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            role TEXT NOT NULL CHECK (role IN ('viewer', 'creator')),
            creator_handle TEXT,
            followers INTEGER CHECK (followers IS NULL OR followers >= 0),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        CREATE INDEX IF NOT EXISTS idx_users_creator_handle
            ON users(creator_handle COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS titles (
            title_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            owner_id INTEGER REFERENCES users(user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_titles_name ON titles(name COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_titles_owner ON titles(owner_id);

        CREATE TABLE IF NOT EXISTS ratings (
            rating_id INTEGER PRIMARY KEY AUTOINCREMENT,
            title_id INTEGER NOT NULL REFERENCES titles(title_id),
            user_id INTEGER NOT NULL REFERENCES users(user_id),
            score INTEGER CHECK (score IS NULL OR score BETWEEN 1 AND 10),
            review TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_ratings_title ON ratings(title_id);
        CREATE INDEX IF NOT EXISTS idx_ratings_user ON ratings(user_id);
    "#,
}];

/// Moves the old bot's `users` / `movies` / `ratings` tables aside, creates
/// the V1 schema, copies what still satisfies its constraints, and drops the
/// old tables.
const LEGACY_IMPORT_SQL: &str = r#"
    ALTER TABLE users RENAME TO legacy_users;
    ALTER TABLE movies RENAME TO legacy_movies;
    ALTER TABLE ratings RENAME TO legacy_ratings;
"#;

const LEGACY_COPY_SQL: &str = r#"
    INSERT OR IGNORE INTO users (user_id, username, role, creator_handle, followers)
        SELECT user_id,
               username,
               CASE lower(role) WHEN 'streamer' THEN 'creator' WHEN 'creator' THEN 'creator' ELSE 'viewer' END,
               CASE WHEN lower(role) IN ('streamer', 'creator') THEN twitch_username END,
               CASE WHEN lower(role) IN ('streamer', 'creator') THEN max(COALESCE(followers, 0), 0) END
        FROM legacy_users
        WHERE user_id IS NOT NULL AND role IS NOT NULL;

    INSERT INTO titles (title_id, name, owner_id)
        SELECT movie_id,
               title,
               CASE WHEN streamer_id IN (SELECT user_id FROM users) THEN streamer_id END
        FROM legacy_movies
        WHERE title IS NOT NULL;

    INSERT INTO ratings (title_id, user_id, score, review)
        SELECT movie_id,
               user_id,
               CASE WHEN score BETWEEN 1 AND 10 THEN score END,
               review
        FROM legacy_ratings
        WHERE movie_id IN (SELECT title_id FROM titles)
          AND user_id IN (SELECT user_id FROM users)
          AND (score BETWEEN 1 AND 10 OR review IS NOT NULL)
        ORDER BY rating_id;

    DROP TABLE legacy_ratings;
    DROP TABLE legacy_movies;
    DROP TABLE legacy_users;
"#;

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let mut current_version = get_current_version(conn).await?;

    if current_version == 0 && legacy_tables_exist(conn).await? {
        import_legacy(conn).await?;
        current_version = get_current_version(conn).await?;
    }

    // Apply pending migrations
    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Import a database written by the old bot and record V1 as applied.
async fn import_legacy(conn: &Connection) -> Result<(), DatabaseError> {
    let legacy_failed =
        |e: libsql::Error| DatabaseError::Migration(format!("Legacy import failed: {e}"));

    let tx = conn.transaction().await.map_err(legacy_failed)?;
    tx.execute_batch(LEGACY_IMPORT_SQL).await.map_err(legacy_failed)?;
    tx.execute_batch(MIGRATIONS[0].sql).await.map_err(legacy_failed)?;
    tx.execute_batch(LEGACY_COPY_SQL).await.map_err(legacy_failed)?;
    tx.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![MIGRATIONS[0].version, MIGRATIONS[0].name],
    )
    .await
    .map_err(legacy_failed)?;
    tx.commit().await.map_err(legacy_failed)?;

    tracing::info!("Legacy bot database detected — imported into V1 schema");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Check if the old bot's `movies` table exists.
async fn legacy_tables_exist(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='movies'",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count > 0)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
