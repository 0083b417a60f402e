//! libSQL backend — async `Database` trait implementation.
//!
//! File-backed databases hand out a fresh connection per operation so
//! concurrent users never share transaction state. In-memory databases are
//! private to one connection, so that connection is shared instead. Writes
//! are serialized through an async lock and each runs in its own
//! transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::catalog::model::{CreatorProfile, NewUser, Rating, Role, Score, Title, User, UserId};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;

/// Where connections come from.
enum ConnectionSource {
    /// One connection reused for everything (in-memory databases).
    Shared(Connection),
    /// A new connection per operation (file databases).
    PerOperation,
}

/// libSQL database backend.
pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
    source: ConnectionSource,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            source: ConnectionSource::PerOperation,
            write_lock: Mutex::new(()),
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        enable_foreign_keys(&conn).await?;

        let backend = Self {
            db: Arc::new(db),
            source: ConnectionSource::Shared(conn),
            write_lock: Mutex::new(()),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get a connection for one operation.
    async fn conn(&self) -> Result<Connection, DatabaseError> {
        match &self.source {
            ConnectionSource::Shared(conn) => Ok(conn.clone()),
            ConnectionSource::PerOperation => {
                let conn = self
                    .db
                    .connect()
                    .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
                enable_foreign_keys(&conn).await?;
                Ok(conn)
            }
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

async fn enable_foreign_keys(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute("PRAGMA foreign_keys = ON", ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;
    Ok(())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output (column defaults, imported rows)
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a write failure, telling constraint violations apart from the rest.
fn write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Map a libsql Row to a User.
///
/// Column order matches USER_COLUMNS:
/// 0:user_id, 1:username, 2:role, 3:creator_handle, 4:followers, 5:created_at
fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("user row parse: {e}")))?;
    let username: Option<String> = row.get::<String>(1).ok();
    let role_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("user row parse: {e}")))?;
    let handle: Option<String> = row.get::<String>(3).ok();
    let followers: Option<i64> = row.get::<i64>(4).ok();
    let created_str: String = row.get::<String>(5).unwrap_or_default();

    let role: Role = role_str.parse().map_err(DatabaseError::Query)?;
    let creator = match (role, handle) {
        (Role::Creator, Some(handle)) => Some(CreatorProfile {
            handle,
            followers: followers.unwrap_or(0).max(0) as u64,
        }),
        _ => None,
    };

    Ok(User {
        id,
        username,
        role,
        creator,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: 0:title_id, 1:name, 2:owner_id
fn row_to_title(row: &libsql::Row) -> Result<Title, DatabaseError> {
    Ok(Title {
        id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("title row parse: {e}")))?,
        name: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("title row parse: {e}")))?,
        owner_id: row.get::<i64>(2).ok(),
    })
}

/// Column order matches RATING_COLUMNS:
/// 0:rating_id, 1:title_id, 2:user_id, 3:score, 4:review, 5:created_at
fn row_to_rating(row: &libsql::Row) -> Result<Rating, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("rating row parse: {e}"));
    let created_str: String = row.get::<String>(5).unwrap_or_default();
    Ok(Rating {
        id: row.get(0).map_err(parse)?,
        title_id: row.get(1).map_err(parse)?,
        user_id: row.get(2).map_err(parse)?,
        score: row.get::<i64>(3).ok().and_then(Score::new),
        review: row.get::<String>(4).ok(),
        created_at: parse_datetime(&created_str),
    })
}

async fn collect<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        out.push(map(&row)?);
    }
    Ok(out)
}

// ── Trait implementation ────────────────────────────────────────────

const USER_COLUMNS: &str = "user_id, username, role, creator_handle, followers, created_at";

const TITLE_COLUMNS: &str = "title_id, name, owner_id";

const RATING_COLUMNS: &str = "rating_id, title_id, user_id, score, review, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        migrations::run_migrations(&conn).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn upsert_user(&self, user: &NewUser) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn().await?;
        let now = Utc::now().to_rfc3339();

        let (handle, followers) = match &user.creator {
            Some(profile) => {
                let followers = i64::try_from(profile.followers).map_err(|_| {
                    DatabaseError::Constraint(format!(
                        "follower count {} out of range",
                        profile.followers
                    ))
                })?;
                (Some(profile.handle.as_str()), Some(followers))
            }
            None => (None, None),
        };

        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user begin: {e}")))?;
        let changed = tx
            .execute(
                "INSERT OR IGNORE INTO users (user_id, username, role, creator_handle, followers, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    opt_text(user.username.as_deref()),
                    user.role.as_str(),
                    opt_text(handle),
                    opt_int(followers),
                    now,
                ],
            )
            .await
            .map_err(|e| write_error("upsert_user", e))?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user commit: {e}")))?;

        let inserted = changed > 0;
        debug!(user_id = user.id, role = %user.role, inserted, "User upserted");
        Ok(inserted)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn find_creator_by_handle(&self, handle: &str) -> Result<Option<User>, DatabaseError> {
        let handle = handle.trim().trim_start_matches('@');
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE role = 'creator'
                       AND (creator_handle = ?1 COLLATE NOCASE OR username = ?1 COLLATE NOCASE)
                     ORDER BY (creator_handle = ?1 COLLATE NOCASE) DESC, user_id ASC
                     LIMIT 1"
                ),
                params![handle],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_creator_by_handle: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_creator_by_handle: {e}"))),
        }
    }

    async fn list_creators(&self) -> Result<Vec<User>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE role = 'creator'
                     ORDER BY followers DESC, user_id ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_creators: {e}")))?;
        collect(rows, "list_creators", row_to_user).await
    }

    // ── Titles ──────────────────────────────────────────────────────

    async fn insert_title(
        &self,
        name: &str,
        owner_id: Option<UserId>,
    ) -> Result<Title, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn().await?;
        let name = name.trim();

        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_title begin: {e}")))?;
        tx.execute(
            "INSERT INTO titles (name, owner_id) VALUES (?1, ?2)",
            params![name, opt_int(owner_id)],
        )
        .await
        .map_err(|e| write_error("insert_title", e))?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_title commit: {e}")))?;

        debug!(title_id = id, name, "Title inserted");
        Ok(Title {
            id,
            name: name.to_string(),
            owner_id,
        })
    }

    async fn list_titles_by_owner(&self, owner_id: UserId) -> Result<Vec<Title>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {TITLE_COLUMNS} FROM titles WHERE owner_id = ?1 ORDER BY title_id"),
                params![owner_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_titles_by_owner: {e}")))?;
        collect(rows, "list_titles_by_owner", row_to_title).await
    }

    async fn find_title_by_name(&self, name: &str) -> Result<Option<Title>, DatabaseError> {
        let conn = self.conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TITLE_COLUMNS} FROM titles WHERE name = ?1 COLLATE NOCASE
                     ORDER BY title_id LIMIT 1"
                ),
                params![name.trim()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_title_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_title(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_title_by_name: {e}"))),
        }
    }

    // ── Ratings ─────────────────────────────────────────────────────

    async fn insert_rating(
        &self,
        title_id: i64,
        user_id: UserId,
        score: Option<Score>,
        review: Option<&str>,
    ) -> Result<Rating, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn().await?;
        let now = Utc::now();

        let tx = conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rating begin: {e}")))?;
        tx.execute(
            "INSERT INTO ratings (title_id, user_id, score, review, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                title_id,
                user_id,
                opt_int(score.map(i64::from)),
                opt_text(review),
                now.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| write_error("insert_rating", e))?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rating commit: {e}")))?;

        debug!(rating_id = id, title_id, user_id, "Rating inserted");
        Ok(Rating {
            id,
            title_id,
            user_id,
            score,
            review: review.map(String::from),
            created_at: now,
        })
    }

    async fn ratings_for_title(&self, title_id: i64) -> Result<Vec<Rating>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {RATING_COLUMNS} FROM ratings WHERE title_id = ?1 ORDER BY rating_id"
                ),
                params![title_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("ratings_for_title: {e}")))?;
        collect(rows, "ratings_for_title", row_to_rating).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn creator(id: UserId, name: &str, handle: &str, followers: u64) -> NewUser {
        NewUser::creator(
            id,
            Some(name.to_string()),
            CreatorProfile {
                handle: handle.to_string(),
                followers,
            },
        )
    }

    // ── User tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn upsert_inserts_then_ignores() {
        let db = test_db().await;

        let first = db
            .upsert_user(&NewUser::viewer(1, Some("carol".into())))
            .await
            .unwrap();
        assert!(first);

        // Second registration with a different role is a no-op
        let second = db
            .upsert_user(&creator(1, "carol", "carolstreams", 9000))
            .await
            .unwrap();
        assert!(!second);

        let user = db.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Viewer);
        assert!(user.creator.is_none());
        assert_eq!(user.username.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn oversized_follower_count_is_refused() {
        let db = test_db().await;
        let err = db
            .upsert_user(&creator(2, "whale", "whale", u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
        assert!(db.get_user(2).await.unwrap().is_none());

        let max = i64::MAX as u64;
        assert!(db.upsert_user(&creator(3, "big", "big", max)).await.unwrap());
        let stored = db.get_user(3).await.unwrap().unwrap().creator.unwrap();
        assert_eq!(stored.followers, max);
    }

    #[tokio::test]
    async fn get_user_not_found() {
        let db = test_db().await;
        assert!(db.get_user(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_creator_by_either_handle() {
        let db = test_db().await;
        db.upsert_user(&creator(10, "alice", "PopularStreamer", 500))
            .await
            .unwrap();
        db.upsert_user(&NewUser::viewer(11, Some("bob".into())))
            .await
            .unwrap();

        let by_platform = db.find_creator_by_handle("popularstreamer").await.unwrap();
        assert_eq!(by_platform.unwrap().id, 10);

        let by_display = db.find_creator_by_handle("@Alice").await.unwrap().unwrap();
        let profile = by_display.creator.unwrap();
        assert_eq!(profile.handle, "PopularStreamer");
        assert_eq!(profile.followers, 500);

        // Viewers are never returned
        assert!(db.find_creator_by_handle("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_creators_sorted_by_followers() {
        let db = test_db().await;
        db.upsert_user(&creator(1, "small", "small", 300)).await.unwrap();
        db.upsert_user(&creator(2, "big", "big", 5000)).await.unwrap();
        db.upsert_user(&NewUser::viewer(3, None)).await.unwrap();

        let creators = db.list_creators().await.unwrap();
        let ids: Vec<UserId> = creators.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    // ── Title tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn titles_by_owner_and_name() {
        let db = test_db().await;
        db.upsert_user(&creator(10, "alice", "alice_tv", 500)).await.unwrap();

        let a = db.insert_title("Inception", Some(10)).await.unwrap();
        let b = db.insert_title("  Tenet ", Some(10)).await.unwrap();
        db.insert_title("Global Classic", None).await.unwrap();

        assert_eq!(b.name, "Tenet");
        let owned = db.list_titles_by_owner(10).await.unwrap();
        assert_eq!(owned, vec![a.clone(), b]);

        let found = db.find_title_by_name(" inception ").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert!(db.find_title_by_name("Nonexistent Movie").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn title_owner_must_exist() {
        let db = test_db().await;
        let err = db.insert_title("Orphan", Some(999)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    // ── Rating tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn ratings_append_only_history() {
        let db = test_db().await;
        db.upsert_user(&NewUser::viewer(1, Some("carol".into()))).await.unwrap();
        let title = db.insert_title("Inception", None).await.unwrap();

        let scored = db
            .insert_rating(title.id, 1, Score::new(9), None)
            .await
            .unwrap();
        assert_eq!(scored.score.unwrap().value(), 9);
        assert!(scored.review.is_none());

        db.insert_rating(title.id, 1, None, Some("Dreams within dreams"))
            .await
            .unwrap();

        let history = db.ratings_for_title(title.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].score, Score::new(9));
        assert_eq!(history[1].review.as_deref(), Some("Dreams within dreams"));
        assert!(history[1].score.is_none());
    }

    #[tokio::test]
    async fn rating_requires_existing_title_and_user() {
        let db = test_db().await;
        db.upsert_user(&NewUser::viewer(1, None)).await.unwrap();
        let title = db.insert_title("Inception", None).await.unwrap();

        let unknown_title = db.insert_rating(12345, 1, Score::new(5), None).await;
        assert!(matches!(unknown_title, Err(DatabaseError::Constraint(_))));

        let unknown_user = db.insert_rating(title.id, 77, Score::new(5), None).await;
        assert!(matches!(unknown_user, Err(DatabaseError::Constraint(_))));

        assert!(db.ratings_for_title(title.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backed_database_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("ratings.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.upsert_user(&NewUser::viewer(1, Some("carol".into()))).await.unwrap();
            db.insert_title("Inception", None).await.unwrap();
        }

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(reopened.get_user(1).await.unwrap().unwrap().role, Role::Viewer);
        assert!(reopened.find_title_by_name("Inception").await.unwrap().is_some());
    }
}
