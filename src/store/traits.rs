//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;

use crate::catalog::model::{NewUser, Rating, Score, Title, User, UserId};
use crate::error::DatabaseError;

/// Backend-agnostic database trait covering users, titles and ratings.
///
/// Every write commits or rolls back as a unit. Nothing here updates or
/// deletes rows.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Insert the user unless a row with the same id exists.
    ///
    /// Returns `true` if a row was written, `false` if the call was a no-op
    /// (first registration wins).
    async fn upsert_user(&self, user: &NewUser) -> Result<bool, DatabaseError>;

    /// Get a user by id.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError>;

    /// Find a creator by platform handle or display handle (case-insensitive).
    async fn find_creator_by_handle(&self, handle: &str) -> Result<Option<User>, DatabaseError>;

    /// All creators, highest follower count first.
    async fn list_creators(&self) -> Result<Vec<User>, DatabaseError>;

    // ── Titles ──────────────────────────────────────────────────────

    /// Add a title to the catalog.
    async fn insert_title(
        &self,
        name: &str,
        owner_id: Option<UserId>,
    ) -> Result<Title, DatabaseError>;

    /// Titles owned by a creator, in insertion order.
    async fn list_titles_by_owner(&self, owner_id: UserId) -> Result<Vec<Title>, DatabaseError>;

    /// Look up a title by its trimmed name (case-insensitive).
    async fn find_title_by_name(&self, name: &str) -> Result<Option<Title>, DatabaseError>;

    // ── Ratings ─────────────────────────────────────────────────────

    /// Append a rating and/or review for a title.
    async fn insert_rating(
        &self,
        title_id: i64,
        user_id: UserId,
        score: Option<Score>,
        review: Option<&str>,
    ) -> Result<Rating, DatabaseError>;

    /// Rating history of a title, oldest first.
    async fn ratings_for_title(&self, title_id: i64) -> Result<Vec<Rating>, DatabaseError>;
}
