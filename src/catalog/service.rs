//! CatalogService — registration, lookups and rating writes shared by the
//! chat flow and the companion API, so both enforce the same invariants.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DialogueConfig;
use crate::error::{FlowError, VerifyError};
use crate::store::Database;
use crate::verify::{FollowerVerifier, normalize_handle, verify_with_timeout};

use super::model::{CreatorProfile, NewUser, Rating, Role, Score, Title, User, UserId};

/// Longest title name accepted.
pub const MAX_TITLE_CHARS: usize = 200;
/// Longest review accepted.
pub const MAX_REVIEW_CHARS: usize = 4000;

/// Result of a registration attempt that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new row was written with this role.
    New(Role),
    /// The user was already registered; nothing changed.
    Existing(Role),
}

/// Why a creator handle was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatorRejection {
    /// The handle does not resolve, or the verification service failed.
    NotFound { handle: String },
    TooFewFollowers {
        handle: String,
        followers: u64,
        required: u64,
    },
}

/// Result of the creator branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatorOutcome {
    Registered {
        outcome: RegistrationOutcome,
        profile: CreatorProfile,
    },
    Rejected(CreatorRejection),
}

/// A creator together with the titles they own.
#[derive(Debug, Clone)]
pub struct CreatorListing {
    pub creator: User,
    pub titles: Vec<Title>,
}

pub struct CatalogService {
    db: Arc<dyn Database>,
    verifier: Arc<dyn FollowerVerifier>,
    config: DialogueConfig,
}

impl CatalogService {
    pub fn new(
        db: Arc<dyn Database>,
        verifier: Arc<dyn FollowerVerifier>,
        config: DialogueConfig,
    ) -> Self {
        Self {
            db,
            verifier,
            config,
        }
    }

    // ── Registration ────────────────────────────────────────────────

    pub async fn register_viewer(
        &self,
        id: UserId,
        username: Option<String>,
    ) -> Result<RegistrationOutcome, FlowError> {
        self.register(NewUser::viewer(id, username)).await
    }

    /// Verify `raw_handle` and register the user as a creator if eligible.
    ///
    /// Blank input is a `FlowError::Validation`. A handle Twitch could never
    /// issue is rejected as not found without asking the verifier, and
    /// verification failures of any kind come back as
    /// `CreatorRejection::NotFound` too.
    pub async fn register_creator(
        &self,
        id: UserId,
        username: Option<String>,
        raw_handle: &str,
    ) -> Result<CreatorOutcome, FlowError> {
        let raw_handle = raw_handle.trim();
        if raw_handle.is_empty() {
            return Err(FlowError::Validation("The handle can't be empty.".into()));
        }
        let handle = match normalize_handle(raw_handle) {
            Ok(handle) => handle,
            Err(reason) => {
                info!(user_id = id, handle = raw_handle, %reason, "Creator handle malformed");
                return Ok(CreatorOutcome::Rejected(CreatorRejection::NotFound {
                    handle: raw_handle.to_string(),
                }));
            }
        };

        let followers = match self.fetch_followers(&handle).await {
            Ok(followers) => followers,
            Err(FlowError::NotFound(_)) => {
                info!(user_id = id, %handle, "Creator handle not found");
                return Ok(CreatorOutcome::Rejected(CreatorRejection::NotFound { handle }));
            }
            Err(FlowError::ExternalService(e)) => {
                warn!(user_id = id, %handle, error = %e, "Follower verification failed");
                return Ok(CreatorOutcome::Rejected(CreatorRejection::NotFound { handle }));
            }
            Err(other) => return Err(other),
        };

        let required = self.config.min_followers;
        if followers < required {
            info!(user_id = id, %handle, followers, required, "Creator below follower threshold");
            return Ok(CreatorOutcome::Rejected(CreatorRejection::TooFewFollowers {
                handle,
                followers,
                required,
            }));
        }

        let profile = CreatorProfile { handle, followers };
        let outcome = self
            .register(NewUser::creator(id, username, profile.clone()))
            .await?;
        Ok(CreatorOutcome::Registered { outcome, profile })
    }

    async fn register(&self, user: NewUser) -> Result<RegistrationOutcome, FlowError> {
        if self.db.upsert_user(&user).await? {
            info!(user_id = user.id, role = %user.role, "User registered");
            return Ok(RegistrationOutcome::New(user.role));
        }
        let existing = self.db.get_user(user.id).await?.ok_or_else(|| {
            FlowError::Persistence(crate::error::DatabaseError::Query(format!(
                "user {} vanished after upsert",
                user.id
            )))
        })?;
        Ok(RegistrationOutcome::Existing(existing.role))
    }

    async fn fetch_followers(&self, handle: &str) -> Result<u64, FlowError> {
        match verify_with_timeout(self.verifier.as_ref(), handle, self.config.verify_timeout).await
        {
            Ok(followers) => Ok(followers),
            Err(VerifyError::NotFound { handle }) => {
                Err(FlowError::NotFound(format!("No channel named {handle}.")))
            }
            Err(e) => Err(FlowError::ExternalService(e)),
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────

    pub async fn list_creators(&self) -> Result<Vec<User>, FlowError> {
        Ok(self.db.list_creators().await?)
    }

    /// Find a creator by handle and list their titles.
    pub async fn creator_titles(&self, name: &str) -> Result<CreatorListing, FlowError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FlowError::Validation("Send the creator's name.".into()));
        }
        let creator = self
            .db
            .find_creator_by_handle(name)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("Creator \"{name}\" not found.")))?;
        let titles = self.db.list_titles_by_owner(creator.id).await?;
        Ok(CreatorListing { creator, titles })
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Score a title. The title must exist; nothing is written otherwise.
    pub async fn rate_title(
        &self,
        user_id: UserId,
        title_name: &str,
        score: Score,
    ) -> Result<(Title, Rating), FlowError> {
        let title = self.resolve(user_id, title_name).await?;
        let rating = self
            .db
            .insert_rating(title.id, user_id, Some(score), None)
            .await?;
        info!(user_id, title_id = title.id, score = score.value(), "Title rated");
        Ok((title, rating))
    }

    /// Review a title. The title must exist; nothing is written otherwise.
    pub async fn review_title(
        &self,
        user_id: UserId,
        title_name: &str,
        review: &str,
    ) -> Result<(Title, Rating), FlowError> {
        let review = validate_review(review)?;
        let title = self.resolve(user_id, title_name).await?;
        let rating = self
            .db
            .insert_rating(title.id, user_id, None, Some(review))
            .await?;
        info!(user_id, title_id = title.id, chars = review.chars().count(), "Title reviewed");
        Ok((title, rating))
    }

    /// Add a title owned by a creator.
    pub async fn add_title(&self, owner_id: UserId, name: &str) -> Result<Title, FlowError> {
        let name = validate_title(name)?;
        match self.db.get_user(owner_id).await? {
            Some(user) if user.role == Role::Creator => {}
            Some(_) => {
                return Err(FlowError::Forbidden(
                    "Only creators can add titles.".into(),
                ));
            }
            None => return Err(FlowError::NotFound("Register first.".into())),
        }
        Ok(self.db.insert_title(name, Some(owner_id)).await?)
    }

    /// Check the rater exists and look the title up by name.
    async fn resolve(&self, user_id: UserId, title_name: &str) -> Result<Title, FlowError> {
        let name = validate_title(title_name)?;
        if self.db.get_user(user_id).await?.is_none() {
            return Err(FlowError::NotFound("Register first.".into()));
        }
        self.db
            .find_title_by_name(name)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("Title \"{name}\" not found.")))
    }
}

/// Trimmed, non-empty, bounded title text.
pub fn validate_title(raw: &str) -> Result<&str, FlowError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(FlowError::Validation("The title can't be empty.".into()));
    }
    if name.chars().count() > MAX_TITLE_CHARS {
        return Err(FlowError::Validation(format!(
            "Titles are at most {MAX_TITLE_CHARS} characters."
        )));
    }
    Ok(name)
}

/// Trimmed, non-empty, bounded review text.
pub fn validate_review(raw: &str) -> Result<&str, FlowError> {
    let review = raw.trim();
    if review.is_empty() {
        return Err(FlowError::Validation("The review can't be empty.".into()));
    }
    if review.chars().count() > MAX_REVIEW_CHARS {
        return Err(FlowError::Validation(format!(
            "Reviews are at most {MAX_REVIEW_CHARS} characters."
        )));
    }
    Ok(review)
}

/// Parse a typed score.
pub fn parse_score(raw: &str) -> Result<Score, FlowError> {
    Score::parse(raw).ok_or_else(|| {
        FlowError::Validation(format!(
            "A score is a whole number from {} to {}.",
            Score::MIN,
            Score::MAX
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;

    use crate::store::LibSqlBackend;

    /// Verifier answering from a fixed table; `"flaky"` fails like a dead network.
    struct TableVerifier(HashMap<&'static str, u64>);

    #[async_trait]
    impl FollowerVerifier for TableVerifier {
        async fn verify(&self, handle: &str) -> Result<u64, VerifyError> {
            if handle == "flaky" {
                return Err(VerifyError::RequestFailed {
                    endpoint: "users".into(),
                    reason: "connection reset".into(),
                });
            }
            self.0
                .get(handle)
                .copied()
                .ok_or_else(|| VerifyError::NotFound {
                    handle: handle.to_string(),
                })
        }
    }

    async fn service() -> (CatalogService, Arc<dyn Database>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let verifier = Arc::new(TableVerifier(HashMap::from([
            ("popularstreamer", 500),
            ("smallstreamer", 42),
            ("exactly", 250),
            ("has space", 1000),
        ])));
        let svc = CatalogService::new(Arc::clone(&db), verifier, DialogueConfig::default());
        (svc, db)
    }

    #[tokio::test]
    async fn creator_at_threshold_is_eligible() {
        let (svc, db) = service().await;
        let outcome = svc.register_creator(1, None, "exactly").await.unwrap();
        assert!(matches!(
            outcome,
            CreatorOutcome::Registered {
                outcome: RegistrationOutcome::New(Role::Creator),
                ..
            }
        ));
        assert_eq!(db.get_user(1).await.unwrap().unwrap().role, Role::Creator);
    }

    #[tokio::test]
    async fn creator_below_threshold_is_rejected() {
        let (svc, db) = service().await;
        let outcome = svc
            .register_creator(2, Some("bob".into()), "smallstreamer")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CreatorOutcome::Rejected(CreatorRejection::TooFewFollowers {
                handle: "smallstreamer".into(),
                followers: 42,
                required: 250,
            })
        );
        assert!(db.get_user(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verification_failure_reads_as_not_found() {
        let (svc, db) = service().await;
        for handle in ["flaky", "nobody_here"] {
            let outcome = svc.register_creator(3, None, handle).await.unwrap();
            assert_eq!(
                outcome,
                CreatorOutcome::Rejected(CreatorRejection::NotFound {
                    handle: handle.into()
                })
            );
        }
        assert!(db.get_user(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_handle_is_validation_error() {
        let (svc, _) = service().await;
        for input in ["", "   "] {
            let err = svc.register_creator(4, None, input).await.unwrap_err();
            assert!(matches!(err, FlowError::Validation(_)), "input {input:?}");
        }
    }

    #[tokio::test]
    async fn impossible_handle_is_rejected_without_lookup() {
        let (svc, db) = service().await;
        // "has space" is in the verifier's table; a lookup would register it.
        for input in ["has space", "ab", "ünïcode"] {
            let outcome = svc.register_creator(4, None, input).await.unwrap();
            assert_eq!(
                outcome,
                CreatorOutcome::Rejected(CreatorRejection::NotFound {
                    handle: input.into()
                })
            );
        }
        assert!(db.get_user(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let (svc, db) = service().await;
        assert_eq!(
            svc.register_viewer(5, Some("carol".into())).await.unwrap(),
            RegistrationOutcome::New(Role::Viewer)
        );
        let outcome = svc
            .register_creator(5, Some("carol".into()), "popularstreamer")
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CreatorOutcome::Registered {
                outcome: RegistrationOutcome::Existing(Role::Viewer),
                ..
            }
        ));
        let user = db.get_user(5).await.unwrap().unwrap();
        assert_eq!(user.role, Role::Viewer);
        assert!(user.creator.is_none());
    }

    #[tokio::test]
    async fn rating_unknown_title_writes_nothing() {
        let (svc, db) = service().await;
        svc.register_viewer(6, None).await.unwrap();
        let known = db.insert_title("Inception", None).await.unwrap();

        let err = svc
            .rate_title(6, "Nonexistent Movie", Score::new(7).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
        let err = svc.review_title(6, "Nonexistent Movie", "meh").await.unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));

        assert!(db.ratings_for_title(known.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_user_cannot_rate() {
        let (svc, db) = service().await;
        db.insert_title("Inception", None).await.unwrap();
        let err = svc
            .rate_title(99, "Inception", Score::new(9).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
    }

    #[tokio::test]
    async fn only_creators_add_titles() {
        let (svc, _) = service().await;
        svc.register_viewer(7, None).await.unwrap();
        svc.register_creator(8, None, "popularstreamer").await.unwrap();

        assert!(matches!(
            svc.add_title(7, "Viewer Cut").await,
            Err(FlowError::Forbidden(_))
        ));
        let title = svc.add_title(8, "Director's Cut").await.unwrap();
        assert_eq!(title.owner_id, Some(8));

        let listing = svc.creator_titles("popularstreamer").await.unwrap();
        assert_eq!(listing.creator.id, 8);
        assert_eq!(listing.titles, vec![title]);
    }

    #[test]
    fn validators() {
        assert!(validate_title("   ").is_err());
        assert_eq!(validate_title("  Inception ").unwrap(), "Inception");
        assert!(validate_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
        assert!(validate_review("").is_err());
        assert!(parse_score("0").is_err());
        assert!(parse_score("ten").is_err());
        assert_eq!(parse_score("10").unwrap().value(), 10);
    }
}
