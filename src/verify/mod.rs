//! Follower verification — decides creator eligibility.
//!
//! The dialogue only sees [`FollowerVerifier::verify`]: a handle goes in, a
//! follower count (or an error) comes out. How the count is obtained
//! (credential exchange, user lookup, follower query) stays behind the trait.

pub mod twitch;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::VerifyError;

pub use twitch::TwitchVerifier;

/// Twitch logins: 3–25 characters of ASCII letters, digits and underscores.
static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,25}$").expect("handle regex is valid"));

/// Source of follower counts for creator handles.
#[async_trait]
pub trait FollowerVerifier: Send + Sync {
    /// Current follower count for `handle`.
    ///
    /// Returns `VerifyError::NotFound` when the handle does not resolve.
    async fn verify(&self, handle: &str) -> Result<u64, VerifyError>;
}

/// Run `verify` but give up after `timeout`.
pub async fn verify_with_timeout(
    verifier: &dyn FollowerVerifier,
    handle: &str,
    timeout: Duration,
) -> Result<u64, VerifyError> {
    match tokio::time::timeout(timeout, verifier.verify(handle)).await {
        Ok(result) => result,
        Err(_) => Err(VerifyError::Timeout { timeout }),
    }
}

/// Normalize what a user typed as their handle.
///
/// Accepts `name`, `@name` and channel URLs like `https://twitch.tv/name`.
/// Returns the bare login or a message explaining what is wrong with it.
pub fn normalize_handle(input: &str) -> Result<String, String> {
    let mut handle = input.trim();
    for prefix in ["https://", "http://", "www.", "twitch.tv/"] {
        if let Some(rest) = handle.strip_prefix(prefix) {
            handle = rest;
        }
    }
    let handle = handle.trim_start_matches('@').trim_end_matches('/');

    if handle.is_empty() {
        return Err("The handle can't be empty.".to_string());
    }
    if !HANDLE_RE.is_match(handle) {
        return Err(
            "A handle is 3–25 characters: letters, digits and underscores only.".to_string(),
        );
    }
    Ok(handle.to_string())
}
