//! Users, titles and ratings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned user identifier (Telegram user id).
pub type UserId = i64;

/// A registered user's role. Unregistered users simply have no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Creator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Creator => "creator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            // "streamer" is what older rows and clients call creators.
            "creator" | "streamer" => Ok(Self::Creator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Creator-only attributes captured at verification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorProfile {
    /// Handle on the streaming platform.
    pub handle: String,
    /// Follower count when the handle was verified. Not kept live.
    pub followers: u64,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display handle on the messaging platform, if it has one.
    pub username: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<CreatorProfile>,
    pub created_at: DateTime<Utc>,
}

/// Row to insert on registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub id: UserId,
    pub username: Option<String>,
    pub role: Role,
    pub creator: Option<CreatorProfile>,
}

impl NewUser {
    pub fn viewer(id: UserId, username: Option<String>) -> Self {
        Self {
            id,
            username,
            role: Role::Viewer,
            creator: None,
        }
    }

    pub fn creator(id: UserId, username: Option<String>, profile: CreatorProfile) -> Self {
        Self {
            id,
            username,
            role: Role::Creator,
            creator: Some(profile),
        }
    }
}

/// A rateable title (film, show, stream VOD...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    pub id: i64,
    pub name: String,
    /// Owning creator; `None` for the global catalog.
    pub owner_id: Option<UserId>,
}

/// One append-only rating/review record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub id: i64,
    pub title_id: i64,
    pub user_id: UserId,
    pub score: Option<Score>,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A score in the inclusive range 1–10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: i64) -> Option<Self> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    /// Parse user-typed text such as `" 9 "`.
    pub fn parse(input: &str) -> Option<Self> {
        input.trim().parse::<i64>().ok().and_then(Self::new)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Score {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| {
            format!("score must be between {} and {}", Self::MIN, Self::MAX)
        })
    }
}

impl From<Score> for i64 {
    fn from(score: Score) -> Self {
        i64::from(score.0)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds() {
        assert!(Score::new(0).is_none());
        assert_eq!(Score::new(1).unwrap().value(), 1);
        assert_eq!(Score::new(10).unwrap().value(), 10);
        assert!(Score::new(11).is_none());
        assert!(Score::new(-3).is_none());
    }

    #[test]
    fn score_parse_user_text() {
        assert_eq!(Score::parse(" 9 ").unwrap().value(), 9);
        assert!(Score::parse("nine").is_none());
        assert!(Score::parse("7.5").is_none());
        assert!(Score::parse("").is_none());
        assert!(Score::parse("100").is_none());
    }

    #[test]
    fn score_serde_rejects_out_of_range() {
        let ok: Score = serde_json::from_str("8").unwrap();
        assert_eq!(ok.value(), 8);
        assert!(serde_json::from_str::<Score>("11").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "8");
    }

    #[test]
    fn role_parse_accepts_legacy_streamer() {
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert_eq!("Creator".parse::<Role>().unwrap(), Role::Creator);
        assert_eq!("streamer".parse::<Role>().unwrap(), Role::Creator);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn role_display_matches_serde() {
        for role in [Role::Viewer, Role::Creator] {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(format!("\"{role}\""), json);
        }
    }
}
