//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Followers a creator needs before the role is granted.
pub const DEFAULT_MIN_FOLLOWERS: u64 = 250;

/// Twitch application credentials and endpoints.
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    /// OAuth client-credentials endpoint.
    pub auth_url: String,
    /// Helix API base, without a trailing slash.
    pub api_base: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl TwitchConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            auth_url: "https://id.twitch.tv/oauth2/token".to_string(),
            api_base: "https://api.twitch.tv/helix".to_string(),
            request_timeout: Duration::from_secs(8),
        }
    }
}

/// Telegram gateway settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids; `*` allows everyone.
    pub allowed_users: Vec<String>,
}

/// Tunables of the conversation flow.
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Eligibility threshold for the creator role.
    pub min_followers: u64,
    /// Upper bound on one verification call.
    pub verify_timeout: Duration,
    /// Idle lanes are shut down (and their state dropped) after this long.
    pub session_idle_timeout: Duration,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            min_followers: DEFAULT_MIN_FOLLOWERS,
            verify_timeout: Duration::from_secs(10),
            session_idle_timeout: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// Service configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram: Option<TelegramConfig>,
    pub twitch: TwitchConfig,
    pub db_path: PathBuf,
    pub http_port: u16,
    pub cli_enabled: bool,
    pub dialogue: DialogueConfig,
}

impl AppConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = required("TWITCH_CLIENT_ID")?;
        let client_secret = required("TWITCH_CLIENT_SECRET")?;

        let mut twitch = TwitchConfig::new(client_id, client_secret);
        if let Ok(url) = std::env::var("TWITCH_AUTH_URL") {
            twitch.auth_url = url;
        }
        if let Ok(base) = std::env::var("TWITCH_API_BASE") {
            twitch.api_base = base.trim_end_matches('/').to_string();
        }

        let telegram = std::env::var("TELEGRAM_BOT_TOKEN").ok().map(|token| {
            let allowed_users = parse_list(
                &std::env::var("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|_| "*".to_string()),
            );
            TelegramConfig {
                bot_token: SecretString::from(token),
                allowed_users,
            }
        });

        let db_path = std::env::var("STREAMER_RATINGS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/streamer-ratings.db"));

        let http_port = parsed("STREAMER_RATINGS_HTTP_PORT", 8080u16)?;

        let defaults = DialogueConfig::default();
        let dialogue = DialogueConfig {
            min_followers: parsed("STREAMER_RATINGS_MIN_FOLLOWERS", defaults.min_followers)?,
            verify_timeout: Duration::from_secs(parsed(
                "STREAMER_RATINGS_VERIFY_TIMEOUT_SECS",
                defaults.verify_timeout.as_secs(),
            )?),
            session_idle_timeout: Duration::from_secs(parsed(
                "STREAMER_RATINGS_SESSION_IDLE_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
        };

        let cli_enabled = std::env::var("STREAMER_RATINGS_CLI")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            telegram,
            twitch,
            db_path,
            http_port,
            cli_enabled,
            dialogue,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional variable, falling back to `default` when it is unset.
fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping empty entries.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
