//! Configuration for keeponline
//!
//! All settings come from the process environment (optionally seeded from a
//! `.env` file). [`Config::from_lookup`] takes any key lookup so the loader
//! can be exercised without touching the real environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{KeepOnlineError, Result};

pub const ENV_API_ID: &str = "TELEGRAM_API_ID";
pub const ENV_API_HASH: &str = "TELEGRAM_API_HASH";
pub const ENV_STRING_SESSION: &str = "TELEGRAM_STRING_SESSION";
pub const ENV_SESSION_NAME: &str = "TELEGRAM_SESSION_NAME";
pub const ENV_UPDATE_INTERVAL: &str = "TELEGRAM_UPDATE_INTERVAL_MINUTES";

/// Session file name used when neither a token nor a name is configured.
pub const DEFAULT_SESSION_NAME: &str = "my_account_online";

/// Heartbeat interval used when the configured value is missing or invalid.
pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 5;

const SESSION_FILE_EXTENSION: &str = "session";

/// Where the runner takes its session from.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionSource {
    /// Portable token produced by `keeponline login`.
    Token(String),
    /// Local session file, created on first login.
    File(PathBuf),
}

impl SessionSource {
    pub fn is_token(&self) -> bool {
        matches!(self, SessionSource::Token(_))
    }
}

// Tokens are credentials; keep them out of debug output.
impl fmt::Debug for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSource::Token(_) => f.write_str("Token(<redacted>)"),
            SessionSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Why a configured interval was replaced by the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalWarning {
    NotAnInteger(String),
    NotPositive(i64),
}

impl fmt::Display for IntervalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalWarning::NotAnInteger(raw) => write!(
                f,
                "{} is not a valid integer ({:?}). Using default: {} minutes.",
                ENV_UPDATE_INTERVAL, raw, DEFAULT_UPDATE_INTERVAL_MINUTES
            ),
            IntervalWarning::NotPositive(value) => write!(
                f,
                "{} must be a positive integer (got {}). Using default: {} minutes.",
                ENV_UPDATE_INTERVAL, value, DEFAULT_UPDATE_INTERVAL_MINUTES
            ),
        }
    }
}

/// Resolve the heartbeat interval in minutes.
///
/// Unset means the default with no warning. Anything that is not a positive
/// integer falls back to the default and reports why.
pub fn parse_interval_minutes(raw: Option<&str>) -> (u64, Option<IntervalWarning>) {
    let Some(raw) = raw else {
        return (DEFAULT_UPDATE_INTERVAL_MINUTES, None);
    };

    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => (value as u64, None),
        Ok(value) => (
            DEFAULT_UPDATE_INTERVAL_MINUTES,
            Some(IntervalWarning::NotPositive(value)),
        ),
        Err(_) => (
            DEFAULT_UPDATE_INTERVAL_MINUTES,
            Some(IntervalWarning::NotAnInteger(raw.to_string())),
        ),
    }
}

/// Turn a session name into the file the client library reads and writes.
pub fn session_file_path(name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(SESSION_FILE_EXTENSION)
    }
}

/// Process-wide settings, built once at startup.
#[derive(Clone)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub session: SessionSource,
    pub update_interval_minutes: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("session", &self.session)
            .field("update_interval_minutes", &self.update_interval_minutes)
            .finish()
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment variables from {}", path.display()),
            Err(e) if e.not_found() => {
                info!(".env file not found. Relying on system environment variables.")
            }
            Err(e) => warn!("Failed to load .env file: {}", e),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let (api_id_raw, api_hash) = match (non_empty(ENV_API_ID), non_empty(ENV_API_HASH)) {
            (Some(id), Some(hash)) => (id, hash),
            _ => {
                return Err(KeepOnlineError::Config(format!(
                    "{} and {} environment variables must be set",
                    ENV_API_ID, ENV_API_HASH
                )))
            }
        };

        let api_id = api_id_raw.trim().parse::<i32>().map_err(|_| {
            KeepOnlineError::Config(format!("{} must be an integer", ENV_API_ID))
        })?;

        let session = match non_empty(ENV_STRING_SESSION) {
            Some(token) => SessionSource::Token(token.trim().to_string()),
            None => {
                let name = non_empty(ENV_SESSION_NAME)
                    .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());
                SessionSource::File(session_file_path(name.trim()))
            }
        };

        let (update_interval_minutes, interval_warning) =
            parse_interval_minutes(lookup(ENV_UPDATE_INTERVAL).as_deref());
        if let Some(warning) = interval_warning {
            warn!("{}", warning);
        }

        Ok(Self {
            api_id,
            api_hash: api_hash.trim().to_string(),
            session,
            update_interval_minutes,
        })
    }

    /// Time between two successful heartbeats.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_minutes * 60)
    }
}
