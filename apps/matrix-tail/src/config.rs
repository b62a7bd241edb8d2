//! Environment-backed configuration for `matrix-tail`.

use std::{env, error::Error, fmt, time::Duration};

use client_core::{RetryPolicy, SyncConfig};

const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

/// How the tool authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum TailAuth {
    AccessToken(String),
    Password { user: String, password: String },
}

impl fmt::Debug for TailAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    pub homeserver: String,
    pub auth: TailAuth,
    pub sync: SyncConfig,
    /// Only print events from these rooms. Empty means every room.
    pub rooms: Vec<String>,
}

impl TailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let homeserver = optional_trimmed_env("MATRIX_TAIL_HOMESERVER", &mut lookup)
            .ok_or(ConfigError::Missing {
                key: "MATRIX_TAIL_HOMESERVER",
            })?;

        let auth = match optional_trimmed_env("MATRIX_TAIL_ACCESS_TOKEN", &mut lookup) {
            Some(token) => TailAuth::AccessToken(token),
            None => {
                let user = optional_trimmed_env("MATRIX_TAIL_USER", &mut lookup).ok_or(
                    ConfigError::Missing {
                        key: "MATRIX_TAIL_ACCESS_TOKEN or MATRIX_TAIL_USER",
                    },
                )?;
                let password = lookup("MATRIX_TAIL_PASSWORD")
                    .filter(|value| !value.is_empty())
                    .ok_or(ConfigError::Missing {
                        key: "MATRIX_TAIL_PASSWORD",
                    })?;
                TailAuth::Password { user, password }
            }
        };

        let mut sync = SyncConfig::default();
        if let Some(timeout_ms) = parse_optional_u64("MATRIX_TAIL_SYNC_TIMEOUT_MS", &mut lookup)? {
            sync = sync.with_long_poll_timeout(Duration::from_millis(timeout_ms));
        }
        let base_ms = parse_optional_u64("MATRIX_TAIL_RETRY_BASE_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RETRY_BASE_MS);
        let max_ms = parse_optional_u64("MATRIX_TAIL_RETRY_MAX_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RETRY_MAX_MS);
        if max_ms < base_ms {
            return Err(ConfigError::InvalidValue {
                key: "MATRIX_TAIL_RETRY_MAX_MS",
                value: max_ms.to_string(),
                reason: format!("must be at least MATRIX_TAIL_RETRY_BASE_MS ({base_ms})"),
            });
        }
        sync = sync.with_retry(RetryPolicy::new(base_ms, max_ms));

        let rooms = optional_trimmed_env("MATRIX_TAIL_ROOMS", &mut lookup)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|room| !room.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            homeserver,
            auth,
            sync,
            rooms,
        })
    }

    pub fn wants_room(&self, room_id: &str) -> bool {
        self.rooms.is_empty() || self.rooms.iter().any(|room| room == room_id)
    }
}

/// Errors produced while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing {
        key: &'static str,
    },
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
