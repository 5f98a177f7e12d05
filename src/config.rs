use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000/ask";

/// Runtime settings, read once at startup from the environment (the binary
/// loads `.env` first via dotenv).
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub backend_url: String,
    /// Minimum spacing between sends to one conversation.
    pub rate_limit: Duration,
    /// Minimum spacing between partial edits of one outbound message.
    pub edit_interval: Duration,
    /// How long the upstream stream may go quiet before the task unwinds.
    pub idle_timeout: Duration,
    /// Retry budget for each transport send/edit.
    pub max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let telegram_token =
            env::var("TELEGRAM_TOKEN").context("TELEGRAM_TOKEN must be set")?;
        let backend_url =
            env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());

        Ok(Self {
            telegram_token,
            backend_url,
            rate_limit: Duration::from_secs(parse_env("RATE_LIMIT_SECONDS", 2u64)),
            edit_interval: Duration::from_millis(parse_env("EDIT_INTERVAL_MS", 200u64)),
            idle_timeout: Duration::from_secs(parse_env("STREAM_IDLE_TIMEOUT_SECS", 60u64)),
            max_attempts: parse_env("SEND_MAX_ATTEMPTS", 3u32),
        })
    }
}

/// Parses an env var, falling back to the default (with a warning) when the
/// value is missing or malformed.
fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring invalid {key}={raw}, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_defaults_when_unset() {
        assert_eq!(parse_env("SEVABOT_TEST_UNSET_KEY", 42u64), 42);
    }

    #[test]
    fn test_parse_env_reads_and_rejects() {
        env::set_var("SEVABOT_TEST_GOOD_KEY", "7");
        assert_eq!(parse_env("SEVABOT_TEST_GOOD_KEY", 1u64), 7);

        env::set_var("SEVABOT_TEST_BAD_KEY", "not-a-number");
        assert_eq!(parse_env("SEVABOT_TEST_BAD_KEY", 9u32), 9);
    }
}
