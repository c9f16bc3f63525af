//! Required environment variables.
//!
//! Every variable is validated up front; a missing one aborts startup with
//! an error that enumerates every unset key, not just the first.

use thiserror::Error;
use tracing::info;

pub const DEBUG: &str = "MANABA_CLONE_DEBUG";
pub const CRAWLER_SLEEP: &str = "MANABA_CLONE_CRAWLER_SLEEP";
pub const DOWNLOADER_SLEEP: &str = "MANABA_CLONE_DOWNLOADER_SLEEP";

/// Sleep override applied to every rate limit while debugging.
const DEBUG_SLEEP_SECONDS: u64 = 2;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("environment variables unset: {0:?}")]
    Unset(Vec<String>),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, Copy)]
pub struct Env {
    pub debug: bool,
    pub crawler_sleep_seconds: u64,
    pub downloader_sleep_seconds: u64,
}

impl Env {
    /// Read and validate every required variable from the process
    /// environment.
    pub fn load() -> Result<Env, EnvError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Env, EnvError> {
        let mut unset = Vec::new();
        let mut get = |key: &str| match lookup(key) {
            Some(value) => Some(value),
            None => {
                unset.push(key.to_string());
                None
            }
        };

        let debug_raw = get(DEBUG);
        let crawler_raw = get(CRAWLER_SLEEP);
        let downloader_raw = get(DOWNLOADER_SLEEP);
        if !unset.is_empty() {
            return Err(EnvError::Unset(unset));
        }

        let debug = parse_bool(DEBUG, &debug_raw.unwrap_or_default())?;
        let mut crawler_sleep_seconds =
            parse_seconds(CRAWLER_SLEEP, &crawler_raw.unwrap_or_default())?;
        let mut downloader_sleep_seconds =
            parse_seconds(DOWNLOADER_SLEEP, &downloader_raw.unwrap_or_default())?;
        if debug {
            crawler_sleep_seconds = DEBUG_SLEEP_SECONDS;
            downloader_sleep_seconds = DEBUG_SLEEP_SECONDS;
        }

        let env = Env {
            debug,
            crawler_sleep_seconds,
            downloader_sleep_seconds,
        };
        info!(?env, "ENV SETUP");
        Ok(env)
    }
}

/// Accept an integer (0 = false) or TRUE/FALSE in any case.
fn parse_bool(key: &str, value: &str) -> Result<bool, EnvError> {
    if let Ok(number) = value.parse::<i64>() {
        return Ok(number != 0);
    }
    match value.to_ascii_uppercase().as_str() {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(EnvError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u64, EnvError> {
    value.parse::<u64>().map_err(|_| EnvError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    })
}
