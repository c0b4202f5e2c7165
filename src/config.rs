use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::invites::InvitePolicy;

pub const DEFAULT_LOG_FILTER: &str = "couplefy=info,sqlx=warn";
pub const DEFAULT_INVITE_TTL_DAYS: i64 = 7;
pub const DEFAULT_INVITE_CODE_LEN: usize = 8;
const INVITE_CODE_LEN_RANGE: std::ops::RangeInclusive<usize> = 6..=32;
const INVITE_TTL_RANGE: std::ops::RangeInclusive<i64> = 1..=365;

/// Runtime settings, resolved from `COUPLEFY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
    pub invite_ttl_days: i64,
    pub invite_code_len: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = match get("COUPLEFY_DB") {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let invite_ttl_days = match get("COUPLEFY_INVITE_TTL_DAYS") {
            Some(raw) => {
                let days: i64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("COUPLEFY_INVITE_TTL_DAYS={raw:?} is not a number"))?;
                if !INVITE_TTL_RANGE.contains(&days) {
                    bail!("COUPLEFY_INVITE_TTL_DAYS must be between 1 and 365, got {days}");
                }
                days
            }
            None => DEFAULT_INVITE_TTL_DAYS,
        };

        let invite_code_len = match get("COUPLEFY_INVITE_CODE_LEN") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("COUPLEFY_INVITE_CODE_LEN={raw:?} is not a number"))?;
                if !INVITE_CODE_LEN_RANGE.contains(&len) {
                    bail!("COUPLEFY_INVITE_CODE_LEN must be between 6 and 32, got {len}");
                }
                len
            }
            None => DEFAULT_INVITE_CODE_LEN,
        };

        Ok(Config {
            db_path,
            log_filter: get("COUPLEFY_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_dir: get("COUPLEFY_LOG_DIR").map(PathBuf::from),
            invite_ttl_days,
            invite_code_len,
        })
    }

    pub fn invite_policy(&self) -> InvitePolicy {
        InvitePolicy {
            ttl_days: self.invite_ttl_days,
            code_len: self.invite_code_len,
        }
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no platform data directory; set COUPLEFY_DB")?;
    Ok(base.join("couplefy").join("couplefy.sqlite3"))
}
