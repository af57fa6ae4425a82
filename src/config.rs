use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::commit::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::tickets::{DEFAULT_CONFIRM_TTL, DEFAULT_RESET_TTL};

pub const ENV_WORKSPACE: &str = "RISKBOOK_WORKSPACE";
pub const ENV_CONFIRM_TTL_SECS: &str = "RISKBOOK_CONFIRM_TTL_SECS";
pub const ENV_RESET_TTL_SECS: &str = "RISKBOOK_RESET_TTL_SECS";
pub const ENV_COMMIT_MAX_ATTEMPTS: &str = "RISKBOOK_COMMIT_MAX_ATTEMPTS";
pub const ENV_COMMIT_BASE_DELAY_MS: &str = "RISKBOOK_COMMIT_BASE_DELAY_MS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "RISKBOOK_BUSY_TIMEOUT_MS";
pub const ENV_PAGE_SIZE: &str = "RISKBOOK_PAGE_SIZE";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub confirm_ttl: Duration,
    pub reset_ttl: Duration,
    pub retry: RetryPolicy,
    /// How long SQLite itself waits on a lock before reporting busy.
    pub busy_timeout: Duration,
    pub page_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            confirm_ttl: DEFAULT_CONFIRM_TTL,
            reset_ttl: DEFAULT_RESET_TTL,
            retry: RetryPolicy::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let workspace = lookup(ENV_WORKSPACE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let confirm_ttl = parsed(&lookup, ENV_CONFIRM_TTL_SECS)
            .map(Duration::from_secs)
            .unwrap_or(d.confirm_ttl);
        let reset_ttl = parsed(&lookup, ENV_RESET_TTL_SECS)
            .map(Duration::from_secs)
            .unwrap_or(d.reset_ttl);
        let max_attempts = parsed::<u32, _>(&lookup, ENV_COMMIT_MAX_ATTEMPTS)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let base_delay = parsed(&lookup, ENV_COMMIT_BASE_DELAY_MS)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BASE_DELAY);
        let busy_timeout = parsed(&lookup, ENV_BUSY_TIMEOUT_MS)
            .map(Duration::from_millis)
            .unwrap_or(d.busy_timeout);
        let page_size = parsed::<usize, _>(&lookup, ENV_PAGE_SIZE)
            .filter(|n| *n > 0)
            .unwrap_or(d.page_size);

        Self {
            workspace,
            confirm_ttl,
            reset_ttl,
            retry: RetryPolicy::new(max_attempts, base_delay),
            busy_timeout,
            page_size,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting; using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = DaemonConfig::from_lookup(|_| None);
        assert_eq!(cfg, DaemonConfig::default());
        assert_eq!(cfg.confirm_ttl, Duration::from_secs(600));
        assert_eq!(cfg.retry.max_attempts, 6);
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = DaemonConfig::from_lookup(lookup_from(&[
            (ENV_CONFIRM_TTL_SECS, "5"),
            (ENV_COMMIT_MAX_ATTEMPTS, "0"),
            (ENV_COMMIT_BASE_DELAY_MS, "not-a-number"),
            (ENV_WORKSPACE, "  "),
            (ENV_PAGE_SIZE, "25"),
        ]));
        assert_eq!(cfg.confirm_ttl, Duration::from_secs(5));
        assert_eq!(cfg.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.retry.base_delay, DEFAULT_BASE_DELAY);
        assert_eq!(cfg.workspace, None);
        assert_eq!(cfg.page_size, 25);
    }
}
