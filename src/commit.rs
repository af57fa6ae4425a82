//! Commit retry coordinator.
//!
//! SQLite allows a single writer. A second writer gets `SQLITE_BUSY` (or
//! `SQLITE_LOCKED` for shared-cache conflicts) instead of queueing, so every
//! write unit goes through [`commit_with_retry`], which replays the whole
//! transaction with linear backoff. Nothing else in the daemon retries.

use std::thread;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait before the retry that follows `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("storage busy after {attempts} attempt(s)")]
    StorageBusy { attempts: u32 },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl CommitError {
    pub fn is_storage_busy(&self) -> bool {
        matches!(self, CommitError::StorageBusy { .. })
    }
}

/// True for the contention errors a retry can fix.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// Runs `attempt_fn` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` invocations have failed with contention.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut attempt_fn: F) -> Result<T, CommitError>
where
    F: FnMut(u32) -> rusqlite::Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match attempt_fn(attempt) {
            Ok(v) => {
                if attempt > 1 {
                    info!(attempt, "commit succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if is_transient(&e) => {
                if attempt == max_attempts {
                    break;
                }
                let delay = policy.delay_after(attempt);
                log_retry(attempt, max_attempts, delay, &e);
                thread::sleep(delay);
            }
            Err(e) => return Err(CommitError::Sqlite(e)),
        }
    }
    error!(attempts = max_attempts, "database still busy; giving up");
    Err(CommitError::StorageBusy {
        attempts: max_attempts,
    })
}

fn log_retry(attempt: u32, max_attempts: u32, delay: Duration, e: &rusqlite::Error) {
    let delay_ms = delay.as_millis() as u64;
    match attempt {
        1 => debug!(attempt, max_attempts, delay_ms, error = %e, "database busy, retrying commit"),
        2 | 3 => info!(attempt, max_attempts, delay_ms, error = %e, "database busy, retrying commit"),
        _ => warn!(attempt, max_attempts, delay_ms, error = %e, "database busy, retrying commit"),
    }
}

/// Applies `work` inside an IMMEDIATE transaction and commits it.
///
/// The transaction is rolled back on every failure; on contention the whole
/// unit (begin, work, commit) is replayed, so `work` must be safe to run more
/// than once.
pub fn commit_with_retry<T, F>(
    conn: &Connection,
    policy: &RetryPolicy,
    mut work: F,
) -> Result<T, CommitError>
where
    F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
{
    run_with_retry(policy, |_| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let out = work(&tx)?;
        tx.commit()?;
        Ok(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_BUSY), None)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn busy_and_locked_are_transient() {
        assert!(is_transient(&busy()));
        let locked = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_LOCKED), None);
        assert!(is_transient(&locked));
        assert!(!is_transient(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut calls = 0u32;
        let res: Result<(), _> = run_with_retry(&fast_policy(4), |_| {
            calls += 1;
            Err(busy())
        });
        assert_eq!(calls, 4);
        assert!(matches!(res, Err(CommitError::StorageBusy { attempts: 4 })));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0u32;
        let res: Result<(), _> = run_with_retry(&fast_policy(6), |_| {
            calls += 1;
            Err(rusqlite::Error::InvalidQuery)
        });
        assert_eq!(calls, 1);
        assert!(matches!(res, Err(CommitError::Sqlite(_))));
    }

    #[test]
    fn succeeds_on_a_later_attempt() {
        let res = run_with_retry(&fast_policy(6), |attempt| {
            if attempt < 3 {
                Err(busy())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(res.expect("commit"), 3);
    }

    #[test]
    fn backoff_is_linear() {
        let p = RetryPolicy::new(6, Duration::from_millis(50));
        assert_eq!(p.delay_after(1), Duration::from_millis(50));
        assert_eq!(p.delay_after(3), Duration::from_millis(150));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn failed_work_rolls_back() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t(v INTEGER)").expect("schema");
        let res: Result<(), _> = commit_with_retry(&conn, &RetryPolicy::default(), |tx| {
            tx.execute("INSERT INTO t(v) VALUES(1)", [])?;
            Err(rusqlite::Error::InvalidQuery)
        });
        assert!(res.is_err());
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }
}
