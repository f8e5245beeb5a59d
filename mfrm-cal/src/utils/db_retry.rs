//! Retry for writes that meet a busy SQLite database
//!
//! Activation performs one small write per essay; each is retried with
//! exponential backoff while SQLite reports the database busy or locked,
//! for at most `db_max_lock_wait_ms` in total.

use std::future::Future;
use std::time::{Duration, Instant};

use mfrm_common::{Error, Result};

/// SQLITE_BUSY and SQLITE_LOCKED primary result codes
const BUSY_CODES: [&str; 2] = ["5", "6"];

/// Doubling delay from 10 ms, capped at 1 s
struct Backoff {
    next: Duration,
}

impl Backoff {
    const FIRST: Duration = Duration::from_millis(10);
    const CAP: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self { next: Self::FIRST }
    }

    fn step(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::CAP);
        delay
    }
}

/// True for errors that clear once another writer commits
fn is_busy(err: &Error) -> bool {
    let Error::Database(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err {
        if let Some(code) = db_err.code() {
            // Extended codes keep the primary code in the low byte
            let primary = code.parse::<u32>().map(|c| (c & 0xff).to_string());
            if primary.map_or(false, |p| BUSY_CODES.contains(&p.as_str())) {
                return true;
            }
        }
    }

    let message = sqlx_err.to_string();
    message.contains("database is locked") || message.contains("database is busy")
}

/// Run `operation`, retrying busy/locked failures until `max_wait_ms` has elapsed
///
/// Other errors are returned on the first attempt.
pub async fn retry_on_lock<F, Fut, T>(name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut backoff = Backoff::new();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        operation = name,
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Write went through after the database was busy"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_busy(&err) => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= budget {
            tracing::error!(
                operation = name,
                attempts,
                waited_ms = waited.as_millis() as u64,
                error = %err,
                "Giving up on busy database"
            );
            return Err(Error::Internal(format!(
                "{}: database still locked after {} attempts over {} ms",
                name,
                attempts,
                waited.as_millis()
            )));
        }

        let delay = backoff.step().min(budget - waited);
        tracing::warn!(
            operation = name,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "Database busy, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..9).map(|_| backoff.step().as_millis() as u64).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 640, 1000, 1000]);
    }

    #[test]
    fn test_only_lock_errors_are_retried() {
        assert!(is_busy(&locked()));
        assert!(!is_busy(&Error::NotFound("essay".to_string())));
        assert!(!is_busy(&Error::Database(sqlx::Error::RowNotFound)));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_locks() {
        let mut calls = 0;

        let value = retry_on_lock("apply_calibration", 5000, || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(locked())
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_gives_up_when_budget_spent() {
        let result = retry_on_lock("apply_calibration", 40, || async { Err::<(), _>(locked()) }).await;

        match result {
            Err(Error::Internal(msg)) => assert!(msg.starts_with("apply_calibration: database still locked")),
            other => panic!("expected give-up, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_errors_return_immediately() {
        let mut calls = 0;

        let result = retry_on_lock("apply_calibration", 5000, || {
            calls += 1;
            async { Err::<(), _>(Error::Conflict("run".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(calls, 1);
    }
}
