//! Transactional execution with bounded retry on contention.
//!
//! # Invariants
//! - Each attempt runs in its own `BEGIN IMMEDIATE` transaction; a failed
//!   attempt is rolled back before the next one starts.
//! - Only [`MasterError::is_contention`] failures are retried.
//! - The work closure re-reads state on every attempt; nothing is merged.

use crate::error::{MasterError, MasterResult};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCoordinator {
    max_attempts: u32,
}

impl RetryCoordinator {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `work` in a transaction, committing on success.
    ///
    /// # Errors
    /// - `Contention` once every attempt lost a uniqueness race.
    /// - Any other error from `work` or the driver, unchanged, without retry.
    pub fn execute<T, F>(
        &self,
        conn: &Connection,
        operation: &'static str,
        mut work: F,
    ) -> MasterResult<T>
    where
        F: FnMut(&Transaction<'_>) -> MasterResult<T>,
    {
        let started_at = Instant::now();
        for attempt in 1..=self.max_attempts {
            match run_once(conn, &mut work) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            "event=retry module=retry status=ok op={} attempt={} duration_ms={}",
                            operation,
                            attempt,
                            started_at.elapsed().as_millis()
                        );
                    }
                    return Ok(value);
                }
                Err(err) if err.is_contention() => {
                    warn!(
                        "event=retry module=retry status=contention op={} attempt={} max_attempts={} error={}",
                        operation, attempt, self.max_attempts, err
                    );
                }
                Err(err) => return Err(err),
            }
        }

        error!(
            "event=retry module=retry status=error op={} attempts={} duration_ms={} error_code=contention",
            operation,
            self.max_attempts,
            started_at.elapsed().as_millis()
        );
        Err(MasterError::Contention {
            operation,
            attempts: self.max_attempts,
        })
    }
}

fn run_once<T, F>(conn: &Connection, work: &mut F) -> MasterResult<T>
where
    F: FnMut(&Transaction<'_>) -> MasterResult<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let value = work(&tx)?;
    tx.commit()?;
    Ok(value)
}
