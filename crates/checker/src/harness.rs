//! Check harness.
//!
//! Wraps any [`Probe`] with a deadline. Every attempt runs as its own task;
//! the harness races that task against the deadline timer and commits the
//! first of the two through [`Attempt::commit`]. A timed out task is aborted
//! and joined before the result is handed out, so its connection is gone by
//! the time the caller sees TIMEOUT. Dropping the future returned by
//! [`Harness::run`] aborts the probe task as well.

use crate::attempt::{Attempt, Cause};
use crate::checkers::Probe;
use crate::error::ProbeError;
use crate::types::{CheckResult, Detail};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::AbortOnDropHandle;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, info_span, warn};

/// Runs probes under a fixed deadline
#[derive(Debug, Clone, Copy)]
pub struct Harness {
    deadline: Duration,
}

impl Harness {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one attempt of `probe` and return its result.
    ///
    /// Never panics and never returns early: a panicking probe becomes a
    /// CONNECTION_ERROR, a slow one a TIMEOUT.
    pub async fn run(&self, probe: Arc<dyn Probe>) -> CheckResult {
        let span = info_span!(
            "check",
            kind = probe.label(),
            deadline_ms = self.deadline.as_millis() as u64
        );
        self.supervise(probe).instrument(span).await
    }

    async fn supervise(&self, probe: Arc<dyn Probe>) -> CheckResult {
        let started = Instant::now();
        let attempt = Arc::new(Attempt::new());

        // Dropping the `run` future aborts the probe with it.
        let mut task: AbortOnDropHandle<Result<Detail, ProbeError>> = {
            let attempt = attempt.clone();
            AbortOnDropHandle::new(tokio::spawn(
                async move { probe.check(&attempt).await }.in_current_span(),
            ))
        };

        tokio::select! {
            biased;

            joined = &mut task => {
                let result = match joined {
                    Ok(outcome) => {
                        attempt.commit(Cause::of(&outcome));
                        match outcome {
                            Ok(detail) => CheckResult::healthy(started.elapsed(), detail),
                            Err(e) => CheckResult::failed(started.elapsed(), &e),
                        }
                    }
                    Err(e) => {
                        attempt.commit(Cause::ConnectionError);
                        let reason = describe_join_error(e);
                        CheckResult::failed(
                            started.elapsed(),
                            &ProbeError::connection(format!("probe aborted: {}", reason)),
                        )
                        .with_detail("panic", reason)
                    }
                };

                if result.ok {
                    debug!(duration_ms = result.duration.as_millis() as u64, "Health check passed");
                } else {
                    warn!(
                        error_kind = ?result.error_kind,
                        message = result.message.as_deref().unwrap_or("unknown"),
                        "Health check failed"
                    );
                }
                result
            }

            _ = sleep(self.deadline) => {
                let phase = attempt.phase();
                attempt.commit(Cause::Timeout);

                task.abort();
                // Join so the probe's connection is dropped before we report.
                match task.await {
                    Ok(_) => debug!("Discarding outcome that lost the race to the deadline"),
                    Err(e) if e.is_panic() => debug!("Probe panicked after the deadline"),
                    Err(_) => {}
                }

                warn!(%phase, "Health check timed out");
                CheckResult::timeout(self.deadline, phase)
            }
        }
    }
}

/// Run one attempt in the background and hand its result to `done`.
///
/// Returns immediately; `done` is invoked exactly once from the spawned task.
pub fn run_with_deadline<F>(probe: Arc<dyn Probe>, deadline: Duration, done: F) -> JoinHandle<()>
where
    F: FnOnce(CheckResult) + Send + 'static,
{
    tokio::spawn(async move {
        let result = Harness::new(deadline).run(probe).await;
        done(result);
    })
}

fn describe_join_error(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        "probe task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }

    #[test]
    fn test_deadline_accessor() {
        let harness = Harness::new(Duration::from_millis(250));
        assert_eq!(harness.deadline(), Duration::from_millis(250));
    }
}
