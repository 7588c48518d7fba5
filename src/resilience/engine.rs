//! Bounded-attempt execution engine.
//!
//! Domain-agnostic retry loop: a one-time `setup` phase, then up to
//! `max_attempts` rounds of `prepare` + `attempt`. The operation's error type
//! classifies each failure as transient (wait, then retry) or fatal (abort).
//! Every error seen across the run is kept in chronological order and
//! returned inside the final [`EngineError`].

use std::fmt;
use std::future::pending;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Transient/fatal classification for an operation's error type.
pub trait Retryable {
    /// Whether the failure is worth another attempt.
    fn is_transient(&self) -> bool;

    /// Server-suggested minimum wait before the next attempt, if any.
    /// Only consulted after a transient failure.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// One retryable unit of work, split into the phases the engine sequences.
#[allow(async_fn_in_trait)]
pub trait Operation {
    type Output;
    type Error: Retryable + fmt::Display + fmt::Debug;

    /// Runs once before the attempt loop. A fatal error aborts the run.
    async fn setup(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Runs at the start of every attempt (e.g. obtain an auth token).
    async fn prepare(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// The attempt itself (e.g. perform the HTTP call).
    async fn attempt(&mut self) -> Result<Self::Output, Self::Error>;
}

/// Engine parameters, validated by construction (`u32`/`Duration` ranges).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; 0 means unbounded.
    pub max_attempts: u32,
    /// Baseline wait between attempts.
    pub retry_delay: Duration,
    /// Budget for the whole run, including waits. `None` means no budget.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            timeout: None,
        }
    }
}

/// Chronological record of every error one run produced.
#[derive(Debug)]
pub struct ErrorHistory<E>(Vec<E>);

impl<E> ErrorHistory<E> {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, error: E) {
        self.0.push(error);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.0
    }
}

impl<E: fmt::Display> fmt::Display for ErrorHistory<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s):", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            write!(f, " {}. {error}", i + 1)?;
        }
        Ok(())
    }
}

/// Why a run stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The governing cancellation token fired.
    Signal,
    /// The run's overall timeout budget elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Signal => write!(f, "execution canceled"),
            CancelReason::DeadlineExceeded => write!(f, "timeout budget exceeded"),
        }
    }
}

/// Terminal outcome of a failed run, carrying the ordered error history.
#[derive(Debug, Error)]
pub enum EngineError<E: fmt::Display + fmt::Debug> {
    /// A phase returned a fatal error; the loop aborted immediately.
    #[error("aborted on attempt {attempts}: {history}")]
    Fatal { attempts: u32, history: ErrorHistory<E> },

    /// Every allowed attempt failed with a transient error.
    #[error("reached {max_attempts} max attempts: {history}")]
    Exhausted {
        max_attempts: u32,
        history: ErrorHistory<E>,
    },

    /// The cancellation signal or timeout budget ended the run.
    #[error("{reason} during attempt {attempts}: {history}")]
    Canceled {
        reason: CancelReason,
        attempts: u32,
        history: ErrorHistory<E>,
    },
}

impl<E: fmt::Display + fmt::Debug> EngineError<E> {
    pub fn history(&self) -> &ErrorHistory<E> {
        match self {
            EngineError::Fatal { history, .. }
            | EngineError::Exhausted { history, .. }
            | EngineError::Canceled { history, .. } => history,
        }
    }
}

/// Reusable bounded-retry executor.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    id: String,
    config: RetryConfig,
}

impl RetryEngine {
    pub fn new(id: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    /// Drive the operation to success, a fatal error, cancellation, or
    /// attempt exhaustion.
    pub async fn run<O: Operation>(
        &self,
        op: &mut O,
        cancel: &CancellationToken,
    ) -> Result<O::Output, EngineError<O::Error>> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut history = ErrorHistory::new();

        match op.setup().await {
            Ok(()) => {}
            Err(error) if error.is_transient() => {
                tracing::warn!(id = %self.id, %error, "setup failed; continuing");
                history.push(error);
            }
            Err(error) => {
                tracing::error!(id = %self.id, %error, "setup failed fatally");
                history.push(error);
                return Err(EngineError::Fatal {
                    attempts: 0,
                    history,
                });
            }
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.config.max_attempts != 0 && attempt > self.config.max_attempts {
                break;
            }
            if let Err(reason) = self.wait(Duration::ZERO, deadline, cancel).await {
                return Err(EngineError::Canceled {
                    reason,
                    attempts: attempt,
                    history,
                });
            }

            tracing::debug!(
                id = %self.id,
                attempt,
                max_attempts = self.config.max_attempts,
                "starting attempt"
            );

            // The phase futures race the cancellation token and the run's
            // deadline, so a hung prepare or attempt cannot outlive the
            // budget.
            let phase = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(id = %self.id, attempt, "canceled mid-attempt");
                    return Err(EngineError::Canceled {
                        reason: CancelReason::Signal,
                        attempts: attempt,
                        history,
                    });
                }
                _ = until_deadline(deadline) => {
                    tracing::warn!(id = %self.id, attempt, "timeout budget elapsed mid-attempt");
                    return Err(EngineError::Canceled {
                        reason: CancelReason::DeadlineExceeded,
                        attempts: attempt,
                        history,
                    });
                }
                phase = async {
                    match op.prepare().await {
                        Ok(()) => op.attempt().await,
                        Err(error) => Err(error),
                    }
                } => phase,
            };

            let error = match phase {
                Ok(output) => {
                    tracing::debug!(id = %self.id, attempt, "attempt succeeded");
                    return Ok(output);
                }
                Err(error) => error,
            };

            if cancel.is_cancelled() {
                tracing::warn!(id = %self.id, attempt, %error, "attempt canceled");
                history.push(error);
                return Err(EngineError::Canceled {
                    reason: CancelReason::Signal,
                    attempts: attempt,
                    history,
                });
            }

            if !error.is_transient() {
                tracing::error!(id = %self.id, attempt, %error, "fatal error; aborting");
                history.push(error);
                return Err(EngineError::Fatal { attempts: attempt, history });
            }

            // Honor a server-suggested delay, but never shorten the baseline.
            let delay = error
                .retry_after()
                .map_or(self.config.retry_delay, |suggested| {
                    suggested.max(self.config.retry_delay)
                });
            tracing::warn!(id = %self.id, attempt, %error, ?delay, "transient error; retrying");
            history.push(error);

            if let Err(reason) = self.wait(delay, deadline, cancel).await {
                return Err(EngineError::Canceled {
                    reason,
                    attempts: attempt,
                    history,
                });
            }
        }

        Err(EngineError::Exhausted {
            max_attempts: self.config.max_attempts,
            history,
        })
    }

    /// Sleep for `delay`, aborting early if the cancellation token fires or
    /// the run's deadline passes.
    ///
    /// Biased so an already-fired token or already-passed deadline wins over
    /// a zero-length sleep.
    async fn wait(
        &self,
        delay: Duration,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), CancelReason> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CancelReason::Signal),
            _ = until_deadline(deadline) => Err(CancelReason::DeadlineExceeded),
            _ = sleep(delay) => Ok(()),
        }
    }
}

/// Resolves when the deadline passes; never resolves without one.
async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
