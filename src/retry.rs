//! Retry policy with session-restart escalation for pipeline stages.
//!
//! Every stage error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts, stale page state, busy database; retried in place
//! - [`FailureType::SessionInvalid`] - the fetch session lost its authentication; restart it
//! - [`FailureType::Permanent`] - data-shape problems and missing pages; skip immediately
//!
//! [`RetryPolicy::run`] composes the two ceilings into one combinator: up to
//! `max_item_retries` attempts per session, then a recovery action on the
//! resource (a session restart), repeated up to `max_session_restarts` times.
//!
//! # Example
//!
//! ```
//! use ingest_core::retry::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 1, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::Restart { restart } => println!("Restarting session ({restart})"),
//!     RetryDecision::GiveUp { reason } => println!("Giving up: {reason}"),
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

/// Default attempts per session before escalating.
pub const DEFAULT_MAX_ITEM_RETRIES: u32 = 3;

/// Default number of session restarts before an item is skipped.
pub const DEFAULT_MAX_SESSION_RESTARTS: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Maximum jitter added to delays (250ms).
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of stage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// The underlying session is no longer usable (authentication lost,
    /// redirected to login). Only a restart can help.
    SessionInvalid,

    /// Retrying will not change the outcome (missing fields, 404).
    Permanent,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::SessionInvalid => "session_invalid",
            Self::Permanent => "permanent",
        };
        write!(f, "{label}")
    }
}

/// Errors that can be mapped onto a [`FailureType`].
pub trait Classify {
    /// Returns the retry classification for this error.
    fn failure_type(&self) -> FailureType;
}

/// Decision on what to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry on the same session after the delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be within the current session (1-indexed).
        attempt: u32,
    },

    /// Run the recovery action, then start a fresh attempt budget.
    Restart {
        /// Which restart this will be (1-indexed).
        restart: u32,
    },

    /// Stop and report the item as skipped.
    GiveUp {
        /// Human-readable reason why no further attempt is made.
        reason: String,
    },
}

/// A resource that can be recovered between retry cycles.
#[async_trait]
pub trait Recover: Send {
    /// Recreates whatever state the resource needs (e.g. a fresh login).
    async fn recover(&mut self) -> Result<(), String>;
}

/// Recovery action for operations without a session (database batches).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecovery;

#[async_trait]
impl Recover for NoRecovery {
    async fn recover(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Successful result plus the retry effort it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    /// The operation's value.
    pub value: T,
    /// Retries (not counting the first attempt) across all sessions.
    pub retries: u32,
    /// Session restarts performed.
    pub restarts: u32,
}

/// Terminal failure after the policy gave up.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// The last error returned by the operation.
    pub error: E,
    /// Why the policy stopped.
    pub reason: String,
    /// Retries performed before giving up.
    pub retries: u32,
    /// Session restarts performed before giving up.
    pub restarts: u32,
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.reason)
    }
}

/// Retry ceilings and the fixed backoff delay.
///
/// # Default Values
///
/// - `max_item_retries`: 3
/// - `max_session_restarts`: 3
/// - `retry_delay`: 2 seconds (plus up to 250ms jitter)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per session (including the first).
    max_item_retries: u32,

    /// Session restarts before giving up.
    max_session_restarts: u32,

    /// Fixed delay between attempts.
    retry_delay: Duration,

    /// Whether to add random jitter to the delay.
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_item_retries: DEFAULT_MAX_ITEM_RETRIES,
            max_session_restarts: DEFAULT_MAX_SESSION_RESTARTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_item_retries` is clamped to at least 1.
    #[must_use]
    pub fn new(max_item_retries: u32, max_session_restarts: u32, retry_delay: Duration) -> Self {
        Self {
            max_item_retries: max_item_retries.max(1),
            max_session_restarts,
            retry_delay,
            jitter: true,
        }
    }

    /// Policy for database batches: roll back, retry once, then skip.
    #[must_use]
    pub fn persistence(retry_delay: Duration) -> Self {
        Self {
            max_item_retries: 2,
            max_session_restarts: 0,
            retry_delay,
            jitter: true,
        }
    }

    /// Disables jitter so delays are exactly `retry_delay`.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns the per-session attempt ceiling.
    #[must_use]
    pub fn max_item_retries(&self) -> u32 {
        self.max_item_retries
    }

    /// Returns the session restart ceiling.
    #[must_use]
    pub fn max_session_restarts(&self) -> u32 {
        self.max_session_restarts
    }

    /// Returns the configured fixed delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Determines what to do after attempt `attempt` (1-indexed, within the
    /// current session) failed, given `restarts` restarts already performed.
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32, restarts: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::GiveUp {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::SessionInvalid => {
                return self.escalate(restarts, "session invalid");
            }
            FailureType::Transient => {}
        }

        if attempt < self.max_item_retries {
            return RetryDecision::Retry {
                delay: self.calculate_delay(),
                attempt: attempt + 1,
            };
        }

        debug!(attempt, max = self.max_item_retries, "item retries exhausted");
        self.escalate(restarts, "item retries exhausted")
    }

    fn escalate(&self, restarts: u32, cause: &str) -> RetryDecision {
        if restarts < self.max_session_restarts {
            RetryDecision::Restart {
                restart: restarts + 1,
            }
        } else {
            RetryDecision::GiveUp {
                reason: format!(
                    "{cause}; session restarts ({}) exhausted",
                    self.max_session_restarts
                ),
            }
        }
    }

    fn calculate_delay(&self) -> Duration {
        if !self.jitter || self.retry_delay.is_zero() {
            return self.retry_delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        self.retry_delay + Duration::from_millis(jitter_ms)
    }

    /// Runs `op` against `resource`, retrying and recovering per this policy.
    ///
    /// Borrowed inputs the operation needs travel through `ctx` so the
    /// returned future only borrows what `run` lends it for one attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RetryFailure`] holding the last operation error once the
    /// policy gives up.
    #[instrument(level = "debug", skip_all, fields(label = %label))]
    pub async fn run<R, C, T, E, F>(
        &self,
        label: &str,
        resource: &mut R,
        ctx: &C,
        mut op: F,
    ) -> Result<Attempted<T>, RetryFailure<E>>
    where
        R: Recover + ?Sized,
        C: Sync + ?Sized,
        E: Classify + fmt::Display,
        F: for<'a> FnMut(&'a mut R, &'a C) -> BoxFuture<'a, Result<T, E>>,
    {
        let mut attempt = 1u32;
        let mut restarts = 0u32;
        let mut retries = 0u32;

        loop {
            let error = match op(resource, ctx).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        retries,
                        restarts,
                    });
                }
                Err(error) => error,
            };

            match self.should_retry(error.failure_type(), attempt, restarts) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = self.max_item_retries,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying"
                    );
                    retries += 1;
                    attempt = next_attempt;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Restart { restart } => {
                    warn!(
                        restart,
                        max_restarts = self.max_session_restarts,
                        error = %error,
                        "restarting session"
                    );
                    restarts = restart;
                    retries += 1;
                    attempt = 1;
                    if let Err(recover_error) = resource.recover().await {
                        warn!(restart, error = %recover_error, "session recovery failed");
                    }
                }
                RetryDecision::GiveUp { reason } => {
                    debug!(%reason, "giving up");
                    return Err(RetryFailure {
                        error,
                        reason,
                        retries,
                        restarts,
                    });
                }
            }
        }
    }
}
