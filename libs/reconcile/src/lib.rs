//! Bounded retry primitives for convergence actions.
//!
//! Convergence actions (scaling a cluster, pushing a desired state) talk to
//! systems that fail independently. This library gives every such action the
//! same shape:
//!
//! - **Classification**: each attempt fails either transiently (worth
//!   retrying) or terminally (an explicit rejection, never retried).
//! - **Bounded retries**: at most `max_attempts` attempts, separated by
//!   exponential backoff with jitter.
//! - **Terminal outcome**: the caller always gets exactly one of succeeded,
//!   rejected, or exhausted, together with the number of attempts made.
//!
//! # Invariants
//!
//! - A terminal failure stops retrying immediately
//! - The number of attempts never exceeds `max_attempts` (minimum 1)
//! - Backoff delays never exceed `max * (1 + jitter)`

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Errors from building retry policies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The policy parameters are out of range.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base delay for the first retry.
    pub base: Duration,

    /// Maximum delay before jitter.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            max: DEFAULT_BACKOFF_MAX,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Backoff without jitter, for deterministic schedules.
    pub fn fixed(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
        }
    }

    /// Calculate the delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(30) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let spread = (rand::random::<f64>() * 2.0 - 1.0) * delay * jitter;

        Duration::from_millis((delay + spread).max(0.0) as u64)
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry policy for a single convergence action.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay schedule between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a validated retry policy.
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Result<Self, ReconcileError> {
        if max_attempts == 0 {
            return Err(ReconcileError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if backoff.base > backoff.max {
            return Err(ReconcileError::InvalidPolicy(format!(
                "backoff base {:?} exceeds max {:?}",
                backoff.base, backoff.max
            )));
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return Err(ReconcileError::InvalidPolicy(format!(
                "jitter {} outside [0, 1]",
                backoff.jitter
            )));
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffPolicy::fixed(Duration::ZERO, Duration::ZERO),
        }
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// Worth retrying (network error, timeout, overloaded peer).
    Transient(E),

    /// Explicit rejection; retrying cannot help.
    Terminal(E),
}

/// Terminal result of a retried action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Succeeded { value: T, attempts: u32 },

    /// An attempt was rejected terminally.
    Rejected { error: E, attempts: u32 },

    /// Every attempt failed transiently.
    Exhausted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts made before reaching this outcome.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Rejected { attempts, .. }
            | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Returns true if the action succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Run `op` under `policy` until it succeeds, is rejected, or runs out of
/// attempts. `op` receives the 1-based attempt number.
pub async fn retry_with_policy<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                }
            }
            Err(AttemptError::Terminal(error)) => {
                return RetryOutcome::Rejected {
                    error,
                    attempts: attempt,
                }
            }
            Err(AttemptError::Transient(error)) => {
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }

                let delay = policy.backoff.delay(attempt - 1);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Default number of attempts per action.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Default maximum backoff delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);
