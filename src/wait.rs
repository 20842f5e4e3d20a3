//! Bounded readiness polling
//!
//! Asynchronously provisioned resources (the gateway) are waited on with a
//! fixed inter-attempt delay and a hard attempt ceiling. Exhausting the
//! ceiling ([`PollError::Timeout`], the resource might still converge later)
//! is distinguished from the resource reporting a terminal failure state
//! ([`PollError::Terminal`], it never will).

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Retry policy for a readiness wait.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Maximum number of checks before giving up.
    pub max_attempts: u32,
    /// Fixed delay between checks.
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            delay: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// Policy with no inter-attempt delay, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// What one readiness check observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    /// The resource reached the desired state.
    Ready(T),
    /// Not there yet; retry after the policy delay.
    Pending,
    /// The resource reached a terminal failure state; retrying is pointless.
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("timed out waiting for {resource} after {attempts} attempts")]
    Timeout { resource: String, attempts: u32 },

    #[error("{resource} reached a terminal failure state: {reason}")]
    Terminal { resource: String, reason: String },

    /// The check itself failed (control plane unreachable, etc.).
    #[error(transparent)]
    Check(#[from] anyhow::Error),
}

/// Poll `check` until it reports ready, at most `policy.max_attempts` times
/// with `policy.delay` between attempts.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    resource: &str,
    check: F,
) -> Result<T, PollError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<PollState<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        match check().await? {
            PollState::Ready(value) => {
                debug!(resource = %resource, attempt, "Resource ready");
                return Ok(value);
            }
            PollState::Failed(reason) => {
                return Err(PollError::Terminal {
                    resource: resource.to_string(),
                    reason,
                });
            }
            PollState::Pending => {
                debug!(
                    resource = %resource,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Resource not ready, retrying"
                );
                if attempt < policy.max_attempts && !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    Err(PollError::Timeout {
        resource: resource.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_value_once_ready() {
        let calls = AtomicU32::new(0);
        let result = poll_until(PollPolicy::immediate(5), "gateway", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n >= 3 {
                PollState::Ready("READY")
            } else {
                PollState::Pending
            })
        })
        .await
        .unwrap();

        assert_eq!(result, "READY");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_after_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = poll_until(PollPolicy::immediate(20), "gateway", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(PollState::<()>::Pending)
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 20);
        match err {
            PollError::Timeout { attempts, .. } => assert_eq!(attempts, 20),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn terminal_state_is_distinct_from_timeout() {
        let err = poll_until(PollPolicy::immediate(5), "gateway", || async {
            Ok(PollState::<()>::Failed("status FAILED".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PollError::Terminal { .. }));
        assert!(err.to_string().contains("status FAILED"));
    }

    #[tokio::test]
    async fn check_errors_propagate() {
        let err = poll_until(PollPolicy::immediate(5), "gateway", || async {
            anyhow::bail!("control plane unreachable")
        })
        .await
        .map(|_: ()| ())
        .unwrap_err();

        assert!(matches!(err, PollError::Check(_)));
    }
}
