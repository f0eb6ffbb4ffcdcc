//! Retry + circuit-breaker wrapper around external submission calls.
//!
//! Each external dependency registers under its own name and gets an
//! independently tracked breaker and retry policy. Status polls are never
//! routed through this module: a "not finished yet" poll is not a failure,
//! and counting it would exhaust retries or trip the breaker on perfectly
//! healthy in-progress jobs.

pub mod breaker;
pub mod retry;

use std::collections::HashMap;
use std::future::Future;

use thiserror::Error;
use tracing::warn;

use crate::render::clients::ProviderError;
use breaker::{Breaker, BreakerConfig};
use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("{dependency} is unavailable (circuit open)")]
    CircuitOpen { dependency: &'static str },

    #[error("{dependency} failed after {attempts} attempts: {source}")]
    Exhausted {
        dependency: &'static str,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("{dependency} request failed: {source}")]
    Fatal {
        dependency: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("no resilience policy registered for dependency '{0}'")]
    Unregistered(&'static str),
}

struct DependencyGuard {
    policy: RetryPolicy,
    breaker: Breaker,
}

/// Registry of per-dependency retry policies and breakers.
#[derive(Default)]
pub struct Resilience {
    dependencies: HashMap<&'static str, DependencyGuard>,
}

impl Resilience {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, policy: RetryPolicy, breaker: BreakerConfig) {
        self.dependencies.insert(
            name,
            DependencyGuard {
                policy,
                breaker: Breaker::new(breaker),
            },
        );
    }

    /// Executes `op` under `dependency`'s retry policy and breaker.
    ///
    /// An open breaker fails fast without invoking the operation. Retryable
    /// failures back off exponentially up to `max_attempts`; non-retryable
    /// failures return immediately without consuming remaining attempts.
    /// Every attempt's outcome feeds the breaker's sliding window.
    pub async fn call<T, F, Fut>(
        &self,
        dependency: &'static str,
        mut op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let guard = self
            .dependencies
            .get(dependency)
            .ok_or(ResilienceError::Unregistered(dependency))?;

        let mut attempts = 0u32;
        loop {
            if !guard.breaker.try_acquire() {
                return Err(ResilienceError::CircuitOpen { dependency });
            }

            match op().await {
                Ok(value) => {
                    guard.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    guard.breaker.record_failure();
                    attempts += 1;

                    if !err.is_retryable() {
                        return Err(ResilienceError::Fatal {
                            dependency,
                            source: err,
                        });
                    }
                    if attempts >= guard.policy.max_attempts {
                        return Err(ResilienceError::Exhausted {
                            dependency,
                            attempts,
                            source: err,
                        });
                    }

                    let delay = guard.policy.delay_for(attempts - 1);
                    warn!(
                        "{dependency} attempt {attempts} failed ({err}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::breaker::BreakerState;

    fn registry() -> Resilience {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
        };
        let mut resilience = Resilience::new();
        resilience.register("video-synthesis", policy.clone(), BreakerConfig::default());
        resilience.register("speech-synthesis", policy, BreakerConfig::default());
        resilience
    }

    fn server_error() -> ProviderError {
        ProviderError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_consumes_all_attempts() {
        let resilience = registry();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = resilience
            .call("video-synthesis", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_attempted_exactly_once() {
        let resilience = registry();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = resilience
            .call("video-synthesis", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Status {
                        status: 400,
                        message: "bad request".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ResilienceError::Fatal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let resilience = registry();
        let calls = AtomicU32::new(0);

        let result = resilience
            .call("video-synthesis", || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(server_error())
                    } else {
                        Ok("job-42".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "job-42");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let breaker = BreakerConfig {
            window_size: 4,
            failure_rate_threshold: 0.5,
            min_samples: 2,
            cool_down: Duration::from_secs(3600),
            half_open_probes: 1,
        };
        let mut resilience = Resilience::new();
        resilience.register("video-synthesis", policy, breaker);

        for _ in 0..2 {
            let _: Result<(), _> = resilience
                .call("video-synthesis", || async { Err(server_error()) })
                .await;
        }

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = resilience
            .call("video-synthesis", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0, "open breaker must not invoke the operation");
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_independent_per_dependency() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
        };
        let breaker = BreakerConfig {
            window_size: 4,
            failure_rate_threshold: 0.5,
            min_samples: 2,
            cool_down: Duration::from_secs(3600),
            half_open_probes: 1,
        };
        let mut resilience = Resilience::new();
        resilience.register("video-synthesis", policy.clone(), breaker.clone());
        resilience.register("speech-synthesis", policy, breaker);

        for _ in 0..2 {
            let _: Result<(), _> = resilience
                .call("video-synthesis", || async { Err(server_error()) })
                .await;
        }

        assert_eq!(
            resilience.dependencies["video-synthesis"].breaker.state(),
            BreakerState::Open
        );
        assert_eq!(
            resilience.dependencies["speech-synthesis"].breaker.state(),
            BreakerState::Closed
        );

        // Speech synthesis still serves calls.
        let result = resilience
            .call("speech-synthesis", || async { Ok(7u32) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unregistered_dependency_is_an_error() {
        let resilience = Resilience::new();
        let result: Result<(), _> = resilience.call("transcription", || async { Ok(()) }).await;
        assert!(matches!(result, Err(ResilienceError::Unregistered(_))));
    }
}
