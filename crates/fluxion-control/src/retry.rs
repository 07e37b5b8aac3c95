// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use crate::clock::{Clock, elapsed_between};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_factor() -> f64 {
    1.5
}

fn default_budget_secs() -> u64 {
    30
}

/// Exponential backoff bounded by a total time budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Total time allowed across all attempts
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,

    /// Optional hard cap on the number of attempts
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::cloud()
    }
}

impl RetryPolicy {
    /// Cloud register protocol: 1s, x1.5, 30s budget
    pub fn cloud() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            factor: default_factor(),
            budget_secs: default_budget_secs(),
            max_attempts: None,
        }
    }

    /// Host platform REST calls: 500ms, x2, three attempts
    pub fn host() -> Self {
        Self {
            initial_delay_ms: 500,
            factor: 2.0,
            budget_secs: default_budget_secs(),
            max_attempts: Some(3),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

/// Progress of one retried operation; dropped once it resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts_made: u32,
    pub elapsed: Duration,
    pub next_delay: Duration,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempts_made: 0,
            elapsed: Duration::ZERO,
            next_delay: policy.initial_delay(),
        }
    }
}

/// Failure of a retried operation
#[derive(Debug)]
pub enum RetryError<E> {
    /// The budget (time or attempts) ran out; carries the last error
    Exhausted { state: RetryState, last: E },
    /// The error was not worth retrying
    Permanent(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Permanent(last) => last,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { state, last } => write!(
                f,
                "gave up after {} attempts in {:?}: {}",
                state.attempts_made, state.elapsed, last
            ),
            Self::Permanent(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } | Self::Permanent(last) => Some(last),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy budget is spent
///
/// Each delay is capped at the remaining budget. Once a transient failure
/// happens with the budget already spent, the last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    label: &str,
    mut op: F,
    is_transient: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let started = clock.now();
    let budget = policy.budget();
    let mut state = RetryState::new(policy);

    loop {
        state.attempts_made += 1;
        match op().await {
            Ok(value) => {
                if state.attempts_made > 1 {
                    debug!(
                        "✅ [RETRY] {} succeeded on attempt {}",
                        label, state.attempts_made
                    );
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                state.elapsed = elapsed_between(started, clock.now());
                let out_of_attempts = policy
                    .max_attempts
                    .is_some_and(|max| state.attempts_made >= max);

                if state.elapsed >= budget || out_of_attempts {
                    warn!(
                        "❌ [RETRY] {} failed after {} attempts in {:?}: {}",
                        label, state.attempts_made, state.elapsed, e
                    );
                    return Err(RetryError::Exhausted { state, last: e });
                }

                let delay = state.next_delay.min(budget - state.elapsed);
                warn!(
                    "⚠️ [RETRY] {} failed (attempt {}): {}. Retrying in {:?}",
                    label, state.attempts_made, e, delay
                );
                clock.sleep(delay).await;
                // out-of-range factors fall back to the whole budget instead of panicking
                state.next_delay =
                    Duration::try_from_secs_f64(state.next_delay.as_secs_f64() * policy.factor)
                        .unwrap_or_else(|_| policy.budget());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn clock() -> FakeClock {
        FakeClock::new(Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_budget_exhaustion_follows_backoff_schedule() {
        let clock = clock();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::cloud(),
            &clock,
            "always fails",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("connection refused")
            },
            |_| true,
        )
        .await;

        // attempts at t = 0, 1, 2.5, 4.75, 8.125, 13.1875, 20.78125, 30
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 7);
        assert_eq!(sleeps[0], Duration::from_secs(1));
        assert_eq!(sleeps[1], Duration::from_millis(1500));
        assert_eq!(sleeps[2], Duration::from_millis(2250));
        assert_eq!(sleeps[6], Duration::from_micros(9_218_750));

        match result {
            Err(RetryError::Exhausted { state, last }) => {
                assert_eq!(state.attempts_made, 8);
                assert_eq!(state.elapsed, Duration::from_secs(30));
                assert_eq!(last, "connection refused");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let clock = clock();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::cloud(),
            &clock,
            "bad request",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("400")
            },
            |e| *e != "400",
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent("400"))));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let clock = clock();
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(
            &RetryPolicy::cloud(),
            &clock,
            "flaky",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("timeout") } else { Ok(n) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_millis(1500)]
        );
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let clock = clock();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::host(),
            &clock,
            "host",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("unreachable")
            },
            |_| true,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_secs(1)]
        );
        assert!(result.unwrap_err().is_exhausted());
    }

    #[tokio::test]
    async fn test_negative_factor_waits_out_the_budget() {
        let clock = clock();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            factor: -1.5,
            ..RetryPolicy::cloud()
        };

        let result: Result<(), _> = retry_with_backoff(
            &policy,
            &clock,
            "misconfigured",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("timeout")
            },
            |_| true,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(29)]
        );
        assert!(result.unwrap_err().is_exhausted());
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::cloud());
    }
}
