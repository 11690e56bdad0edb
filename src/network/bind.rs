use rand::Rng;
use std::io;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BindError {
    #[error("No port could be bound after {attempts} attempts (last tried {last_port})")]
    Exhausted { attempts: u32, last_port: u16 },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Bounded retry policy for binding a port that may already be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRetry {
    /// Port tried first
    pub base_port: u16,
    /// Largest distance below `base_port` a retry may land on
    pub max_backoff: u16,
    /// Total number of ports tried, including the first one
    pub max_attempts: u32,
}

impl BindRetry {
    pub fn new(base_port: u16, max_backoff: u16, max_attempts: u32) -> Self {
        Self {
            base_port,
            max_backoff,
            max_attempts,
        }
    }
}

/// Port to try on the given attempt
///
/// Attempt 0 is always the base port. Later attempts step down from the base
/// port by a random amount in `1..=max_backoff`, never wrapping below zero.
pub fn candidate_port<R: Rng + ?Sized>(policy: &BindRetry, attempt: u32, rng: &mut R) -> u16 {
    if attempt == 0 || policy.max_backoff == 0 {
        return policy.base_port;
    }

    let step = rng.gen_range(1..=policy.max_backoff);
    policy.base_port.saturating_sub(step)
}

fn is_conflict(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
    )
}

/// Run `bind` against successive candidate ports until one succeeds
///
/// Only address conflicts are retried. Any other error is returned as is.
/// Returns the bound value together with the port it was bound on.
pub fn bind_with_retry<T, R, F>(
    policy: &BindRetry,
    rng: &mut R,
    mut bind: F,
) -> Result<(T, u16), BindError>
where
    R: Rng + ?Sized,
    F: FnMut(u16) -> io::Result<T>,
{
    let mut last_port = policy.base_port;

    for attempt in 0..policy.max_attempts {
        let port = candidate_port(policy, attempt, rng);
        last_port = port;

        match bind(port) {
            Ok(bound) => {
                debug!("Bound port {} on attempt {}", port, attempt + 1);
                return Ok((bound, port));
            }
            Err(e) if is_conflict(&e) => {
                warn!("Port {} unavailable ({}), retrying", port, e);
            }
            Err(e) => return Err(BindError::IoError(e)),
        }
    }

    Err(BindError::Exhausted {
        attempts: policy.max_attempts,
        last_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn first_attempt_uses_base_port() {
        let policy = BindRetry::new(5000, 100, 10);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(candidate_port(&policy, 0, &mut rng), 5000);
    }

    #[test]
    fn retries_stay_within_backoff() {
        let policy = BindRetry::new(5000, 100, 10);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..1000 {
            let port = candidate_port(&policy, attempt, &mut rng);
            assert!((4900..5000).contains(&port), "port {} out of range", port);
        }
    }

    #[test]
    fn retries_never_wrap_below_zero() {
        let policy = BindRetry::new(3, 50, 10);
        let mut rng = StdRng::seed_from_u64(1);
        for attempt in 1..200 {
            assert!(candidate_port(&policy, attempt, &mut rng) <= 3);
        }
    }

    #[test]
    fn always_conflicting_binder_exhausts_at_ceiling() {
        let policy = BindRetry::new(10002, 50, 100);
        let mut rng = StdRng::seed_from_u64(42);
        let mut calls = 0u32;

        let result: Result<((), u16), BindError> = bind_with_retry(&policy, &mut rng, |_| {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::AddrInUse))
        });

        assert_eq!(calls, 100);
        match result {
            Err(BindError::Exhausted { attempts, last_port }) => {
                assert_eq!(attempts, 100);
                assert!((9952..10002).contains(&last_port));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn zero_attempts_fails_without_binding() {
        let policy = BindRetry::new(10002, 50, 0);
        let mut rng = StdRng::seed_from_u64(42);
        let result: Result<((), u16), BindError> =
            bind_with_retry(&policy, &mut rng, |_| panic!("must not bind"));
        assert!(matches!(result, Err(BindError::Exhausted { attempts: 0, .. })));
    }

    #[test]
    fn succeeds_after_conflicts() {
        let policy = BindRetry::new(5000, 100, 10);
        let mut rng = StdRng::seed_from_u64(3);
        let mut tried = Vec::new();

        let (value, port) = bind_with_retry(&policy, &mut rng, |port| {
            tried.push(port);
            if tried.len() < 3 {
                Err(io::Error::from(io::ErrorKind::AddrInUse))
            } else {
                Ok("bound")
            }
        })
        .unwrap();

        assert_eq!(value, "bound");
        assert_eq!(tried.len(), 3);
        assert_eq!(tried[0], 5000);
        assert_eq!(port, tried[2]);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let policy = BindRetry::new(5000, 100, 10);
        let mut rng = StdRng::seed_from_u64(3);
        let mut calls = 0;

        let result: Result<((), u16), BindError> = bind_with_retry(&policy, &mut rng, |_| {
            calls += 1;
            Err(io::Error::from(io::ErrorKind::AddrNotAvailable))
        });

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(BindError::IoError(_))));
    }
}
