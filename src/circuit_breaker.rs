use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Circuit breaker type guarding the history-transfer job.
pub type HistoryCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates the circuit breaker shared by every history-transfer attempt.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failed attempts trip the breaker.
/// - **Backoff**: Exponential from 10s to 60s before a trial attempt.
///
/// # States
///
/// - **CLOSED**: Transfers run normally.
/// - **OPEN**: The store keeps rejecting history writes; attempts fail fast and
///   the conversion reports `history_transferred = false`.
/// - **HALF_OPEN**: One trial transfer decides whether to close again.
///
/// A conversion never depends on this breaker; only the best-effort copy of
/// interaction history goes through it.
pub fn create_history_circuit_breaker() -> HistoryCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_history_circuit_breaker();

        // Simulate 5 consecutive failures
        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("store rejected batch"));
            assert!(result.is_err());
        }

        // Next call should be rejected (circuit is open)
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));

        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_history_circuit_breaker();

        let result: Result<usize, Error<&str>> = cb.call(|| Ok::<usize, &str>(3));

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_async_calls_share_state_with_clones() {
        let cb = create_history_circuit_breaker();
        let shared = cb.clone();

        for _ in 0..5 {
            let result = failsafe::futures::CircuitBreaker::call(&shared, async {
                Err::<(), &str>("store rejected batch")
            })
            .await;
            assert!(result.is_err());
        }

        assert!(!CircuitBreaker::is_call_permitted(&cb));
    }
}
