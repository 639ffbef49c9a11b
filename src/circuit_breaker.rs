use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Breaker type held per registered adapter.
pub type AdapterBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Consecutive failures that open an adapter's circuit.
pub const FAILURE_THRESHOLD: u32 = 5;

/// Creates the circuit breaker guarding one intelligence source.
///
/// After `FAILURE_THRESHOLD` consecutive counted failures the source is
/// skipped (calls come back `Unavailable`) for an exponentially growing
/// window between 10s and 60s, then a single probe call is let through.
///
/// Which failures count is decided by the caller through
/// `call_with`; see `AdapterError::trips_breaker`.
pub fn create_adapter_circuit_breaker() -> AdapterBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
    let failure_policy = failure_policy::consecutive_failures(FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AdapterError;
    use failsafe::{CircuitBreaker, Error};

    fn fail_with(cb: &AdapterBreaker, err: AdapterError) -> Result<(), Error<AdapterError>> {
        cb.call_with(|e: &AdapterError| e.trips_breaker(), || Err::<(), _>(err))
    }

    #[test]
    fn test_transport_failures_open_the_circuit() {
        let cb = create_adapter_circuit_breaker();

        for _ in 0..FAILURE_THRESHOLD {
            assert!(cb.is_call_permitted());
            let _ = fail_with(&cb, AdapterError::transport("connection refused"));
        }

        assert!(!cb.is_call_permitted());
        let result = cb.call(|| Ok::<u8, AdapterError>(1));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn test_malformed_input_keeps_the_circuit_closed() {
        let cb = create_adapter_circuit_breaker();

        for _ in 0..FAILURE_THRESHOLD * 2 {
            let result = fail_with(
                &cb,
                AdapterError::MalformedInput {
                    reason: "not a phone number".to_string(),
                    suggestion: None,
                },
            );
            assert!(matches!(result, Err(Error::Inner(_))));
        }

        assert!(cb.is_call_permitted());
    }
}
