//! A circuit breaker scoped to a single upstream (the LLM client, per the
//! design note that a single global breaker would wrongly couple unrelated
//! upstreams together).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::CircuitBreakerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: AtomicU32,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: AtomicU32::new(State::Closed as u32),
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            0 => State::Closed,
            1 => State::Open,
            _ => State::HalfOpen,
        }
    }

    fn set_state(&self, s: State) {
        self.state.store(s as u32, Ordering::SeqCst);
    }

    /// Call before attempting the upstream call. Returns `Unavailable`
    /// without touching the upstream if the breaker is open and the
    /// cooldown has not yet elapsed.
    pub fn check(&self) -> Result<(), CircuitBreakerError> {
        match self.state() {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::SeqCst);
                let elapsed = self.epoch.elapsed().as_millis() as u64 - opened_at;
                if elapsed >= self.cooldown.as_millis() as u64 {
                    self.set_state(State::HalfOpen);
                    Ok(())
                } else {
                    Err(CircuitBreakerError::Unavailable)
                }
            }
        }
    }

    pub fn record_success(&self) {
        if self.state() == State::HalfOpen {
            self.set_state(State::Closed);
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
        // Success while CLOSED intentionally does not reset the counter:
        // only a HALF_OPEN->CLOSED transition does.
    }

    pub fn record_failure(&self) {
        match self.state() {
            State::HalfOpen => self.trip(),
            State::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    self.trip();
                }
            }
            State::Open => {}
        }
    }

    fn trip(&self) {
        self.opened_at_millis
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
        self.set_state(State::Open);
    }
}
