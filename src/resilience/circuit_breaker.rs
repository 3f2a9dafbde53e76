use crate::resilience::clock::{system_clock, Clock};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub times_opened: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(rename = "open_timeout_ms", with = "crate::config::duration_ms")]
    pub open_timeout: Duration,
    /// Probes admitted concurrently while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold < 1 || self.success_threshold < 1 || self.half_open_max_calls < 1 {
            return Err(Error::configuration_with_context(
                "circuit breaker thresholds must be at least 1",
                ErrorContext::new().with_source("circuit_breaker"),
            ));
        }
        Ok(())
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, n: u32) -> Self {
        self.half_open_max_calls = n;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    times_opened: u64,
    /// Bumped on every state transition; permits from an older phase are stale.
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Released,
}

/// Admission handed out by [`CircuitBreaker::try_acquire`].
///
/// Report the call through [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). A permit dropped unreported (the
/// call was cancelled, or its future was dropped) gives its half-open probe
/// slot back without counting an outcome. Outcomes only apply if the breaker
/// is still in the phase that admitted the call.
#[derive(Debug)]
#[must_use = "report the call outcome through the permit"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit holds one of the half-open probe slots.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settle(Outcome::Success);
    }

    pub fn record_failure(mut self) {
        self.settle(Outcome::Failure);
    }

    /// Give the admission back uncounted.
    pub fn release(mut self) {
        self.settle(Outcome::Released);
    }

    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker.settle(self.generation, self.probe, outcome);
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        self.settle(Outcome::Released);
    }
}

/// Circuit breaker guarding one named downstream dependency.
///
/// - Counts consecutive failures while closed
/// - Rejects fast while open
/// - Admits limited probes once the open timeout elapsed
///
/// All transitions happen under the breaker's own mutex, so breakers for
/// different resources never contend.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("cfg", &self.cfg)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, cfg, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        cfg: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            cfg,
            clock,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_in_flight: 0,
                times_opened: 0,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    // A panic while holding the lock cannot leave the counters half-updated, so
    // poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_elapsed(&self, st: &State, now: Instant) -> bool {
        st.opened_at
            .map(|at| now.saturating_duration_since(at) >= self.cfg.open_timeout)
            .unwrap_or(true)
    }

    /// Pure check: would a call be admitted right now? Does not change state.
    pub fn allow(&self) -> bool {
        let st = self.lock();
        match st.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.open_elapsed(&st, self.clock.now()),
            CircuitState::HalfOpen => st.half_open_in_flight < self.cfg.half_open_max_calls.max(1),
        }
    }

    /// Admit a call, performing OPEN -> HALF_OPEN when the open timeout elapsed.
    ///
    /// The returned [`BreakerPermit`] carries the outcome back to the breaker.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        let now = self.clock.now();
        let mut st = self.lock();
        let probe = match st.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.open_elapsed(&st, now) {
                    return Err(self.open_error(&st, now));
                }
                st.state = CircuitState::HalfOpen;
                st.consecutive_successes = 0;
                st.half_open_in_flight = 1;
                st.generation += 1;
                info!(breaker = self.name.as_str(), "circuit half-open, admitting probe");
                true
            }
            CircuitState::HalfOpen => {
                if st.half_open_in_flight >= self.cfg.half_open_max_calls.max(1) {
                    return Err(self.open_error(&st, now));
                }
                st.half_open_in_flight += 1;
                true
            }
        };
        Ok(BreakerPermit {
            breaker: self,
            generation: st.generation,
            probe,
            settled: false,
        })
    }

    fn open_error(&self, st: &State, now: Instant) -> Error {
        let retry_after_ms = st.opened_at.map(|at| {
            let until = at + self.cfg.open_timeout;
            until.saturating_duration_since(now).as_millis() as u64
        });
        Error::CircuitOpen {
            resource: self.name.clone(),
            retry_after_ms,
        }
    }

    fn trip(&self, st: &mut State, now: Instant) {
        st.state = CircuitState::Open;
        st.opened_at = Some(now);
        st.consecutive_successes = 0;
        st.half_open_in_flight = 0;
        st.times_opened = st.times_opened.saturating_add(1);
        st.generation += 1;
        warn!(
            breaker = self.name.as_str(),
            consecutive_failures = st.consecutive_failures,
            open_timeout_ms = self.cfg.open_timeout.as_millis() as u64,
            "circuit opened"
        );
    }

    fn settle(&self, generation: u64, probe: bool, outcome: Outcome) {
        let now = self.clock.now();
        let mut st = self.lock();
        if st.generation != generation {
            // Admitted before the last transition; it says nothing about the current phase.
            debug!(breaker = self.name.as_str(), ?outcome, "ignoring stale outcome");
            return;
        }
        if probe {
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
        }
        match outcome {
            Outcome::Success => self.on_success(&mut st),
            Outcome::Failure => self.on_failure(&mut st, now),
            Outcome::Released => {}
        }
    }

    /// Report a success for the current phase without a permit.
    pub fn record_success(&self) {
        let mut st = self.lock();
        self.on_success(&mut st);
    }

    /// Report a failure for the current phase without a permit.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut st = self.lock();
        self.on_failure(&mut st, now);
    }

    fn on_success(&self, st: &mut State) {
        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                st.consecutive_successes = st.consecutive_successes.saturating_add(1);
                if st.consecutive_successes >= self.cfg.success_threshold {
                    st.state = CircuitState::Closed;
                    st.consecutive_failures = 0;
                    st.consecutive_successes = 0;
                    st.opened_at = None;
                    st.half_open_in_flight = 0;
                    st.generation += 1;
                    info!(breaker = self.name.as_str(), "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, st: &mut State, now: Instant) {
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        match st.state {
            CircuitState::Closed => {
                if st.consecutive_failures >= self.cfg.failure_threshold {
                    self.trip(st, now);
                }
            }
            CircuitState::HalfOpen => self.trip(st, now),
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force the breaker back to CLOSED with cleared counters.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.consecutive_failures = 0;
        st.consecutive_successes = 0;
        st.opened_at = None;
        st.half_open_in_flight = 0;
        st.generation += 1;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = self.clock.now();
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.opened_at) {
            (CircuitState::Open, Some(at)) => {
                let until = at + self.cfg.open_timeout;
                if until > now {
                    Some((until - now).as_millis() as u64)
                } else {
                    None
                }
            }
            _ => None,
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            open_timeout_ms: self.cfg.open_timeout.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            open_remaining_ms,
            times_opened: st.times_opened,
        }
    }
}
