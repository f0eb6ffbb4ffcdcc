//! Count-based sliding-window circuit breaker.
//!
//! `CLOSED → OPEN` when the failure rate over the last `window_size`
//! outcomes crosses the threshold (once at least `min_samples` outcomes
//! exist). After `cool_down` the breaker admits a limited number of probe
//! calls in `HALF_OPEN`; any probe failure reopens it, `half_open_probes`
//! consecutive probe successes close it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub window_size: usize,
    pub failure_rate_threshold: f64,
    /// Outcomes required in the window before the threshold can trip.
    pub min_samples: usize,
    pub cool_down: Duration,
    /// Probe calls admitted while half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_rate_threshold: 0.5,
            min_samples: 10,
            cool_down: Duration::from_secs(30),
            half_open_probes: 3,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Recent outcomes, `true` = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_admitted: u32,
    probe_successes: u32,
}

#[derive(Debug)]
pub struct Breaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probes_admitted: 0,
                probe_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Returns whether a call may proceed. An `Open` breaker whose
    /// cool-down has elapsed moves to `HalfOpen` and admits the caller as
    /// a probe.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.cool_down);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.probes_admitted = 1;
                    inner.probe_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_admitted < self.config.half_open_probes {
                    inner.probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => self.push_outcome(&mut inner, false),
            BreakerState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.half_open_probes {
                    inner.state = BreakerState::Closed;
                    inner.window.clear();
                    inner.opened_at = None;
                }
            }
            // A late result after the breaker opened carries no information.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                self.push_outcome(&mut inner, true);
                if self.should_trip(&inner) {
                    Self::open(&mut inner);
                }
            }
            BreakerState::HalfOpen => Self::open(&mut inner),
            BreakerState::Open => {}
        }
    }

    fn open(inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probes_admitted = 0;
        inner.probe_successes = 0;
    }

    fn push_outcome(&self, inner: &mut Inner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.window_size {
            inner.window.pop_front();
        }
    }

    fn should_trip(&self, inner: &Inner) -> bool {
        if inner.window.len() < self.config.min_samples {
            return false;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        failures as f64 / inner.window.len() as f64 >= self.config.failure_rate_threshold
    }
}
