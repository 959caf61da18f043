//! Circuit breakers around every external capability.
//! closed → open after N failures in a window → half-open after a
//! cooldown with a single probe → closed on success.

use log::warn;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{EngramError, Result};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// Sliding failure window.
    pub window: Duration,
    /// How long the breaker stays open before allowing one probe.
    pub cooldown: Duration,
}

impl BreakerConfig {
    /// LLM small tier: 3 failures / 60 s, 15 s cooldown.
    pub fn llm_small() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(15),
        }
    }

    /// LLM large tier: 2 failures / 60 s, 60 s cooldown.
    pub fn llm_large() -> Self {
        Self {
            failure_threshold: 2,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }

    /// Graph store: 5 failures / 60 s, 30 s cooldown.
    pub fn store() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { failures: Vec<Instant> },
    Open { since: Instant },
    HalfOpen { probing: bool },
}

/// One breaker per dependency. `permit()` before the call,
/// `record_success()` / `record_failure()` after.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::Closed {
                failures: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        match *self.inner.lock().unwrap() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Ask to make a call. Err(CircuitOpen) while open or while another
    /// half-open probe is in flight.
    pub fn permit(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    *inner = Inner::HalfOpen { probing: true };
                    Ok(())
                } else {
                    Err(EngramError::CircuitOpen(self.name.clone()))
                }
            }
            Inner::HalfOpen { probing } => {
                if *probing {
                    Err(EngramError::CircuitOpen(self.name.clone()))
                } else {
                    *probing = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::Closed {
            failures: Vec::new(),
        };
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            Inner::Closed { failures } => {
                let now = Instant::now();
                failures.push(now);
                failures.retain(|f| now.duration_since(*f) <= self.config.window);
                if failures.len() as u32 >= self.config.failure_threshold {
                    warn!("circuit breaker '{}' opened", self.name);
                    *inner = Inner::Open { since: now };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!("circuit breaker '{}' re-opened after failed probe", self.name);
                *inner = Inner::Open {
                    since: Instant::now(),
                };
            }
            Inner::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(20),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", fast_config());
        assert!(breaker.permit().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.permit().is_err());
    }

    #[test]
    fn half_open_allows_single_probe_then_closes_on_success() {
        let breaker = CircuitBreaker::new("test", fast_config());
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.permit().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // A concurrent caller is rejected while the probe runs.
        assert!(breaker.permit().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.permit().is_ok());
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("test", fast_config());
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(breaker.permit().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
