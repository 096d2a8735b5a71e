//! Per-backend circuit breaker: closed/open/half-open gate on dispatches.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde_json::json;
use tokio::sync::{RwLock, Semaphore};

use crate::core::events::Subject;
use crate::model::event::{EventType, GatewayEvent};
use crate::model::route::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// One breaker per backend. Breakers never share counters; isolation is a
/// consequence of each backend owning its own instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    opened_at: RwLock<Option<Instant>>,
    half_open_permits: Semaphore,
    backend: String,
    subject: Arc<dyn Subject>,
}

impl CircuitBreaker {
    pub fn new(backend: String, config: CircuitBreakerConfig, subject: Arc<dyn Subject>) -> Arc<Self> {
        let half_open_allowed = config.half_open_allowed_requests.max(1) as usize;
        Arc::new(Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            opened_at: RwLock::new(None),
            half_open_permits: Semaphore::new(half_open_allowed),
            backend,
            subject,
        })
    }

    /// Executes `operation` under the breaker's gate. `is_failure` classifies
    /// the `Ok` result (e.g. status >= 500 counts as a failure even though
    /// the value is passed through unchanged to the caller).
    pub async fn call<F, T, E>(
        &self,
        operation: F,
        is_failure: impl FnOnce(&T) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return operation.await.map_err(CircuitBreakerError::OperationFailed);
        }

        if self.is_open().await {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        let half_open_permit = if self.get_state() == CircuitState::HalfOpen {
            match self.half_open_permits.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(CircuitBreakerError::CircuitOpen),
            }
        } else {
            None
        };

        let result = operation.await;
        drop(half_open_permit);

        match &result {
            Ok(value) if !is_failure(value) => self.on_success().await,
            _ => self.on_failure().await,
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    async fn is_open(&self) -> bool {
        match self.get_state() {
            CircuitState::Open => {
                let opened_at = *self.opened_at.read().await;
                let timeout = Duration::from_millis(self.config.open_timeout_ms);
                if opened_at.is_some_and(|t| t.elapsed() >= timeout) {
                    self.transition_to_half_open().await;
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    async fn on_success(&self) {
        match self.get_state() {
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed().await;
                }
            }
            _ => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
        }
    }

    async fn on_failure(&self) {
        match self.get_state() {
            CircuitState::HalfOpen => {
                self.transition_to_open().await;
            }
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open().await;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        *self.opened_at.write().await = Some(Instant::now());
        self.success_count.store(0, Ordering::SeqCst);
        warn!(
            "circuit_breaker '{}' opened (threshold={})",
            self.backend, self.config.failure_threshold
        );
        self.subject.notify(GatewayEvent::new(
            EventType::CircuitBreakerOpen,
            "circuit_breaker",
            json!({ "backend": self.backend, "failureCount": self.get_failure_count() }),
        ));
    }

    async fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        info!("circuit_breaker '{}' half-open", self.backend);
        self.subject.notify(GatewayEvent::new(
            EventType::CircuitBreakerHalfOpen,
            "circuit_breaker",
            json!({ "backend": self.backend }),
        ));
    }

    async fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
        info!("circuit_breaker '{}' closed", self.backend);
        self.subject.notify(GatewayEvent::new(
            EventType::CircuitBreakerClosed,
            "circuit_breaker",
            json!({ "backend": self.backend }),
        ));
    }

    pub fn get_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn get_failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn get_success_count(&self) -> u64 {
        self.success_count.load(Ordering::SeqCst)
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::NullSubject;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 2,
            success_threshold: 1,
            open_timeout_ms: 20,
            half_open_allowed_requests: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new("b1".into(), fast_config(), Arc::new(NullSubject));

        for _ in 0..2 {
            let _: Result<(), CircuitBreakerError<&str>> = cb
                .call(async { Err::<(), &str>("boom") }, |_| false)
                .await;
        }

        assert_eq!(cb.get_state(), CircuitState::Open);

        let result = cb
            .call(async { Ok::<(), &str>(()) }, |_| false)
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_then_closed_on_success() {
        let cb = CircuitBreaker::new("b1".into(), fast_config(), Arc::new(NullSubject));
        for _ in 0..2 {
            let _: Result<(), CircuitBreakerError<&str>> = cb
                .call(async { Err::<(), &str>("boom") }, |_| false)
                .await;
        }
        assert_eq!(cb.get_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let result: Result<(), CircuitBreakerError<&str>> =
            cb.call(async { Ok::<(), &str>(()) }, |_| false).await;
        assert!(result.is_ok());
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn status_failure_trips_even_on_ok() {
        let cb = CircuitBreaker::new("b1".into(), fast_config(), Arc::new(NullSubject));
        for _ in 0..2 {
            let _: Result<u16, CircuitBreakerError<&str>> =
                cb.call(async { Ok::<u16, &str>(503) }, |status| *status >= 500).await;
        }
        assert_eq!(cb.get_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn backends_are_isolated() {
        let cb1 = CircuitBreaker::new("b1".into(), fast_config(), Arc::new(NullSubject));
        let cb2 = CircuitBreaker::new("b2".into(), fast_config(), Arc::new(NullSubject));
        for _ in 0..2 {
            let _: Result<(), CircuitBreakerError<&str>> = cb1
                .call(async { Err::<(), &str>("boom") }, |_| false)
                .await;
        }
        assert_eq!(cb1.get_state(), CircuitState::Open);
        assert_eq!(cb2.get_state(), CircuitState::Closed);
    }
}
