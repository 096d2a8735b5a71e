use chrono::{DateTime, Utc};
use serde_json::Value;

/// The exhaustive vocabulary of events the engine emits.
///
/// Variant names match the emitted `type` field verbatim so a `Subject`
/// implementation (a log sink, a metrics exporter, a broadcast channel for
/// the debug endpoints) never has to special-case string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ConfigLoaded,
    ConfigValidated,
    ProxyCreated,
    ProxyStarted,
    ProxyStopped,
    ModuleStarted,
    ModuleStopped,
    RequestReceived,
    RequestProxied,
    RequestFailed,
    RequestProcessed,
    DryRunComparison,
    BackendHealthy,
    BackendUnhealthy,
    BackendAdded,
    BackendRemoved,
    LoadBalanceDecision,
    LoadBalanceRoundRobin,
    CircuitBreakerOpen,
    CircuitBreakerClosed,
    CircuitBreakerHalfOpen,
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ConfigLoaded => "config.loaded",
            EventType::ConfigValidated => "config.validated",
            EventType::ProxyCreated => "proxy.created",
            EventType::ProxyStarted => "proxy.started",
            EventType::ProxyStopped => "proxy.stopped",
            EventType::ModuleStarted => "module.started",
            EventType::ModuleStopped => "module.stopped",
            EventType::RequestReceived => "request.received",
            EventType::RequestProxied => "request.proxied",
            EventType::RequestFailed => "request.failed",
            EventType::RequestProcessed => "request.processed",
            EventType::DryRunComparison => "dry_run.comparison",
            EventType::BackendHealthy => "backend.healthy",
            EventType::BackendUnhealthy => "backend.unhealthy",
            EventType::BackendAdded => "backend.added",
            EventType::BackendRemoved => "backend.removed",
            EventType::LoadBalanceDecision => "load_balance.decision",
            EventType::LoadBalanceRoundRobin => "load_balance.round_robin",
            EventType::CircuitBreakerOpen => "circuit_breaker.open",
            EventType::CircuitBreakerClosed => "circuit_breaker.closed",
            EventType::CircuitBreakerHalfOpen => "circuit_breaker.half_open",
            EventType::Error => "error",
        }
    }
}

/// A single typed event carrying a free-form JSON payload.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub event_type: EventType,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub data: Value,
}

impl GatewayEvent {
    pub fn new(event_type: EventType, source: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            source: source.into(),
            occurred_at: Utc::now(),
            data,
        }
    }
}
