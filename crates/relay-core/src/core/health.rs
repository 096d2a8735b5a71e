//! Background per-backend health probing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::core::events::Subject;
use crate::model::event::{EventType, GatewayEvent};
use crate::model::route::HealthCheckConfig;

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<Instant>,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub total_checks: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
    pub dns_resolved: bool,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            last_success: None,
            last_failure: None,
            total_checks: 0,
            consecutive_failures: 0,
            last_error: None,
            dns_resolved: true,
        }
    }
}

/// Tracks health status and "was this backend used recently" per backend,
/// shared between the dispatcher (which ticks the recent-request clock)
/// and the background checker (which reads it to skip redundant probes).
#[derive(Default)]
pub struct HealthTable {
    statuses: RwLock<HashMap<String, HealthStatus>>,
    recent_requests: RwLock<HashMap<String, Instant>>,
}

impl HealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_recent_request(&self, backend: &str) {
        self.recent_requests
            .write()
            .await
            .insert(backend.to_string(), Instant::now());
    }

    async fn recently_used(&self, backend: &str, threshold: Duration) -> bool {
        self.recent_requests
            .read()
            .await
            .get(backend)
            .is_some_and(|t| t.elapsed() < threshold)
    }

    pub async fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.statuses.read().await.clone()
    }

    pub async fn is_healthy(&self, backend: &str) -> bool {
        self.statuses
            .read()
            .await
            .get(backend)
            .map(|s| s.healthy)
            .unwrap_or(true)
    }

    async fn record_success(&self, backend: &str, subject: &dyn Subject) {
        let mut statuses = self.statuses.write().await;
        let entry = statuses.entry(backend.to_string()).or_default();
        let was_unhealthy = !entry.healthy;
        entry.healthy = true;
        entry.dns_resolved = true;
        entry.last_check = Some(Instant::now());
        entry.last_success = Some(Instant::now());
        entry.total_checks += 1;
        entry.consecutive_failures = 0;
        entry.last_error = None;
        drop(statuses);

        if was_unhealthy {
            subject.notify(GatewayEvent::new(
                EventType::BackendHealthy,
                backend,
                json!({ "backend": backend }),
            ));
        }
    }

    async fn record_failure(&self, backend: &str, error: String, status: Option<u16>, endpoint: &str, dns_resolved: bool, subject: &dyn Subject) {
        let mut statuses = self.statuses.write().await;
        let entry = statuses.entry(backend.to_string()).or_default();
        let was_healthy = entry.healthy;
        entry.healthy = false;
        entry.dns_resolved = dns_resolved;
        entry.last_check = Some(Instant::now());
        entry.last_failure = Some(Instant::now());
        entry.total_checks += 1;
        entry.consecutive_failures += 1;
        entry.last_error = Some(error.clone());
        drop(statuses);

        if was_healthy {
            subject.notify(GatewayEvent::new(
                EventType::BackendUnhealthy,
                backend,
                json!({ "backend": backend, "error": error, "status": status, "endpoint": endpoint }),
            ));
        }
    }
}

/// Runs one probing loop per backend until `shutdown` fires. Each tick:
/// skip if the backend saw a real request recently, resolve DNS, GET the
/// health endpoint (or backend root), and record the outcome.
pub async fn run_health_checker(
    backend: String,
    backend_url: String,
    config: HealthCheckConfig,
    client: reqwest::Client,
    table: Arc<HealthTable>,
    subject: Arc<dyn Subject>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    if !config.enabled {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(config.interval_ms));
    let recent_threshold = Duration::from_millis(config.recent_request_threshold_ms);
    let probe_timeout = Duration::from_millis(config.timeout_ms);
    let endpoint = config
        .endpoint
        .clone()
        .unwrap_or_else(|| backend_url.clone());

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("health checker for '{backend}' stopping");
                    return;
                }
            }
        }

        if table.recently_used(&backend, recent_threshold).await {
            continue;
        }

        probe_once(&backend, &endpoint, &config, &client, probe_timeout, &table, subject.as_ref()).await;
    }
}

async fn probe_once(
    backend: &str,
    endpoint: &str,
    config: &HealthCheckConfig,
    client: &reqwest::Client,
    probe_timeout: Duration,
    table: &HealthTable,
    subject: &dyn Subject,
) {
    let host = reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));

    let dns_resolved = match &host {
        Some(host) => tokio::net::lookup_host(format!("{host}:80"))
            .await
            .is_ok(),
        None => false,
    };

    if !dns_resolved {
        table
            .record_failure(backend, "dns resolution failed".into(), None, endpoint, false, subject)
            .await;
        return;
    }

    let result = timeout(probe_timeout, client.get(endpoint).send()).await;

    match result {
        Ok(Ok(response)) => {
            let status = response.status().as_u16();
            if config.expected_status_codes.contains(&status) {
                table.record_success(backend, subject).await;
            } else {
                table
                    .record_failure(backend, format!("unexpected status {status}"), Some(status), endpoint, true, subject)
                    .await;
            }
        }
        Ok(Err(error)) => {
            table
                .record_failure(backend, error.to_string(), None, endpoint, true, subject)
                .await;
        }
        Err(_) => {
            table
                .record_failure(backend, "probe timed out".into(), None, endpoint, true, subject)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::NullSubject;

    #[tokio::test]
    async fn unhealthy_then_healthy_transition_updates_status() {
        let table = HealthTable::new();
        let subject = NullSubject;

        table
            .record_failure("a", "boom".into(), None, "http://a", true, &subject)
            .await;
        assert!(!table.is_healthy("a").await);

        table.record_success("a", &subject).await;
        assert!(table.is_healthy("a").await);
    }

    #[tokio::test]
    async fn recent_request_suppresses_probe_window() {
        let table = HealthTable::new();
        table.record_recent_request("a").await;
        assert!(table.recently_used("a", Duration::from_secs(60)).await);
        assert!(!table.recently_used("a", Duration::from_millis(0)).await);
    }

    #[tokio::test]
    async fn default_status_is_healthy_until_probed() {
        let table = HealthTable::new();
        assert!(table.is_healthy("unknown").await);
    }
}
