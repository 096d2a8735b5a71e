//! Module lifecycle and tenant registry: `Uninitialized -> Initialized ->
//! Started -> Stopped`, owning every shared collaborator the dispatcher
//! reaches into.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde_json::json;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::validation::validate_global_config;
use crate::core::cache::ResponseCache;
use crate::core::circuit_breaker::CircuitBreaker;
use crate::core::events::Subject;
use crate::core::feature_flags::{DefaultsEvaluator, FeatureFlagEvaluator, FlagAggregator};
use crate::core::health::{run_health_checker, HealthTable};
use crate::core::load_balancer::LoadBalancer;
use crate::model::error::GatewayError;
use crate::model::event::{EventType, GatewayEvent};
use crate::model::route::{merge_tenant_config, BackendId, GlobalConfig, TenantConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Uninitialized = 0,
    Initialized = 1,
    Started = 2,
    Stopped = 3,
}

impl From<u8> for ModuleState {
    fn from(value: u8) -> Self {
        match value {
            1 => ModuleState::Initialized,
            2 => ModuleState::Started,
            3 => ModuleState::Stopped,
            _ => ModuleState::Uninitialized,
        }
    }
}

/// Owns the global config, per-tenant overlays, and every per-backend
/// collaborator (circuit breaker, health status) the dispatcher needs.
/// One instance lives for the life of the gateway process.
pub struct GatewayModule {
    state: AtomicU8,
    global_config: RwLock<GlobalConfig>,
    tenant_configs: RwLock<HashMap<String, TenantConfig>>,
    circuit_breakers: RwLock<HashMap<BackendId, Arc<CircuitBreaker>>>,
    pub health_table: Arc<HealthTable>,
    pub cache: Arc<ResponseCache>,
    pub load_balancer: Arc<LoadBalancer>,
    flag_aggregator: RwLock<Arc<FlagAggregator>>,
    pub subject: Arc<dyn Subject>,
    pub client: reqwest::Client,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl GatewayModule {
    pub fn new(global_config: GlobalConfig, subject: Arc<dyn Subject>) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache_size = global_config.cache.max_size;
        Arc::new(Self {
            state: AtomicU8::new(ModuleState::Uninitialized as u8),
            global_config: RwLock::new(global_config),
            tenant_configs: RwLock::new(HashMap::new()),
            circuit_breakers: RwLock::new(HashMap::new()),
            health_table: Arc::new(HealthTable::new()),
            cache: Arc::new(ResponseCache::new(cache_size)),
            load_balancer: Arc::new(LoadBalancer::new()),
            flag_aggregator: RwLock::new(Arc::new(FlagAggregator::new(vec![]))),
            subject,
            client: reqwest::Client::new(),
            shutdown_tx,
            shutdown_rx,
            background_tasks: RwLock::new(Vec::new()),
        })
    }

    pub fn state(&self) -> ModuleState {
        ModuleState::from(self.state.load(Ordering::SeqCst))
    }

    /// Validates the configuration, builds one circuit breaker per backend,
    /// and emits `config.loaded`.
    pub async fn init(&self) -> Result<(), GatewayError> {
        let config = self.global_config.read().await.clone();

        let validation = validate_global_config(&config);
        if !validation.is_valid {
            return Err(GatewayError::Validation {
                message: validation.errors.join("; "),
            });
        }

        let mut breakers = self.circuit_breakers.write().await;
        for backend_id in config.backends.keys() {
            let breaker_config = config
                .backend_configs
                .get(backend_id)
                .and_then(|b| b.circuit_breaker.clone())
                .unwrap_or_else(|| config.circuit_breaker.clone());
            breakers
                .entry(backend_id.clone())
                .or_insert_with(|| CircuitBreaker::new(backend_id.clone(), breaker_config, self.subject.clone()));
        }
        drop(breakers);

        self.subject.notify(GatewayEvent::new(
            EventType::ConfigLoaded,
            "module",
            json!({ "backends": config.backends.len(), "routes": config.routes.len() }),
        ));

        self.state.store(ModuleState::Initialized as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Wires the feature-flag aggregator, starts one health-checker task per
    /// backend, and starts the cache sweeper.
    pub async fn start(self: &Arc<Self>, evaluators: Vec<Arc<dyn FeatureFlagEvaluator>>) {
        let config = self.global_config.read().await.clone();

        let mut all_evaluators = evaluators;
        all_evaluators.push(Arc::new(DefaultsEvaluator::new(config.feature_flags.defaults.clone())));
        *self.flag_aggregator.write().await = Arc::new(FlagAggregator::new(all_evaluators));

        let mut tasks = self.background_tasks.write().await;
        for (backend_id, url) in &config.backends {
            let health_config = config
                .backend_configs
                .get(backend_id)
                .and_then(|b| b.health_check.clone())
                .unwrap_or_else(|| config.health_check.clone());
            let handle = tokio::spawn(run_health_checker(
                backend_id.clone(),
                url.clone(),
                health_config,
                self.client.clone(),
                self.health_table.clone(),
                self.subject.clone(),
                self.shutdown_rx.clone(),
            ));
            tasks.push(handle);
        }

        let cache = self.cache.clone();
        let mut sweeper_shutdown = self.shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep().await;
                        if removed > 0 {
                            info!("cache sweep removed {removed} expired entries");
                        }
                    }
                    _ = sweeper_shutdown.changed() => {
                        if *sweeper_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
        drop(tasks);

        self.subject
            .notify(GatewayEvent::new(EventType::ModuleStarted, "module", json!({})));
        self.subject
            .notify(GatewayEvent::new(EventType::ProxyStarted, "module", json!({})));
        self.state.store(ModuleState::Started as u8, Ordering::SeqCst);
    }

    /// Signals every background task to stop and waits (best-effort, up to
    /// `drain_timeout`) for them to finish before marking the module stopped.
    pub async fn stop(&self, drain_timeout: Duration) {
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.background_tasks.write().await);
        let _ = tokio::time::timeout(drain_timeout, futures::future::join_all(tasks)).await;

        self.subject
            .notify(GatewayEvent::new(EventType::ProxyStopped, "module", json!({})));
        self.subject
            .notify(GatewayEvent::new(EventType::ModuleStopped, "module", json!({})));
        self.state.store(ModuleState::Stopped as u8, Ordering::SeqCst);
    }

    pub async fn effective_config(&self, tenant_id: Option<&str>) -> GlobalConfig {
        let global = self.global_config.read().await;
        match tenant_id {
            Some(id) => match self.tenant_configs.read().await.get(id) {
                Some(tenant) => merge_tenant_config(&global, tenant),
                None => global.clone(),
            },
            None => global.clone(),
        }
    }

    pub async fn flag_aggregator(&self) -> Arc<FlagAggregator> {
        self.flag_aggregator.read().await.clone()
    }

    /// Returns this backend's circuit breaker, creating one lazily with the
    /// effective config's settings if it was registered after `init`.
    pub async fn circuit_breaker_for(&self, backend_id: &str, config: &GlobalConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.circuit_breakers.read().await.get(backend_id) {
            return existing.clone();
        }
        let breaker_config = config
            .backend_configs
            .get(backend_id)
            .and_then(|b| b.circuit_breaker.clone())
            .unwrap_or_else(|| config.circuit_breaker.clone());
        let breaker = CircuitBreaker::new(backend_id.to_string(), breaker_config, self.subject.clone());
        self.circuit_breakers
            .write()
            .await
            .insert(backend_id.to_string(), breaker.clone());
        breaker
    }

    /// Merges a tenant overlay into the registry. Backends the overlay
    /// introduces that the global config does not already define get their
    /// own circuit breaker and a `backend.added` event.
    pub async fn add_tenant(&self, tenant_id: String, tenant_config: TenantConfig) {
        let global = self.global_config.read().await.clone();
        let mut new_backend_ids = Vec::new();
        for backend_id in tenant_config.backends.keys() {
            if !global.backends.contains_key(backend_id) {
                new_backend_ids.push(backend_id.clone());
            }
        }

        self.tenant_configs
            .write()
            .await
            .insert(tenant_id.clone(), tenant_config);

        let mut breakers = self.circuit_breakers.write().await;
        for backend_id in &new_backend_ids {
            breakers
                .entry(backend_id.clone())
                .or_insert_with(|| CircuitBreaker::new(backend_id.clone(), global.circuit_breaker.clone(), self.subject.clone()));
        }
        drop(breakers);

        for backend_id in new_backend_ids {
            self.subject.notify(GatewayEvent::new(
                EventType::BackendAdded,
                "module",
                json!({ "tenantId": tenant_id, "backend": backend_id }),
            ));
        }
    }

    /// Drops a tenant overlay. Backends it introduced are removed only if no
    /// other tenant still references them.
    pub async fn remove_tenant(&self, tenant_id: &str) {
        let mut tenants = self.tenant_configs.write().await;
        let Some(removed) = tenants.remove(tenant_id) else {
            return;
        };
        let still_referenced: std::collections::HashSet<BackendId> = tenants
            .values()
            .flat_map(|t| t.backends.keys().cloned())
            .collect();
        drop(tenants);

        let global = self.global_config.read().await;
        let orphaned: Vec<BackendId> = removed
            .backends
            .keys()
            .filter(|id| !global.backends.contains_key(*id) && !still_referenced.contains(*id))
            .cloned()
            .collect();
        drop(global);

        let mut breakers = self.circuit_breakers.write().await;
        for backend_id in &orphaned {
            breakers.remove(backend_id);
        }
        drop(breakers);

        for backend_id in orphaned {
            self.subject.notify(GatewayEvent::new(
                EventType::BackendRemoved,
                "module",
                json!({ "tenantId": tenant_id, "backend": backend_id }),
            ));
        }
    }
}
