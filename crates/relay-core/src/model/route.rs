use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type BackendId = String;

/// A route target: either a single backend or a comma-separated group
/// load-balanced by the round-robin selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSpec {
    Single(BackendId),
    Group(Vec<BackendId>),
}

impl BackendSpec {
    pub fn members(&self) -> &[BackendId] {
        match self {
            BackendSpec::Single(id) => std::slice::from_ref(id),
            BackendSpec::Group(ids) => ids,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, BackendSpec::Group(_))
    }
}

impl<'de> Deserialize<'de> for BackendSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let members: Vec<BackendId> = raw.split(',').map(|s| s.trim().to_string()).collect();
        if members.len() == 1 {
            Ok(BackendSpec::Single(members.into_iter().next().unwrap()))
        } else {
            Ok(BackendSpec::Group(members))
        }
    }
}

impl Serialize for BackendSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.members().join(","))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostnameMode {
    PreserveOriginal,
    UseBackend,
    UseCustom,
}

impl Default for HostnameMode {
    fn default() -> Self {
        HostnameMode::PreserveOriginal
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRewriting {
    #[serde(default)]
    pub hostname_mode: HostnameMode,
    #[serde(default)]
    pub custom_hostname: Option<String>,
    #[serde(default)]
    pub set_headers: HashMap<String, String>,
    #[serde(default)]
    pub remove_headers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRewriting {
    #[serde(default)]
    pub strip_base_path: Option<String>,
    #[serde(default)]
    pub base_path_rewrite: Option<String>,
}

/// One ordered endpoint rule. `pattern` is an exact path, a `prefix/*`
/// wildcard, or a `prefix*` byte-suffix wildcard; the first rule in
/// declaration order whose pattern matches the rewritten path is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRule {
    pub id: String,
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub header_rewriting: Option<HeaderRewriting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u64,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_half_open_allowed")]
    pub half_open_allowed_requests: u64,
}

fn default_true() -> bool {
    true
}
fn default_failure_threshold() -> u64 {
    5
}
fn default_success_threshold() -> u64 {
    3
}
fn default_open_timeout_ms() -> u64 {
    30_000
}
fn default_half_open_allowed() -> u64 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
            half_open_allowed_requests: default_half_open_allowed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_hc_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_recent_request_threshold_ms")]
    pub recent_request_threshold_ms: u64,
    #[serde(default = "default_expected_status_codes")]
    pub expected_status_codes: Vec<u16>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_interval_ms() -> u64 {
    30_000
}
fn default_hc_timeout_ms() -> u64 {
    5_000
}
fn default_recent_request_threshold_ms() -> u64 {
    60_000
}
fn default_expected_status_codes() -> Vec<u16> {
    vec![200]
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval_ms(),
            timeout_ms: default_hc_timeout_ms(),
            recent_request_threshold_ms: default_recent_request_threshold_ms(),
            expected_status_codes: default_expected_status_codes(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub path_rewriting: Option<PathRewriting>,
    #[serde(default)]
    pub header_rewriting: Option<HeaderRewriting>,
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
    #[serde(default)]
    pub feature_flag_id: Option<String>,
    #[serde(default)]
    pub alternative_backend: Option<BackendId>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunRouteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub dry_run_backend: Option<BackendId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    #[serde(default)]
    pub feature_flag_id: Option<String>,
    #[serde(default)]
    pub alternative_backend: Option<BackendId>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub dry_run: Option<DryRunRouteConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    Merge,
    Join,
    Enrich,
    Flat,
    Nested,
    MapReduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapReduceMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReduceConfig {
    pub mode: MapReduceMode,
    pub source_backend: BackendId,
    #[serde(default)]
    pub target_backend: Option<BackendId>,
    pub array_path: String,
    pub extract_field: String,
    pub collect_field: String,
    #[serde(default)]
    pub join_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeRoute {
    pub pattern: String,
    pub backends: Vec<BackendId>,
    pub strategy: CompositeStrategy,
    #[serde(default)]
    pub feature_flag_id: Option<String>,
    #[serde(default)]
    pub alternative_backend: Option<BackendId>,
    #[serde(default)]
    pub join_key: Option<String>,
    #[serde(default)]
    pub filter_on_empty: bool,
    #[serde(default)]
    pub enrich_field: Option<String>,
    #[serde(default)]
    pub map_reduce: Option<MapReduceConfig>,
    #[serde(default)]
    pub allow_empty_responses: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

fn default_cache_ttl_ms() -> u64 {
    60_000
}
fn default_cache_max_size() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: default_cache_ttl_ms(),
            max_size: default_cache_max_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub defaults: HashMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DryRunSide {
    Primary,
    Secondary,
}

impl Default for DryRunSide {
    fn default() -> Self {
        DryRunSide::Primary
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub log_responses: bool,
    #[serde(default)]
    pub default_response_backend: DryRunSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEndpointsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_debug_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_debug_base_path() -> String {
    "/debug".to_string()
}

impl Default for DebugEndpointsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_path: default_debug_base_path(),
            require_auth: false,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    pub backends: HashMap<BackendId, String>,
    #[serde(default)]
    pub routes: HashMap<String, BackendSpec>,
    #[serde(default)]
    pub route_configs: HashMap<String, RouteConfig>,
    #[serde(default)]
    pub composite_routes: HashMap<String, CompositeRoute>,
    #[serde(default)]
    pub backend_configs: HashMap<BackendId, BackendConfig>,
    #[serde(default)]
    pub default_backend: Option<BackendId>,
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,
    #[serde(default)]
    pub require_tenant: bool,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub global_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub feature_flags: FeatureFlagsConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub debug_endpoints: DebugEndpointsConfig,
}

fn default_tenant_header() -> String {
    "X-Tenant-ID".to_string()
}

/// A per-tenant overlay. Every field is optional; absence means "inherit
/// the global value". Present scalars replace; present maps union with
/// the tenant's entries overriding on key collision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    #[serde(default)]
    pub backends: HashMap<BackendId, String>,
    #[serde(default)]
    pub routes: HashMap<String, BackendSpec>,
    #[serde(default)]
    pub route_configs: HashMap<String, RouteConfig>,
    #[serde(default)]
    pub composite_routes: HashMap<String, CompositeRoute>,
    #[serde(default)]
    pub backend_configs: HashMap<BackendId, BackendConfig>,
    #[serde(default)]
    pub default_backend: Option<BackendId>,
    #[serde(default)]
    pub tenant_header: Option<String>,
    #[serde(default)]
    pub require_tenant: Option<bool>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub global_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    pub feature_flags: Option<FeatureFlagsConfig>,
    #[serde(default)]
    pub dry_run: Option<DryRunConfig>,
    #[serde(default)]
    pub debug_endpoints: Option<DebugEndpointsConfig>,
}

/// Deep-merges a tenant overlay onto the global config: tenant scalars
/// replace when present, tenant maps union with tenant entries winning
/// on collision. Absent fields inherit the global value unchanged.
pub fn merge_tenant_config(global: &GlobalConfig, tenant: &TenantConfig) -> GlobalConfig {
    let mut merged = global.clone();

    for (k, v) in &tenant.backends {
        merged.backends.insert(k.clone(), v.clone());
    }
    for (k, v) in &tenant.routes {
        merged.routes.insert(k.clone(), v.clone());
    }
    for (k, v) in &tenant.route_configs {
        merged.route_configs.insert(k.clone(), v.clone());
    }
    for (k, v) in &tenant.composite_routes {
        merged.composite_routes.insert(k.clone(), v.clone());
    }
    for (k, v) in &tenant.backend_configs {
        merged.backend_configs.insert(k.clone(), v.clone());
    }

    if let Some(default_backend) = &tenant.default_backend {
        merged.default_backend = Some(default_backend.clone());
    }
    if let Some(tenant_header) = &tenant.tenant_header {
        merged.tenant_header = tenant_header.clone();
    }
    if let Some(require_tenant) = tenant.require_tenant {
        merged.require_tenant = require_tenant;
    }
    if let Some(cache) = &tenant.cache {
        merged.cache = cache.clone();
    }
    if let Some(global_timeout_ms) = tenant.global_timeout_ms {
        merged.global_timeout_ms = Some(global_timeout_ms);
    }
    if let Some(request_timeout_ms) = tenant.request_timeout_ms {
        merged.request_timeout_ms = Some(request_timeout_ms);
    }
    if let Some(circuit_breaker) = &tenant.circuit_breaker {
        merged.circuit_breaker = circuit_breaker.clone();
    }
    if let Some(health_check) = &tenant.health_check {
        merged.health_check = health_check.clone();
    }
    if let Some(feature_flags) = &tenant.feature_flags {
        merged.feature_flags = feature_flags.clone();
    }
    if let Some(dry_run) = &tenant.dry_run {
        merged.dry_run = dry_run.clone();
    }
    if let Some(debug_endpoints) = &tenant.debug_endpoints {
        merged.debug_endpoints = debug_endpoints.clone();
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_override_wins_and_untouched_keys_survive() {
        let mut global = GlobalConfig {
            tenant_header: "X-Tenant-ID".into(),
            ..Default::default()
        };
        global.backends.insert("a".into(), "http://global-a".into());
        global.backends.insert("b".into(), "http://global-b".into());

        let mut tenant = TenantConfig::default();
        tenant.backends.insert("a".into(), "http://tenant-a".into());

        let merged = merge_tenant_config(&global, &tenant);
        assert_eq!(merged.backends.get("a").unwrap(), "http://tenant-a");
        assert_eq!(merged.backends.get("b").unwrap(), "http://global-b");
    }

    #[test]
    fn backend_spec_parses_group() {
        let json = "\"a,b,c\"";
        let spec: BackendSpec = serde_json::from_str(json).unwrap();
        assert!(spec.is_group());
        assert_eq!(spec.members(), &["a", "b", "c"]);
    }

    #[test]
    fn backend_spec_parses_single() {
        let spec: BackendSpec = serde_json::from_str("\"a\"").unwrap();
        assert!(!spec.is_group());
        assert_eq!(spec.members(), &["a"]);
    }
}
