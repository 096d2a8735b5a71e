//! The request dispatcher: the hot path tying every collaborator together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::json;

use crate::core::composite::{execute_composite, CompositeBackend};
use crate::core::dry_run::{execute_dry_run, DryRunLeg};
use crate::core::module::GatewayModule;
use crate::core::rewriter::{apply_header_rules, effective_header_rewriting, matched_endpoint, resolve_hostname, rewrite_path};
use crate::core::route_resolver::{resolve_route, ResolvedTarget};
use crate::core::transport::{forward, ForwardRequest, ForwardResponse};
use crate::model::error::GatewayError;
use crate::model::event::{EventType, GatewayEvent};
use crate::model::route::{BackendConfig, GlobalConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DispatchContext {
    pub remote_addr: String,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Runs one request through the full contract: tenant extraction, route
/// resolution, feature-flag gating, dry-run/composite branching, the
/// circuit-guarded dispatch, and cache population.
pub async fn dispatch(module: &Arc<GatewayModule>, ctx: DispatchContext) -> Result<ForwardResponse, GatewayError> {
    module.subject.notify(GatewayEvent::new(
        EventType::RequestReceived,
        "dispatcher",
        json!({ "method": ctx.method.as_str(), "path": ctx.path, "remoteAddr": ctx.remote_addr }),
    ));

    let global = module.effective_config(None).await;
    let tenant_id = extract_tenant(&ctx.headers, &global)?;
    let effective = module.effective_config(tenant_id.as_deref()).await;

    let resolved = resolve_route(&effective, &ctx.path).ok_or_else(|| GatewayError::RouteNotFound {
        path: ctx.path.clone(),
    })?;

    let result = match resolved {
        ResolvedTarget::Composite { composite, .. } => {
            dispatch_composite(module, &effective, tenant_id.as_deref(), &ctx, composite).await
        }
        ResolvedTarget::Backend { spec, route_config, .. } => {
            let backend_id = select_backend(module, &spec).await;
            dispatch_backend(module, &effective, tenant_id.as_deref(), &ctx, backend_id, route_config).await
        }
        ResolvedTarget::Default { backend } => {
            dispatch_backend(module, &effective, tenant_id.as_deref(), &ctx, backend, None).await
        }
    };

    match &result {
        Ok(response) if response.status < 400 => {
            module.subject.notify(GatewayEvent::new(
                EventType::RequestProxied,
                "dispatcher",
                json!({ "path": ctx.path, "status": response.status }),
            ));
        }
        Ok(response) => {
            module.subject.notify(GatewayEvent::new(
                EventType::RequestFailed,
                "dispatcher",
                json!({ "path": ctx.path, "status": response.status }),
            ));
        }
        Err(error) => {
            module.subject.notify(GatewayEvent::new(
                EventType::RequestFailed,
                "dispatcher",
                json!({ "path": ctx.path, "error": error.to_string() }),
            ));
        }
    }

    result
}

fn extract_tenant(headers: &HeaderMap, global: &GlobalConfig) -> Result<Option<String>, GatewayError> {
    let value = headers
        .get(&global.tenant_header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if value.is_none() && global.require_tenant {
        return Err(GatewayError::MissingTenantHeader {
            header: global.tenant_header.clone(),
        });
    }
    Ok(value)
}

async fn select_backend(module: &Arc<GatewayModule>, spec: &crate::model::route::BackendSpec) -> String {
    let members = spec.members();
    if members.len() == 1 {
        return members[0].clone();
    }

    let group_key = members.join(",");
    let selection = module.load_balancer.select(&group_key, members).await;
    module.subject.notify(GatewayEvent::new(
        EventType::LoadBalanceDecision,
        "load_balancer",
        json!({ "group": group_key, "backend": selection.backend, "index": selection.index, "total": selection.total }),
    ));
    module.subject.notify(GatewayEvent::new(
        EventType::LoadBalanceRoundRobin,
        "load_balancer",
        json!({ "group": group_key, "backend": selection.backend, "index": selection.index, "total": selection.total }),
    ));
    selection.backend
}

async fn dispatch_composite(
    module: &Arc<GatewayModule>,
    effective: &GlobalConfig,
    tenant_id: Option<&str>,
    ctx: &DispatchContext,
    composite: crate::model::route::CompositeRoute,
) -> Result<ForwardResponse, GatewayError> {
    if let Some(flag_id) = &composite.feature_flag_id {
        let aggregator = module.flag_aggregator().await;
        let enabled = aggregator.evaluate(flag_id, tenant_id.unwrap_or(""), true, &module.subject).await;
        if !enabled {
            return match &composite.alternative_backend {
                Some(alternative) => {
                    dispatch_backend(module, effective, tenant_id, ctx, alternative.clone(), None).await
                }
                None => Err(GatewayError::FeatureDisabled {
                    flag_id: flag_id.clone(),
                }),
            };
        }
    }

    let mut backends = HashMap::new();
    for backend_id in &composite.backends {
        let url = effective
            .backends
            .get(backend_id)
            .ok_or_else(|| GatewayError::BackendUnknown {
                id: backend_id.clone(),
            })?
            .clone();
        let circuit_breaker = module.circuit_breaker_for(backend_id, effective).await;
        backends.insert(backend_id.clone(), CompositeBackend { url, circuit_breaker });
    }

    let template = ForwardRequest {
        method: ctx.method.clone(),
        url: format!("http://composite{}", ctx.path),
        headers: ctx.headers.clone(),
        body: ctx.body.clone(),
    };

    let timeout = effective_timeout(None, effective);
    let (status, body) = execute_composite(&composite, &backends, &module.client, &template, timeout).await?;

    Ok(ForwardResponse {
        status,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: serde_json::to_vec(&body).unwrap_or_default(),
    })
}

async fn dispatch_backend(
    module: &Arc<GatewayModule>,
    effective: &GlobalConfig,
    tenant_id: Option<&str>,
    ctx: &DispatchContext,
    mut backend_id: String,
    route_config: Option<crate::model::route::RouteConfig>,
) -> Result<ForwardResponse, GatewayError> {
    if let Some(route_config) = &route_config {
        if let Some(flag_id) = &route_config.feature_flag_id {
            backend_id = gate_feature(module, tenant_id, flag_id, route_config.alternative_backend.as_deref(), backend_id).await?;
        }
    }

    let backend_config = effective.backend_configs.get(&backend_id).cloned().unwrap_or_else(|| BackendConfig {
        url: effective.backends.get(&backend_id).cloned().unwrap_or_default(),
        ..Default::default()
    });

    let backend_id = if let Some(flag_id) = &backend_config.feature_flag_id {
        gate_feature(
            module,
            tenant_id,
            flag_id,
            backend_config.alternative_backend.as_deref(),
            backend_id,
        )
        .await?
    } else {
        backend_id
    };

    let backend_config = effective.backend_configs.get(&backend_id).cloned().unwrap_or_else(|| BackendConfig {
        url: effective.backends.get(&backend_id).cloned().unwrap_or_default(),
        ..Default::default()
    });
    let backend_url = effective
        .backends
        .get(&backend_id)
        .cloned()
        .unwrap_or_else(|| backend_config.url.clone());

    let tenant = tenant_id.unwrap_or("");
    if ctx.method == Method::GET && effective.cache.enabled {
        let key = crate::core::cache::ResponseCache::cache_key(&backend_id, tenant, ctx.method.as_str(), &ctx.path);
        if let Some(cached) = module.cache.get(&key).await {
            let mut headers = cached.headers;
            headers.push(("X-Cache".to_string(), "HIT".to_string()));
            return Ok(ForwardResponse {
                status: cached.status,
                headers,
                body: cached.body,
            });
        }
    }

    if let Some(route_config) = &route_config {
        if let Some(dry_run) = &route_config.dry_run {
            if dry_run.enabled {
                return run_dry_run(module, effective, ctx, &backend_id, &backend_url, dry_run).await;
            }
        }
    }

    let timeout = effective_timeout(route_config.as_ref().and_then(|r| r.timeout_ms), effective);
    module.health_table.record_recent_request(&backend_id).await;

    let rewritten_path = rewrite_path(&backend_config, &ctx.path);
    let endpoint_id = matched_endpoint(&backend_config, &ctx.path).map(|e| e.id.clone());
    let headers = build_outbound_headers(&backend_config, endpoint_id.as_deref(), &ctx.headers, &backend_url);

    let request = ForwardRequest {
        method: ctx.method.clone(),
        url: format!("{}{}", backend_url.trim_end_matches('/'), rewritten_path),
        headers,
        body: ctx.body.clone(),
    };

    let circuit_breaker = module.circuit_breaker_for(&backend_id, effective).await;
    let response = forward(&module.client, &circuit_breaker, &backend_id, request, timeout).await?;

    if ctx.method == Method::GET && effective.cache.enabled && response.status == 200 {
        let key = crate::core::cache::ResponseCache::cache_key(&backend_id, tenant, ctx.method.as_str(), &ctx.path);
        module
            .cache
            .insert(
                key,
                response.status,
                response.headers.clone(),
                response.body.clone(),
                Duration::from_millis(effective.cache.ttl_ms),
            )
            .await;
        let mut headers = response.headers;
        headers.push(("X-Cache".to_string(), "MISS".to_string()));
        return Ok(ForwardResponse {
            status: response.status,
            headers,
            body: response.body,
        });
    }

    Ok(response)
}

async fn gate_feature(
    module: &Arc<GatewayModule>,
    tenant_id: Option<&str>,
    flag_id: &str,
    alternative_backend: Option<&str>,
    current_backend: String,
) -> Result<String, GatewayError> {
    let aggregator = module.flag_aggregator().await;
    let enabled = aggregator.evaluate(flag_id, tenant_id.unwrap_or(""), true, &module.subject).await;
    if enabled {
        return Ok(current_backend);
    }
    match alternative_backend {
        Some(alternative) => Ok(alternative.to_string()),
        None => Err(GatewayError::FeatureDisabled {
            flag_id: flag_id.to_string(),
        }),
    }
}

fn effective_timeout(route_timeout_ms: Option<u64>, effective: &GlobalConfig) -> Duration {
    route_timeout_ms
        .or(effective.global_timeout_ms)
        .or(effective.request_timeout_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT)
}

fn build_outbound_headers(
    backend_config: &BackendConfig,
    endpoint_id: Option<&str>,
    original: &HeaderMap,
    backend_url: &str,
) -> HeaderMap {
    let mut pairs: Vec<(String, String)> = original
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();

    if let Some(rules) = effective_header_rewriting(backend_config, endpoint_id) {
        apply_header_rules(rules, &mut pairs);
    }

    let client_host = original
        .get(reqwest::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let backend_host = reqwest::Url::parse(backend_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let host = resolve_hostname(backend_config.header_rewriting.as_ref(), client_host, &backend_host).to_string();
    pairs.retain(|(name, _)| !name.eq_ignore_ascii_case("host"));
    if !host.is_empty() {
        pairs.push(("Host".to_string(), host));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

async fn run_dry_run(
    module: &Arc<GatewayModule>,
    effective: &GlobalConfig,
    ctx: &DispatchContext,
    primary_backend: &str,
    primary_url: &str,
    dry_run: &crate::model::route::DryRunRouteConfig,
) -> Result<ForwardResponse, GatewayError> {
    let secondary_backend = dry_run.dry_run_backend.clone().ok_or_else(|| GatewayError::Validation {
        message: "dryRun requires a dryRunBackend".into(),
    })?;
    let secondary_url = effective
        .backends
        .get(&secondary_backend)
        .cloned()
        .ok_or_else(|| GatewayError::BackendUnknown {
            id: secondary_backend.clone(),
        })?;

    let primary_breaker = module.circuit_breaker_for(primary_backend, effective).await;
    let secondary_breaker = module.circuit_breaker_for(&secondary_backend, effective).await;

    let request = ForwardRequest {
        method: ctx.method.clone(),
        url: format!("{}{}", primary_url.trim_end_matches('/'), ctx.path),
        headers: ctx.headers.clone(),
        body: ctx.body.clone(),
    };

    execute_dry_run(
        ctx.path.clone(),
        DryRunLeg {
            backend: primary_backend.to_string(),
            url: primary_url.to_string(),
            circuit_breaker: primary_breaker,
        },
        DryRunLeg {
            backend: secondary_backend,
            url: secondary_url,
            circuit_breaker: secondary_breaker,
        },
        effective.dry_run.default_response_backend,
        module.client.clone(),
        request,
        effective_timeout(None, effective),
        module.subject.clone(),
    )
    .await
}
