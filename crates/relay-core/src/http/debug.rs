//! Read-only introspection endpoints: `/info`, `/backends`, `/flags`,
//! `/circuit-breakers`, `/health-checks`, gated by an optional bearer token.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::core::module::GatewayModule;

pub fn configure_debug(cfg: &mut web::ServiceConfig, base_path: &str) {
    cfg.service(
        web::scope(base_path)
            .route("/info", web::get().to(info))
            .route("/backends", web::get().to(backends))
            .route("/flags", web::get().to(flags))
            .route("/circuit-breakers", web::get().to(circuit_breakers))
            .route("/health-checks", web::get().to(health_checks)),
    );
}

fn check_auth(req: &HttpRequest, module: &GatewayModule, config: &crate::model::route::GlobalConfig) -> Option<HttpResponse> {
    let _ = module;
    if !config.debug_endpoints.require_auth {
        return None;
    }

    let Some(expected) = &config.debug_endpoints.token else {
        return None;
    };

    let Some(header) = req.headers().get(actix_web::http::header::AUTHORIZATION) else {
        return Some(
            HttpResponse::Unauthorized()
                .insert_header(("WWW-Authenticate", "Bearer"))
                .finish(),
        );
    };

    let Ok(header) = header.to_str() else {
        return Some(HttpResponse::Forbidden().finish());
    };

    match header.strip_prefix("Bearer ") {
        Some(token) if token == expected => None,
        _ => Some(HttpResponse::Forbidden().finish()),
    }
}

async fn info(req: HttpRequest, module: web::Data<Arc<GatewayModule>>) -> HttpResponse {
    let config = module.effective_config(None).await;
    if let Some(denied) = check_auth(&req, &module, &config) {
        return denied;
    }
    let backend_services: Vec<_> = config
        .backends
        .iter()
        .map(|(id, url)| json!({ "id": id, "url": url }))
        .collect();
    HttpResponse::Ok().json(json!({
        "state": format!("{:?}", module.state()),
        "module_name": "relay-gateway",
        "backendCount": config.backends.len(),
        "routeCount": config.routes.len() + config.composite_routes.len(),
        "backendServices": backend_services,
    }))
}

async fn backends(req: HttpRequest, module: web::Data<Arc<GatewayModule>>) -> HttpResponse {
    let config = module.effective_config(None).await;
    if let Some(denied) = check_auth(&req, &module, &config) {
        return denied;
    }
    let entries: Vec<_> = config
        .backends
        .iter()
        .map(|(id, url)| json!({ "id": id, "url": url }))
        .collect();
    HttpResponse::Ok().json(json!({ "backends": entries }))
}

async fn flags(req: HttpRequest, module: web::Data<Arc<GatewayModule>>) -> HttpResponse {
    let config = module.effective_config(None).await;
    if let Some(denied) = check_auth(&req, &module, &config) {
        return denied;
    }
    HttpResponse::Ok().json(json!({ "defaults": config.feature_flags.defaults }))
}

async fn circuit_breakers(req: HttpRequest, module: web::Data<Arc<GatewayModule>>) -> HttpResponse {
    let config = module.effective_config(None).await;
    if let Some(denied) = check_auth(&req, &module, &config) {
        return denied;
    }
    let mut entries = Vec::new();
    for backend_id in config.backends.keys() {
        let breaker = module.circuit_breaker_for(backend_id, &config).await;
        entries.push(json!({
            "backend": backend_id,
            "state": format!("{:?}", breaker.get_state()),
            "failureCount": breaker.get_failure_count(),
            "successCount": breaker.get_success_count(),
        }));
    }
    HttpResponse::Ok().json(json!({ "circuitBreakers": entries }))
}

async fn health_checks(req: HttpRequest, module: web::Data<Arc<GatewayModule>>) -> HttpResponse {
    let config = module.effective_config(None).await;
    if let Some(denied) = check_auth(&req, &module, &config) {
        return denied;
    }
    let snapshot = module.health_table.snapshot().await;
    let entries: Vec<_> = snapshot
        .iter()
        .map(|(backend, status)| {
            json!({
                "backend": backend,
                "healthy": status.healthy,
                "totalChecks": status.total_checks,
                "consecutiveFailures": status.consecutive_failures,
                "lastError": status.last_error,
            })
        })
        .collect();
    HttpResponse::Ok().json(json!({ "healthChecks": entries }))
}
