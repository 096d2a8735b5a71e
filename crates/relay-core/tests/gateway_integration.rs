//! End-to-end tests driving the full dispatch path through a real actix
//! app, against real upstream servers bound to ephemeral ports.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App, HttpResponse};
use relay_core::core::events::NullSubject;
use relay_core::core::module::GatewayModule;
use relay_core::http::debug::configure_debug;
use relay_core::http::proxy::configure_proxy;
use relay_core::model::route::{
    BackendSpec, CircuitBreakerConfig, DebugEndpointsConfig, GlobalConfig, HealthCheckConfig,
};

/// Starts a real actix-web server on an ephemeral port and returns its
/// base URL. The server is dropped (and stops accepting) when the
/// returned handle is dropped.
fn spawn_backend(status: u16, body: serde_json::Value) -> (String, actix_web::dev::ServerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = actix_web::HttpServer::new(move || {
        let status = status;
        let body = body.clone();
        App::new().default_service(web::route().to(move || {
            let status = status;
            let body = body.clone();
            async move {
                HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap()).json(body)
            }
        }))
    })
    .listen(listener)
    .unwrap()
    .run();

    let handle = server.handle();
    tokio::spawn(server);
    (format!("http://{addr}"), handle)
}

fn spawn_counting_backend() -> (String, actix_web::dev::ServerHandle, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();

    let server = actix_web::HttpServer::new(move || {
        let count = count_clone.clone();
        App::new().default_service(web::route().to(move || {
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                HttpResponse::Ok().json(serde_json::json!({ "hits": count.load(Ordering::SeqCst) }))
            }
        }))
    })
    .listen(listener)
    .unwrap()
    .run();

    let handle = server.handle();
    tokio::spawn(server);
    (format!("http://{addr}"), handle, count)
}

fn base_config() -> GlobalConfig {
    let mut config = GlobalConfig::default();
    config.health_check = HealthCheckConfig {
        enabled: false,
        ..HealthCheckConfig::default()
    };
    config
}

#[actix_web::test]
async fn requires_tenant_header_when_configured() {
    let (backend_url, _handle) = spawn_backend(200, serde_json::json!({ "ok": true }));
    let mut config = base_config();
    config.backends.insert("a".into(), backend_url);
    config.routes.insert("/api/*".into(), BackendSpec::Single("a".into()));
    config.require_tenant = true;

    let module = GatewayModule::new(config, Arc::new(NullSubject));
    module.init().await.unwrap();
    module.start(vec![]).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(module.clone()))
            .configure(configure_proxy),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/widgets").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::get()
        .uri("/api/widgets")
        .insert_header(("X-Tenant-ID", "acme"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn cache_serves_hit_on_second_get_without_reaching_backend() {
    let (backend_url, _handle, hits) = spawn_counting_backend();
    let mut config = base_config();
    config.backends.insert("a".into(), backend_url);
    config.routes.insert("/widgets".into(), BackendSpec::Single("a".into()));
    config.cache.enabled = true;
    config.cache.ttl_ms = 60_000;

    let module = GatewayModule::new(config, Arc::new(NullSubject));
    module.init().await.unwrap();
    module.start(vec![]).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(module.clone()))
            .configure(configure_proxy),
    )
    .await;

    let req = test::TestRequest::get().uri("/widgets").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("X-Cache").unwrap(), "MISS");

    let req = test::TestRequest::get().uri("/widgets").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("X-Cache").unwrap(), "HIT");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn circuit_breaker_opens_after_repeated_connection_failures() {
    // Bind and immediately drop the listener so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = base_config();
    config
        .backends
        .insert("a".into(), format!("http://{dead_addr}"));
    config.routes.insert("/x".into(), BackendSpec::Single("a".into()));
    config.circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 2,
        success_threshold: 1,
        open_timeout_ms: 30_000,
        half_open_allowed_requests: 1,
    };

    let module = GatewayModule::new(config, Arc::new(NullSubject));
    module.init().await.unwrap();
    module.start(vec![]).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(module.clone()))
            .configure(configure_proxy),
    )
    .await;

    for _ in 0..2 {
        let req = test::TestRequest::get().uri("/x").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 502);
    }

    let req = test::TestRequest::get().uri("/x").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    let body = test::read_body(resp).await;
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "CIRCUIT_OPEN");
}

#[actix_web::test]
async fn feature_disabled_route_without_alternative_returns_503() {
    let (backend_url, _handle) = spawn_backend(200, serde_json::json!({ "ok": true }));
    let mut config = base_config();
    config.backends.insert("a".into(), backend_url);
    config.routes.insert("/flagged".into(), BackendSpec::Single("a".into()));
    config.route_configs.insert(
        "/flagged".into(),
        relay_core::model::route::RouteConfig {
            feature_flag_id: Some("new-checkout".into()),
            alternative_backend: None,
            timeout_ms: None,
            dry_run: None,
        },
    );
    config.feature_flags.defaults.insert("new-checkout".into(), false);

    let module = GatewayModule::new(config, Arc::new(NullSubject));
    module.init().await.unwrap();
    module.start(vec![]).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(module.clone()))
            .configure(configure_proxy),
    )
    .await;

    let req = test::TestRequest::get().uri("/flagged").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    let body = test::read_body(resp).await;
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "FEATURE_DISABLED");
}

#[actix_web::test]
async fn debug_endpoints_enforce_bearer_auth() {
    let mut config = base_config();
    config.backends.insert("a".into(), "http://127.0.0.1:1".into());
    config.debug_endpoints = DebugEndpointsConfig {
        enabled: true,
        base_path: "/debug".into(),
        require_auth: true,
        token: Some("secret-token".into()),
    };

    let module = GatewayModule::new(config, Arc::new(NullSubject));
    module.init().await.unwrap();
    module.start(vec![]).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(module.clone()))
            .configure(|cfg| configure_debug(cfg, "/debug")),
    )
    .await;

    let req = test::TestRequest::get().uri("/debug/info").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/debug/info")
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::get()
        .uri("/debug/info")
        .insert_header(("Authorization", "Bearer secret-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn module_stop_drains_background_tasks() {
    let (backend_url, _handle) = spawn_backend(200, serde_json::json!({ "ok": true }));
    let mut config = base_config();
    config.backends.insert("a".into(), backend_url);

    let module = GatewayModule::new(config, Arc::new(NullSubject));
    module.init().await.unwrap();
    module.start(vec![]).await;
    module.stop(Duration::from_secs(2)).await;

    assert_eq!(module.state(), relay_core::core::module::ModuleState::Stopped);
}
