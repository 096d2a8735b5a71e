//! Relay gateway server entry point.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, App, HttpServer};
use log::{error, info};
use relay_core::config::settings::load_global_config;
use relay_core::core::events::{BroadcastSubject, LoggingSubject};
use relay_core::core::module::GatewayModule;
use relay_core::http::{debug::configure_debug, proxy::configure_proxy};
use relay_core::logging::configure_logger;
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config = load_global_config().unwrap_or_else(|e| {
        error!("failed to load configuration: {e}");
        std::process::exit(1);
    });

    info!("starting relay-gateway with {} backends", config.backends.len());

    let debug_config = config.debug_endpoints.clone();
    let subject: Arc<dyn relay_core::core::events::Subject> = if debug_config.enabled {
        Arc::new(BroadcastSubject::new(256))
    } else {
        Arc::new(LoggingSubject)
    };

    let module = GatewayModule::new(config, subject);
    module.init().await.unwrap_or_else(|e| {
        error!("module initialization failed: {e}");
        std::process::exit(1);
    });
    module.start(vec![]).await;

    let host = std::env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("RELAY_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    info!("binding on {host}:{port}");

    let module_data = module.clone();
    let base_path = debug_config.base_path.clone();
    let server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(actix_web::web::Data::new(module_data.clone()))
            .wrap(Logger::new(r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#))
            .wrap(actix_web::middleware::Compress::default());

        if debug_config.enabled {
            app = app.configure(|cfg| configure_debug(cfg, &base_path));
        }
        app.configure(configure_proxy)
    })
    .bind((host.as_str(), port))?
    .run();

    let result = tokio::select! {
        result = server => result,
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping server...");
            Ok(())
        }
    };

    module.stop(Duration::from_secs(10)).await;

    match &result {
        Ok(_) => info!("server stopped gracefully"),
        Err(e) => error!("server error: {e}"),
    }

    result
}
