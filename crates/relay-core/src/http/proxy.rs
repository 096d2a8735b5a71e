//! The catch-all proxy route: converts an actix request into a dispatch,
//! and a dispatch outcome back into an actix response.

use std::sync::Arc;

use actix_web::{web, Error as ActixError, HttpRequest, HttpResponse};

use crate::core::dispatcher::{dispatch, DispatchContext};
use crate::core::module::GatewayModule;

pub fn configure_proxy(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::route().to(proxy_handler));
}

async fn proxy_handler(
    req: HttpRequest,
    body: web::Bytes,
    module: web::Data<Arc<GatewayModule>>,
) -> Result<HttpResponse, ActixError> {
    let remote_addr = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let ctx = DispatchContext {
        remote_addr,
        method: to_reqwest_method(req.method()),
        path: req.path().to_string(),
        headers: to_reqwest_headers(req.headers()),
        body: body.to_vec(),
    };

    match dispatch(&module, ctx).await {
        Ok(response) => Ok(build_response(response)),
        Err(error) => Err(error.into()),
    }
}

fn to_reqwest_method(method: &actix_web::http::Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

fn to_reqwest_headers(headers: &actix_web::http::header::HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

fn build_response(response: crate::core::transport::ForwardResponse) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(response.status)
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.body(response.body)
}
