use actix_web::HttpResponse;
use serde_json::json;

/// Every failure class the dispatcher and its collaborators can surface,
/// mapped at the edge to the client-visible HTTP behaviour.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request timeout")]
    Timeout,

    #[error("Service temporarily unavailable")]
    CircuitOpen { backend: String },

    #[error("Feature {flag_id} is disabled and no alternative backend is configured")]
    FeatureDisabled { flag_id: String },

    #[error("Upstream connection error: {message}")]
    UpstreamConnect { backend: String, message: String },

    #[error("Upstream transport error: {message}")]
    UpstreamTransport { backend: String, message: String },

    #[error("Upstream returned status {status}")]
    UpstreamStatus { backend: String, status: u16 },

    #[error("No route matches path {path}")]
    RouteNotFound { path: String },

    #[error("Header {header} is required")]
    MissingTenantHeader { header: String },

    #[error("Unknown backend: {id}")]
    BackendUnknown { id: String },

    #[error("Composite backend {backend} failed with status {status}")]
    CompositeBackendFailed { backend: String, status: u16 },

    #[error("Invalid configuration: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl actix_web::error::ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::Timeout => HttpResponse::GatewayTimeout()
                .insert_header(("X-Content-Type-Options", "nosniff"))
                .body("Request timeout"),
            GatewayError::CircuitOpen { .. } => HttpResponse::ServiceUnavailable().json(json!({
                "error": "Service temporarily unavailable",
                "code": "CIRCUIT_OPEN",
            })),
            GatewayError::FeatureDisabled { .. } => HttpResponse::ServiceUnavailable().json(json!({
                "error": self.to_string(),
                "code": "FEATURE_DISABLED",
            })),
            GatewayError::UpstreamConnect { .. } => HttpResponse::BadGateway().json(json!({
                "error": self.to_string(),
                "type": "upstream_connect",
            })),
            GatewayError::UpstreamTransport { .. } => HttpResponse::InternalServerError().json(json!({
                "error": self.to_string(),
                "type": "upstream_transport",
            })),
            GatewayError::UpstreamStatus { status, .. } => {
                actix_web::http::StatusCode::from_u16(*status)
                    .map(HttpResponse::build)
                    .unwrap_or_else(|_| HttpResponse::BadGateway())
                    .json(json!({ "error": self.to_string(), "type": "upstream_status" }))
            }
            GatewayError::RouteNotFound { .. } => HttpResponse::NotFound().json(json!({
                "error": self.to_string(),
                "type": "route_not_found",
            })),
            GatewayError::MissingTenantHeader { header } => {
                HttpResponse::BadRequest().body(format!("Header {header} is required"))
            }
            GatewayError::BackendUnknown { .. } => HttpResponse::InternalServerError().json(json!({
                "error": self.to_string(),
                "type": "backend_unknown",
            })),
            GatewayError::CompositeBackendFailed { .. } => HttpResponse::BadGateway().json(json!({
                "error": self.to_string(),
                "type": "composite_backend_failed",
            })),
            GatewayError::Validation { .. } => HttpResponse::InternalServerError().json(json!({
                "error": self.to_string(),
                "type": "validation",
            })),
            GatewayError::Internal { .. } => HttpResponse::InternalServerError().json(json!({
                "error": self.to_string(),
                "type": "internal",
            })),
        }
    }
}
