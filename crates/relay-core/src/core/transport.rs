//! The single outbound-forwarding primitive shared by the dispatcher, the
//! dry-run comparator, and the composite router.

use std::time::Duration;

use log::debug;
use tokio::time::timeout;

use crate::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::model::error::GatewayError;

#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

enum TransportFailure {
    Timeout,
    Transport(reqwest::Error),
}

/// Executes `request` against `backend`'s transport, gated by its circuit
/// breaker, under `request_timeout`. Status >= 500 counts as a breaker
/// failure but is still returned to the caller unchanged (§4.2).
pub async fn forward(
    client: &reqwest::Client,
    circuit_breaker: &CircuitBreaker,
    backend: &str,
    request: ForwardRequest,
    request_timeout: Duration,
) -> Result<ForwardResponse, GatewayError> {
    let built = client
        .request(request.method, &request.url)
        .headers(request.headers)
        .body(request.body)
        .build()
        .map_err(|e| GatewayError::UpstreamTransport {
            backend: backend.to_string(),
            message: e.to_string(),
        })?;

    let result = circuit_breaker
        .call(
            async {
                match timeout(request_timeout, client.execute(built)).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(error)) => Err(TransportFailure::Transport(error)),
                    Err(_) => Err(TransportFailure::Timeout),
                }
            },
            |response: &reqwest::Response| response.status().as_u16() >= 500,
        )
        .await;

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| GatewayError::UpstreamTransport {
                    backend: backend.to_string(),
                    message: e.to_string(),
                })?
                .to_vec();
            debug!("forwarded to '{backend}' -> {status}");
            Ok(ForwardResponse {
                status,
                headers,
                body,
            })
        }
        Err(CircuitBreakerError::CircuitOpen) => Err(GatewayError::CircuitOpen {
            backend: backend.to_string(),
        }),
        Err(CircuitBreakerError::OperationFailed(TransportFailure::Timeout)) => {
            Err(GatewayError::Timeout)
        }
        Err(CircuitBreakerError::OperationFailed(TransportFailure::Transport(error))) => {
            classify_transport_error(backend, error)
        }
    }
}

fn classify_transport_error(backend: &str, error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        return GatewayError::Timeout;
    }
    if error.is_connect() {
        return GatewayError::UpstreamConnect {
            backend: backend.to_string(),
            message: error.to_string(),
        };
    }
    GatewayError::UpstreamTransport {
        backend: backend.to_string(),
        message: error.to_string(),
    }
}
