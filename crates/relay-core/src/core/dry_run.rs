//! Dual-dispatch comparison: forward to two backends, return one response
//! synchronously, compare both asynchronously.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::warn;
use serde_json::json;

use crate::core::circuit_breaker::CircuitBreaker;
use crate::core::events::Subject;
use crate::core::transport::{forward, ForwardRequest, ForwardResponse};
use crate::model::error::GatewayError;
use crate::model::event::{EventType, GatewayEvent};
use crate::model::route::DryRunSide;

pub struct DryRunLeg {
    pub backend: String,
    pub url: String,
    pub circuit_breaker: Arc<CircuitBreaker>,
}

/// Dispatches the configured "return" leg synchronously and flushes its
/// response to the client; the other leg runs in the background and, once
/// both outcomes are known, emits exactly one `dry_run.comparison` event.
pub async fn execute_dry_run(
    endpoint: String,
    primary: DryRunLeg,
    secondary: DryRunLeg,
    default_response_backend: DryRunSide,
    client: reqwest::Client,
    request: ForwardRequest,
    request_timeout: Duration,
    subject: Arc<dyn Subject>,
) -> Result<ForwardResponse, GatewayError> {
    let primary_is_returned = matches!(default_response_backend, DryRunSide::Primary);
    let (returned, other) = if primary_is_returned {
        (primary, secondary)
    } else {
        (secondary, primary)
    };

    let mut returned_request = request.clone();
    returned_request.url = rebase_url(&request.url, &returned.url);
    let mut other_request = request.clone();
    other_request.url = rebase_url(&request.url, &other.url);

    let returned_result = forward(
        &client,
        &returned.circuit_breaker,
        &returned.backend,
        returned_request,
        request_timeout,
    )
    .await;

    let returned_for_compare = clone_outcome(&returned_result);
    let returned_backend_name = returned.backend.clone();
    let other_backend_name = other.backend.clone();

    tokio::spawn(async move {
        let other_result = forward(
            &client,
            &other.circuit_breaker,
            &other.backend,
            other_request,
            request_timeout,
        )
        .await;

        if let Err(error) = &other_result {
            warn!("dry-run secondary leg '{}' failed: {error}", other.backend);
            subject.notify(GatewayEvent::new(
                EventType::RequestFailed,
                "dry_run",
                json!({ "endpoint": endpoint, "backend": other.backend, "error": error.to_string() }),
            ));
        }

        let other_for_compare = clone_outcome(&other_result);
        let comparison = compare(&returned_for_compare, &other_for_compare);

        let returned_status = outcome_status(&returned_for_compare);
        let other_status = outcome_status(&other_for_compare);
        let (primary_name, secondary_name, primary_status, secondary_status) = if primary_is_returned {
            (returned_backend_name.clone(), other_backend_name.clone(), returned_status, other_status)
        } else {
            (other_backend_name.clone(), returned_backend_name.clone(), other_status, returned_status)
        };

        subject.notify(GatewayEvent::new(
            EventType::DryRunComparison,
            "dry_run",
            json!({
                "endpoint": endpoint,
                "primary": primary_name,
                "secondary": secondary_name,
                "returned": returned_backend_name,
                "statusCodeMatch": comparison.status_match,
                "bodyMatch": comparison.body_match,
                "headersMatch": comparison.headers_match,
                "differences": comparison.differences,
                "primaryStatus": primary_status,
                "secondaryStatus": secondary_status,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        ));
    });

    returned_result
}

fn rebase_url(original: &str, backend_url: &str) -> String {
    match reqwest::Url::parse(original) {
        Ok(parsed) => format!(
            "{}{}{}",
            backend_url.trim_end_matches('/'),
            parsed.path(),
            parsed.query().map(|q| format!("?{q}")).unwrap_or_default()
        ),
        Err(_) => backend_url.to_string(),
    }
}

type Outcome = Result<ForwardResponse, String>;

fn clone_outcome(result: &Result<ForwardResponse, GatewayError>) -> Outcome {
    match result {
        Ok(response) => Ok(response.clone()),
        Err(error) => Err(error.to_string()),
    }
}

fn outcome_status(outcome: &Outcome) -> Option<u16> {
    outcome.as_ref().ok().map(|r| r.status)
}

struct Comparison {
    status_match: bool,
    headers_match: bool,
    body_match: bool,
    differences: Vec<String>,
}

fn compare(a: &Outcome, b: &Outcome) -> Comparison {
    match (a, b) {
        (Ok(a), Ok(b)) => {
            let mut differences = Vec::new();
            let status_match = a.status == b.status;
            if !status_match {
                differences.push(format!("status {} != {}", a.status, b.status));
            }
            let body_match = a.body == b.body;
            if !body_match {
                differences.push("body differs".to_string());
            }
            let headers_match = a.headers == b.headers;
            if !headers_match {
                differences.push("headers differ".to_string());
            }
            Comparison {
                status_match,
                headers_match,
                body_match,
                differences,
            }
        }
        _ => Comparison {
            status_match: false,
            headers_match: false,
            body_match: false,
            differences: vec!["one leg did not complete".to_string()],
        },
    }
}
