//! Fan-out to multiple backends with merge/join/enrich/map-reduce assembly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::{Map, Value};

use crate::core::circuit_breaker::CircuitBreaker;
use crate::core::transport::{forward, ForwardRequest, ForwardResponse};
use crate::model::error::GatewayError;
use crate::model::route::{CompositeRoute, CompositeStrategy, MapReduceConfig, MapReduceMode};

pub struct CompositeBackend {
    pub url: String,
    pub circuit_breaker: Arc<CircuitBreaker>,
}

/// Executes a composite route and returns `(status, body)` to write back
/// to the client. Timeouts apply per the composite route's own config;
/// failures are localised per backend.
pub async fn execute_composite(
    composite: &CompositeRoute,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    default_timeout: Duration,
) -> Result<(u16, Value), GatewayError> {
    let timeout = composite
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    match composite.strategy {
        CompositeStrategy::Merge | CompositeStrategy::Flat => {
            let values = fetch_sequential(&composite.backends, backends, client, template, timeout).await?;
            Ok((200, merge_objects(&values)))
        }
        CompositeStrategy::Nested => {
            let values = fetch_sequential(&composite.backends, backends, client, template, timeout).await?;
            let mut obj = Map::new();
            for (backend_id, value) in composite.backends.iter().zip(values) {
                obj.insert(backend_id.clone(), value);
            }
            Ok((200, Value::Object(obj)))
        }
        CompositeStrategy::Enrich => execute_enrich(composite, backends, client, template, timeout).await,
        CompositeStrategy::Join => {
            let values = fetch_sequential(&composite.backends, backends, client, template, timeout).await?;
            let key = composite.join_key.as_deref().unwrap_or("id");
            Ok((200, join_arrays(&values, key, composite.filter_on_empty)))
        }
        CompositeStrategy::MapReduce => {
            let map_reduce = composite.map_reduce.as_ref().ok_or_else(|| GatewayError::Validation {
                message: "mapReduce strategy requires a mapReduce config".into(),
            })?;
            match map_reduce.mode {
                MapReduceMode::Sequential => {
                    execute_map_reduce_sequential(composite, map_reduce, backends, client, template, timeout).await
                }
                MapReduceMode::Parallel => {
                    execute_map_reduce_parallel(composite, backends, client, template, timeout).await
                }
            }
        }
    }
}

async fn execute_enrich(
    composite: &CompositeRoute,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
) -> Result<(u16, Value), GatewayError> {
    let Some((source_id, ancillary_ids)) = composite.backends.split_first() else {
        return Err(GatewayError::Validation {
            message: "enrich strategy requires at least one backend".into(),
        });
    };

    let source_response = fetch_backend(source_id, backends, client, template, timeout).await?;
    let source_body = parse_json_body(&source_response);

    let mut ancillary = Map::new();
    for backend_id in ancillary_ids {
        match fetch_json(backend_id, backends, client, template, timeout).await {
            Ok(value) => {
                ancillary.insert(backend_id.clone(), value);
            }
            Err(error) => {
                // Ancillary enrichment backends are non-essential: failures are
                // swallowed rather than surfaced as 502.
                warn!("enrich ancillary backend '{backend_id}' failed: {error}");
            }
        }
    }

    let field = composite.enrich_field.clone().unwrap_or_else(|| "enrichment".to_string());
    let mut obj = source_body.as_object().cloned().unwrap_or_default();
    obj.insert(field, Value::Object(ancillary));
    Ok((source_response.status, Value::Object(obj)))
}

async fn execute_map_reduce_sequential(
    _composite: &CompositeRoute,
    map_reduce: &MapReduceConfig,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
) -> Result<(u16, Value), GatewayError> {
    let source = fetch_json(&map_reduce.source_backend, backends, client, template, timeout).await?;
    let array = extract_array(&source, &map_reduce.array_path);

    // An empty source array means there is nothing to reduce; the target
    // backend is never called regardless of allow_empty_responses.
    if array.is_empty() {
        return Ok((200, source));
    }

    let collected: Vec<Value> = array
        .iter()
        .filter_map(|element| element.get(&map_reduce.extract_field).cloned())
        .collect();

    let Some(target_id) = &map_reduce.target_backend else {
        return Err(GatewayError::Validation {
            message: "map-reduce sequential requires a targetBackend".into(),
        });
    };

    let mut body = Map::new();
    body.insert(map_reduce.collect_field.clone(), Value::Array(collected));
    let target_response = post_json(target_id, backends, client, template, timeout, &Value::Object(body)).await?;

    Ok((200, merge_objects(&[source, parse_json_body(&target_response)])))
}

async fn execute_map_reduce_parallel(
    composite: &CompositeRoute,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
) -> Result<(u16, Value), GatewayError> {
    let futures = composite
        .backends
        .iter()
        .map(|backend_id| fetch_json(backend_id, backends, client, template, timeout));
    let results = futures::future::join_all(futures).await;
    let values = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    let key = composite.join_key.as_deref().unwrap_or("id");
    // Open question resolved: require every backend to contribute a row for
    // a given key unless filterOnEmpty explicitly relaxes that.
    Ok((200, join_arrays(&values, key, true)))
}

async fn fetch_backend(
    backend_id: &str,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
) -> Result<ForwardResponse, GatewayError> {
    let backend = backends.get(backend_id).ok_or_else(|| GatewayError::BackendUnknown {
        id: backend_id.to_string(),
    })?;
    let mut request = template.clone();
    request.url = rebase_url(&template.url, &backend.url);
    let response = forward(client, &backend.circuit_breaker, backend_id, request, timeout).await?;
    if response.status >= 400 {
        return Err(GatewayError::CompositeBackendFailed {
            backend: backend_id.to_string(),
            status: response.status,
        });
    }
    Ok(response)
}

async fn fetch_json(
    backend_id: &str,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
) -> Result<Value, GatewayError> {
    let response = fetch_backend(backend_id, backends, client, template, timeout).await?;
    Ok(parse_json_body(&response))
}

async fn post_json(
    backend_id: &str,
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
    body: &Value,
) -> Result<ForwardResponse, GatewayError> {
    let backend = backends.get(backend_id).ok_or_else(|| GatewayError::BackendUnknown {
        id: backend_id.to_string(),
    })?;
    let mut request = template.clone();
    request.url = rebase_url(&template.url, &backend.url);
    request.method = reqwest::Method::POST;
    request.body = serde_json::to_vec(body).unwrap_or_default();
    forward(client, &backend.circuit_breaker, backend_id, request, timeout).await
}

async fn fetch_sequential(
    backend_ids: &[String],
    backends: &HashMap<String, CompositeBackend>,
    client: &reqwest::Client,
    template: &ForwardRequest,
    timeout: Duration,
) -> Result<Vec<Value>, GatewayError> {
    let mut values = Vec::with_capacity(backend_ids.len());
    for backend_id in backend_ids {
        values.push(fetch_json(backend_id, backends, client, template, timeout).await?);
    }
    Ok(values)
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

fn parse_json_body(response: &ForwardResponse) -> Value {
    serde_json::from_slice(&response.body).unwrap_or(Value::Null)
}

fn extract_array(value: &Value, path: &str) -> Vec<Value> {
    let pointer = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    value
        .pointer(&pointer)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn merge_objects(values: &[Value]) -> Value {
    let mut merged = Map::new();
    for value in values {
        if let Some(obj) = value.as_object() {
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Joins arrays-of-objects on `key`. When `require_all` (the strict
/// interpretation used for `filterOnEmpty`/map-reduce-parallel), a row is
/// dropped unless every source array contributed a value for that key.
fn join_arrays(values: &[Value], key: &str, require_all: bool) -> Value {
    let mut rows: HashMap<String, Map<String, Value>> = HashMap::new();
    let mut contributions: HashMap<String, usize> = HashMap::new();

    for value in values {
        let Some(array) = value.as_array() else { continue };
        for element in array {
            let Some(key_value) = element.get(key).and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let row = rows.entry(key_value.clone()).or_default();
            if let Some(obj) = element.as_object() {
                for (k, v) in obj {
                    row.insert(k.clone(), v.clone());
                }
            }
            *contributions.entry(key_value).or_insert(0) += 1;
        }
    }

    let total_sources = values.len();
    let joined: Vec<Value> = rows
        .into_iter()
        .filter(|(key_value, _)| {
            !require_all || contributions.get(key_value).copied().unwrap_or(0) == total_sources
        })
        .map(|(_, row)| Value::Object(row))
        .collect();

    Value::Array(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_objects_last_write_wins() {
        let a = serde_json::json!({ "x": 1, "y": 1 });
        let b = serde_json::json!({ "y": 2, "z": 3 });
        let merged = merge_objects(&[a, b]);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
        assert_eq!(merged["z"], 3);
    }

    #[test]
    fn extract_array_reads_nested_path() {
        let value = serde_json::json!({ "data": { "items": [1, 2, 3] } });
        let array = extract_array(&value, "data/items");
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn join_requires_all_sources_when_strict() {
        let a = serde_json::json!([{ "id": "1", "name": "a" }]);
        let b = serde_json::json!([{ "id": "1", "extra": "x" }, { "id": "2", "extra": "y" }]);
        let joined = join_arrays(&[a, b], "id", true);
        let array = joined.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["extra"], "x");
    }

    #[test]
    fn join_keeps_partial_rows_when_not_strict() {
        let a = serde_json::json!([{ "id": "1", "name": "a" }]);
        let b = serde_json::json!([{ "id": "1", "extra": "x" }, { "id": "2", "extra": "y" }]);
        let joined = join_arrays(&[a, b], "id", false);
        assert_eq!(joined.as_array().unwrap().len(), 2);
    }
}
