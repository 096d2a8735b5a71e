//! Path/header rewriting rule engine applied before each outbound request.

use crate::model::route::{BackendConfig, EndpointRule, HeaderRewriting, HostnameMode};

fn apply_path_rewriting(backend: &BackendConfig, path: &str) -> String {
    let mut rewritten = path.to_string();

    if let Some(path_rewriting) = &backend.path_rewriting {
        if let Some(strip) = &path_rewriting.strip_base_path {
            if let Some(stripped) = rewritten.strip_prefix(strip.as_str()) {
                rewritten = stripped.to_string();
                if !rewritten.starts_with('/') {
                    rewritten = format!("/{rewritten}");
                }
            }
        }
        if let Some(prepend) = &path_rewriting.base_path_rewrite {
            rewritten = format!("{}{}", prepend.trim_end_matches('/'), rewritten);
        }
    }

    rewritten
}

/// Rewrites `path` per the backend's `pathRewriting` and ordered endpoint
/// rules. Rule order: strip `stripBasePath`, prepend `basePathRewrite`,
/// then apply the first endpoint rule (in declaration order) whose pattern
/// matches the result.
pub fn rewrite_path(backend: &BackendConfig, path: &str) -> String {
    let rewritten = apply_path_rewriting(backend, path);

    for rule in &backend.endpoints {
        if let Some(applied) = apply_endpoint_rule(&rule.pattern, &rule.replacement, &rewritten) {
            return applied;
        }
    }

    rewritten
}

/// The endpoint rule (if any) that `rewrite_path` would apply for `path`,
/// used to look up the endpoint-level header overrides for the same request.
pub fn matched_endpoint<'a>(backend: &'a BackendConfig, path: &str) -> Option<&'a EndpointRule> {
    let rewritten = apply_path_rewriting(backend, path);
    backend
        .endpoints
        .iter()
        .find(|rule| apply_endpoint_rule(&rule.pattern, &rule.replacement, &rewritten).is_some())
}

fn apply_endpoint_rule(pattern: &str, replacement: &str, path: &str) -> Option<String> {
    if let Some(prefix) = pattern.strip_suffix("/*") {
        if path == prefix || path.starts_with(&format!("{prefix}/")) {
            let suffix = path.strip_prefix(prefix).unwrap_or("");
            return Some(format!("{replacement}{suffix}"));
        }
        return None;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        if path.starts_with(prefix) {
            let suffix = &path[prefix.len()..];
            return Some(format!("{replacement}{suffix}"));
        }
        return None;
    }

    if path == pattern {
        return Some(replacement.to_string());
    }

    None
}

/// Returns the `Host` header value to forward, per the backend's
/// `hostnameMode`.
pub fn resolve_hostname<'a>(
    header_rewriting: Option<&'a HeaderRewriting>,
    client_host: &'a str,
    backend_host: &'a str,
) -> &'a str {
    match header_rewriting {
        None => client_host,
        Some(rules) => match rules.hostname_mode {
            HostnameMode::PreserveOriginal => client_host,
            HostnameMode::UseBackend => backend_host,
            HostnameMode::UseCustom => rules
                .custom_hostname
                .as_deref()
                .unwrap_or(client_host),
        },
    }
}

/// Applies `setHeaders` (override) then `removeHeaders` (delete), in that
/// order, to a header map representation the caller owns.
pub fn apply_header_rules(rules: &HeaderRewriting, headers: &mut Vec<(String, String)>) {
    for (name, value) in &rules.set_headers {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
    for name in &rules.remove_headers {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }
}

/// Resolves the effective `HeaderRewriting` for a request against a given
/// endpoint: the endpoint's own rules override the backend's when the
/// endpoint key matches.
pub fn effective_header_rewriting<'a>(
    backend: &'a BackendConfig,
    matched_endpoint_id: Option<&str>,
) -> Option<&'a HeaderRewriting> {
    if let Some(endpoint_id) = matched_endpoint_id {
        if let Some(rule) = backend.endpoints.iter().find(|r| r.id == endpoint_id) {
            if let Some(header_rewriting) = &rule.header_rewriting {
                return Some(header_rewriting);
            }
        }
    }
    backend.header_rewriting.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::route::{EndpointRule, PathRewriting};

    fn backend_with(path_rewriting: Option<PathRewriting>, endpoints: Vec<EndpointRule>) -> BackendConfig {
        BackendConfig {
            url: "http://upstream".into(),
            path_rewriting,
            header_rewriting: None,
            endpoints,
            feature_flag_id: None,
            alternative_backend: None,
            circuit_breaker: None,
            health_check: None,
        }
    }

    #[test]
    fn strips_base_path_then_prepends() {
        let backend = backend_with(
            Some(PathRewriting {
                strip_base_path: Some("/api".into()),
                base_path_rewrite: Some("/v2".into()),
            }),
            vec![],
        );
        assert_eq!(rewrite_path(&backend, "/api/users"), "/v2/users");
    }

    #[test]
    fn first_matching_endpoint_rule_wins() {
        let backend = backend_with(
            None,
            vec![
                EndpointRule {
                    id: "specific".into(),
                    pattern: "/users/me".into(),
                    replacement: "/v1/self".into(),
                    header_rewriting: None,
                },
                EndpointRule {
                    id: "generic".into(),
                    pattern: "/users/*".into(),
                    replacement: "/v1/user".into(),
                    header_rewriting: None,
                },
            ],
        );
        assert_eq!(rewrite_path(&backend, "/users/me"), "/v1/self");
        assert_eq!(rewrite_path(&backend, "/users/42"), "/v1/user/42");
    }

    #[test]
    fn byte_suffix_wildcard_preserves_trailing_bytes() {
        let backend = backend_with(
            None,
            vec![EndpointRule {
                id: "e".into(),
                pattern: "/files*".into(),
                replacement: "/static".into(),
                header_rewriting: None,
            }],
        );
        assert_eq!(rewrite_path(&backend, "/files.png"), "/static.png");
    }

    #[test]
    fn hostname_modes() {
        let preserve = HeaderRewriting::default();
        assert_eq!(resolve_hostname(Some(&preserve), "client", "backend"), "client");

        let mut use_backend = HeaderRewriting::default();
        use_backend.hostname_mode = crate::model::route::HostnameMode::UseBackend;
        assert_eq!(resolve_hostname(Some(&use_backend), "client", "backend"), "backend");

        let mut use_custom = HeaderRewriting::default();
        use_custom.hostname_mode = crate::model::route::HostnameMode::UseCustom;
        use_custom.custom_hostname = Some("custom.example".into());
        assert_eq!(
            resolve_hostname(Some(&use_custom), "client", "backend"),
            "custom.example"
        );
    }

    #[test]
    fn set_then_remove_headers_in_order() {
        let mut rules = HeaderRewriting::default();
        rules.set_headers.insert("X-Added".into(), "1".into());
        rules.remove_headers.push("X-Drop".into());

        let mut headers = vec![("X-Drop".to_string(), "gone".to_string())];
        apply_header_rules(&rules, &mut headers);

        assert_eq!(headers, vec![("X-Added".to_string(), "1".to_string())]);
    }

    #[test]
    fn endpoint_header_rules_override_backend_rules() {
        let mut backend_rules = HeaderRewriting::default();
        backend_rules.set_headers.insert("X-Scope".into(), "backend".into());

        let mut endpoint_rules = HeaderRewriting::default();
        endpoint_rules.set_headers.insert("X-Scope".into(), "endpoint".into());

        let backend = BackendConfig {
            url: "http://upstream".into(),
            path_rewriting: None,
            header_rewriting: Some(backend_rules),
            endpoints: vec![EndpointRule {
                id: "e".into(),
                pattern: "/x".into(),
                replacement: "/x".into(),
                header_rewriting: Some(endpoint_rules),
            }],
            feature_flag_id: None,
            alternative_backend: None,
            circuit_breaker: None,
            health_check: None,
        };

        let resolved = effective_header_rewriting(&backend, Some("e")).unwrap();
        assert_eq!(resolved.set_headers.get("X-Scope").unwrap(), "endpoint");
    }
}
