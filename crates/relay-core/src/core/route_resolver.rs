//! Route resolution: first-match-wins across routeConfigs, routes, composite
//! routes, and the default backend.

use std::collections::HashMap;

use crate::model::route::{BackendSpec, CompositeRoute, GlobalConfig, RouteConfig};

#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Backend {
        pattern: String,
        spec: BackendSpec,
        route_config: Option<RouteConfig>,
    },
    Composite {
        pattern: String,
        composite: CompositeRoute,
    },
    Default {
        backend: String,
    },
}

/// Resolves `path` against the effective configuration in the order fixed
/// by the dispatcher contract: an exact pattern that carries a `RouteConfig`
/// wins outright; otherwise the most-specific entry in `routes` (longest
/// literal prefix, exact beats wildcard); otherwise the most-specific
/// composite route; otherwise the default backend.
pub fn resolve_route(config: &GlobalConfig, path: &str) -> Option<ResolvedTarget> {
    if config.route_configs.contains_key(path) {
        if let Some(spec) = config.routes.get(path) {
            return Some(ResolvedTarget::Backend {
                pattern: path.to_string(),
                spec: spec.clone(),
                route_config: config.route_configs.get(path).cloned(),
            });
        }
    }

    if let Some((pattern, spec)) = best_route_match(&config.routes, path) {
        return Some(ResolvedTarget::Backend {
            route_config: config.route_configs.get(&pattern).cloned(),
            pattern,
            spec,
        });
    }

    if let Some((pattern, composite)) = best_composite_match(&config.composite_routes, path) {
        return Some(ResolvedTarget::Composite { pattern, composite });
    }

    config.default_backend.clone().map(|backend| ResolvedTarget::Default { backend })
}

fn best_route_match(
    routes: &HashMap<String, BackendSpec>,
    path: &str,
) -> Option<(String, BackendSpec)> {
    if let Some(spec) = routes.get(path) {
        return Some((path.to_string(), spec.clone()));
    }

    let mut best_len = 0usize;
    let mut best: Option<(String, BackendSpec)> = None;
    for (pattern, spec) in routes {
        let Some(prefix) = pattern.strip_suffix("/*") else {
            continue;
        };
        let matches = path == prefix || path.starts_with(&format!("{prefix}/"));
        if matches && prefix.len() >= best_len {
            best_len = prefix.len();
            best = Some((pattern.clone(), spec.clone()));
        }
    }
    best
}

fn best_composite_match(
    routes: &HashMap<String, CompositeRoute>,
    path: &str,
) -> Option<(String, CompositeRoute)> {
    if let Some(composite) = routes.get(path) {
        return Some((path.to_string(), composite.clone()));
    }

    let mut best_len = 0usize;
    let mut best: Option<(String, CompositeRoute)> = None;
    for (pattern, composite) in routes {
        let Some(prefix) = pattern.strip_suffix("/*") else {
            continue;
        };
        let matches = path == prefix || path.starts_with(&format!("{prefix}/"));
        if matches && prefix.len() >= best_len {
            best_len = prefix.len();
            best = Some((pattern.clone(), composite.clone()));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::route::CompositeStrategy;

    fn config_with_routes() -> GlobalConfig {
        let mut config = GlobalConfig::default();
        config.backends.insert("a".into(), "http://a".into());
        config.backends.insert("b".into(), "http://b".into());
        config
            .routes
            .insert("/exact".into(), BackendSpec::Single("a".into()));
        config
            .routes
            .insert("/wild/*".into(), BackendSpec::Single("b".into()));
        config
    }

    #[test]
    fn exact_literal_beats_wildcard() {
        let mut config = config_with_routes();
        config
            .routes
            .insert("/wild/exact".into(), BackendSpec::Single("a".into()));

        let resolved = resolve_route(&config, "/wild/exact").unwrap();
        match resolved {
            ResolvedTarget::Backend { pattern, .. } => assert_eq!(pattern, "/wild/exact"),
            _ => panic!("expected backend match"),
        }
    }

    #[test]
    fn wildcard_matches_prefix() {
        let config = config_with_routes();
        let resolved = resolve_route(&config, "/wild/anything").unwrap();
        match resolved {
            ResolvedTarget::Backend { pattern, spec, .. } => {
                assert_eq!(pattern, "/wild/*");
                assert_eq!(spec.members(), &["b"]);
            }
            _ => panic!("expected backend match"),
        }
    }

    #[test]
    fn route_config_pairs_with_same_pattern_route() {
        let mut config = config_with_routes();
        config
            .route_configs
            .insert("/exact".into(), RouteConfig::default());

        let resolved = resolve_route(&config, "/exact").unwrap();
        match resolved {
            ResolvedTarget::Backend { route_config, .. } => assert!(route_config.is_some()),
            _ => panic!("expected backend match"),
        }
    }

    #[test]
    fn falls_back_to_default_backend() {
        let mut config = GlobalConfig::default();
        config.backends.insert("a".into(), "http://a".into());
        config.default_backend = Some("a".into());

        let resolved = resolve_route(&config, "/nowhere").unwrap();
        match resolved {
            ResolvedTarget::Default { backend } => assert_eq!(backend, "a"),
            _ => panic!("expected default backend"),
        }
    }

    #[test]
    fn no_match_and_no_default_is_none() {
        let config = GlobalConfig::default();
        assert!(resolve_route(&config, "/nowhere").is_none());
    }

    #[test]
    fn composite_route_matches_when_no_plain_route() {
        let mut config = GlobalConfig::default();
        config.backends.insert("a".into(), "http://a".into());
        config.backends.insert("b".into(), "http://b".into());
        config.composite_routes.insert(
            "/combo".into(),
            CompositeRoute {
                pattern: "/combo".into(),
                backends: vec!["a".into(), "b".into()],
                strategy: CompositeStrategy::Merge,
                feature_flag_id: None,
                alternative_backend: None,
                join_key: None,
                filter_on_empty: false,
                enrich_field: None,
                map_reduce: None,
                allow_empty_responses: false,
                timeout_ms: None,
            },
        );

        let resolved = resolve_route(&config, "/combo").unwrap();
        assert!(matches!(resolved, ResolvedTarget::Composite { .. }));
    }
}
