//! Configuration validation with detailed, collected error reporting.
//!
//! Every violation of the configuration invariants is collected into a
//! single report rather than failing on the first one, so an operator
//! fixing a rejected config sees the whole list in one pass.

use std::collections::HashSet;

use log::warn;

use crate::model::route::GlobalConfig;

/// Result of validating a `GlobalConfig`. `is_valid` is false iff `errors`
/// is non-empty; warnings never block startup.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Validates a `GlobalConfig` against every invariant named in the data
/// model: backend references, default backend, tenant header requirement,
/// cache TTL, and pattern uniqueness across the route maps.
pub fn validate_global_config(config: &GlobalConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_backend_references(config, &mut result);
    validate_default_backend(config, &mut result);
    validate_tenant_header(config, &mut result);
    validate_cache(config, &mut result);
    validate_pattern_uniqueness(config, &mut result);

    if result.is_valid {
        for warning in &result.warnings {
            warn!("config warning: {warning}");
        }
    }

    result
}

fn validate_backend_references(config: &GlobalConfig, result: &mut ValidationResult) {
    let known: HashSet<&str> = config.backends.keys().map(String::as_str).collect();

    for (pattern, spec) in &config.routes {
        for backend in spec.members() {
            if !known.contains(backend.as_str()) {
                result.add_error(format!(
                    "route '{pattern}' references unknown backend '{backend}'"
                ));
            }
        }
    }

    for (pattern, route_config) in &config.route_configs {
        if let Some(alt) = &route_config.alternative_backend {
            if !known.contains(alt.as_str()) {
                result.add_error(format!(
                    "routeConfig '{pattern}' alternativeBackend '{alt}' is unknown"
                ));
            }
        }
    }

    for (pattern, composite) in &config.composite_routes {
        for backend in &composite.backends {
            if !known.contains(backend.as_str()) {
                result.add_error(format!(
                    "composite route '{pattern}' references unknown backend '{backend}'"
                ));
            }
        }
        if let Some(alt) = &composite.alternative_backend {
            if !known.contains(alt.as_str()) {
                result.add_error(format!(
                    "composite route '{pattern}' alternativeBackend '{alt}' is unknown"
                ));
            }
        }
    }

    for (backend_id, backend_config) in &config.backend_configs {
        if !known.contains(backend_id.as_str()) {
            result.add_error(format!(
                "backendConfig '{backend_id}' does not match any declared backend"
            ));
        }
        if let Some(alt) = &backend_config.alternative_backend {
            if !known.contains(alt.as_str()) {
                result.add_error(format!(
                    "backendConfig '{backend_id}' alternativeBackend '{alt}' is unknown"
                ));
            }
        }
    }
}

fn validate_default_backend(config: &GlobalConfig, result: &mut ValidationResult) {
    if let Some(default_backend) = &config.default_backend {
        if !config.backends.contains_key(default_backend) {
            result.add_error(format!(
                "defaultBackend '{default_backend}' is not a declared backend"
            ));
        }
    }
}

fn validate_tenant_header(config: &GlobalConfig, result: &mut ValidationResult) {
    if config.require_tenant && config.tenant_header.trim().is_empty() {
        result.add_error("requireTenant is set but tenantHeader is empty");
    }
}

fn validate_cache(config: &GlobalConfig, result: &mut ValidationResult) {
    if config.cache.enabled && config.cache.ttl_ms == 0 {
        result.add_error("cache is enabled but ttl_ms is 0");
    }
}

fn validate_pattern_uniqueness(config: &GlobalConfig, result: &mut ValidationResult) {
    let route_patterns: HashSet<&str> = config.routes.keys().map(String::as_str).collect();
    for pattern in config.composite_routes.keys() {
        if route_patterns.contains(pattern.as_str()) {
            result.add_error(format!(
                "pattern '{pattern}' is declared in both routes and compositeRoutes"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::route::BackendSpec;

    #[test]
    fn rejects_route_to_unknown_backend() {
        let mut config = GlobalConfig::default();
        config.backends.insert("a".into(), "http://a".into());
        config
            .routes
            .insert("/x".into(), BackendSpec::Single("ghost".into()));

        let result = validate_global_config(&config);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn accepts_well_formed_config() {
        let mut config = GlobalConfig::default();
        config.backends.insert("a".into(), "http://a".into());
        config
            .routes
            .insert("/x".into(), BackendSpec::Single("a".into()));
        config.default_backend = Some("a".into());

        let result = validate_global_config(&config);
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn rejects_require_tenant_without_header() {
        let mut config = GlobalConfig::default();
        config.require_tenant = true;
        config.tenant_header = String::new();

        let result = validate_global_config(&config);
        assert!(!result.is_valid);
    }
}
