//! Multi-tenant, feature-flag-aware HTTP reverse proxy engine.
//!
//! Wires together route resolution, circuit breaking, load balancing,
//! feature-flag gating, response caching, dry-run comparison, and
//! composite/map-reduce fan-out behind a single request dispatcher.

pub mod config;
pub mod core;
pub mod http;
pub mod logging;
pub mod model;
