//! Ordered composition of feature-flag evaluators.

use std::collections::HashMap as StdHashMap;
use std::sync::Arc;

use futures::future::LocalBoxFuture;
use serde_json::json;

use crate::core::events::Subject;
use crate::model::event::{EventType, GatewayEvent};

/// The outcome of asking a single evaluator to decide a flag.
pub enum FlagDecision {
    Decided(bool),
    NoDecision,
    Fatal(String),
}

/// A collaborator that decides a feature flag or defers to the next
/// evaluator by ascending `weight()`. The built-in file-backed evaluator
/// (`DefaultsEvaluator`) uses weight 1000 so registered evaluators run
/// first.
pub trait FeatureFlagEvaluator: Send + Sync {
    fn name(&self) -> &str;
    fn weight(&self) -> i64 {
        1000
    }
    fn evaluate(&self, flag_id: &str, tenant_id: &str) -> LocalBoxFuture<'_, FlagDecision>;
}

/// Reads flag defaults straight out of the effective configuration. This
/// is the built-in evaluator every aggregator carries even with no other
/// evaluators registered.
pub struct DefaultsEvaluator {
    defaults: StdHashMap<String, bool>,
}

impl DefaultsEvaluator {
    pub fn new(defaults: StdHashMap<String, bool>) -> Self {
        Self { defaults }
    }
}

impl FeatureFlagEvaluator for DefaultsEvaluator {
    fn name(&self) -> &str {
        "defaults"
    }

    fn weight(&self) -> i64 {
        1000
    }

    fn evaluate(&self, flag_id: &str, _tenant_id: &str) -> LocalBoxFuture<'_, FlagDecision> {
        let decision = match self.defaults.get(flag_id) {
            Some(value) => FlagDecision::Decided(*value),
            None => FlagDecision::NoDecision,
        };
        Box::pin(async move { decision })
    }
}

/// Composes evaluators ordered by ascending weight, with deduplication by
/// name so the aggregator can never discover itself among its own
/// evaluators.
pub struct FlagAggregator {
    evaluators: Vec<Arc<dyn FeatureFlagEvaluator>>,
}

impl FlagAggregator {
    pub fn new(evaluators: Vec<Arc<dyn FeatureFlagEvaluator>>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut deduped: Vec<_> = evaluators
            .into_iter()
            .filter(|e| seen.insert(e.name().to_string()))
            .collect();
        deduped.sort_by_key(|e| e.weight());
        Self {
            evaluators: deduped,
        }
    }

    /// Iterates evaluators in weight order; the first to decide wins. A
    /// fatal result records its reason on `subject` and short-circuits to
    /// the caller-provided default.
    pub async fn evaluate(&self, flag_id: &str, tenant_id: &str, default: bool, subject: &Arc<dyn Subject>) -> bool {
        for evaluator in &self.evaluators {
            match evaluator.evaluate(flag_id, tenant_id).await {
                FlagDecision::Decided(value) => return value,
                FlagDecision::NoDecision => continue,
                FlagDecision::Fatal(reason) => {
                    subject.notify(GatewayEvent::new(
                        EventType::Error,
                        "feature_flags",
                        json!({
                            "flagId": flag_id,
                            "tenantId": tenant_id,
                            "evaluator": evaluator.name(),
                            "reason": reason,
                        }),
                    ));
                    return default;
                }
            }
        }
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::NullSubject;

    struct AlwaysDecides(bool, i64);
    impl FeatureFlagEvaluator for AlwaysDecides {
        fn name(&self) -> &str {
            "always"
        }
        fn weight(&self) -> i64 {
            self.1
        }
        fn evaluate(&self, _flag_id: &str, _tenant_id: &str) -> LocalBoxFuture<'_, FlagDecision> {
            let v = self.0;
            Box::pin(async move { FlagDecision::Decided(v) })
        }
    }

    struct AlwaysFatal;
    impl FeatureFlagEvaluator for AlwaysFatal {
        fn name(&self) -> &str {
            "fatal"
        }
        fn weight(&self) -> i64 {
            0
        }
        fn evaluate(&self, _flag_id: &str, _tenant_id: &str) -> LocalBoxFuture<'_, FlagDecision> {
            Box::pin(async move { FlagDecision::Fatal("boom".into()) })
        }
    }

    fn subject() -> Arc<dyn Subject> {
        Arc::new(NullSubject)
    }

    #[tokio::test]
    async fn falls_through_to_default_when_nothing_decides() {
        let aggregator = FlagAggregator::new(vec![Arc::new(DefaultsEvaluator::new(
            StdHashMap::new(),
        ))]);
        assert!(aggregator.evaluate("f", "", true, &subject()).await);
        assert!(!aggregator.evaluate("f", "", false, &subject()).await);
    }

    #[tokio::test]
    async fn lower_weight_evaluator_runs_first() {
        let mut defaults = StdHashMap::new();
        defaults.insert("f".to_string(), false);
        let aggregator = FlagAggregator::new(vec![
            Arc::new(DefaultsEvaluator::new(defaults)),
            Arc::new(AlwaysDecides(true, 1)),
        ]);
        assert!(aggregator.evaluate("f", "", false, &subject()).await);
    }

    #[tokio::test]
    async fn fatal_short_circuits_to_default() {
        let aggregator = FlagAggregator::new(vec![
            Arc::new(AlwaysFatal),
            Arc::new(AlwaysDecides(true, 1000)),
        ]);
        assert!(!aggregator.evaluate("f", "", false, &subject()).await);
    }

    #[tokio::test]
    async fn self_discovery_is_deduplicated_by_name() {
        let aggregator = FlagAggregator::new(vec![
            Arc::new(AlwaysDecides(true, 1)),
            Arc::new(AlwaysDecides(false, 2)),
        ]);
        // Both register as "always"; only the first (lower weight) survives.
        assert!(aggregator.evaluate("f", "", false, &subject()).await);
    }
}
