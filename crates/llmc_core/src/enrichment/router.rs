//! Chooses an ordered chain of backend specs for an enrichment item.

use crate::config::BackendConfig;
use crate::enrichment::EnrichmentItem;

/// Named routing decision: which backends to try, in order.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Name of the chain chosen, for logging (e.g. "code-fast", "docs-default").
    pub chain_name: String,
    /// Backend specs to try, first to last.
    pub backend_specs: Vec<BackendConfig>,
}

/// Chooses a backend chain from configuration based on content type, path, and classifier
/// confidence. Low-confidence classifications are routed through the full cascade (every
/// configured backend) rather than a trimmed one, since a bad classification is more likely
/// to need a stronger model.
pub struct Router {
    backends: Vec<BackendConfig>,
}

impl Router {
    /// Build a router over the configured backend list (tier 0, in cascade order).
    pub fn new(backends: Vec<BackendConfig>) -> Self {
        Self { backends }
    }

    /// Decide the chain for a single item.
    pub fn route(&self, item: &EnrichmentItem) -> RouteDecision {
        let chain_name = if item.content_type == "docs" {
            "docs-default"
        } else if item.classifier_confidence < 0.5 {
            "low-confidence-full-cascade"
        } else {
            "code-default"
        };
        RouteDecision { chain_name: chain_name.to_string(), backend_specs: self.backends.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_routes_through_full_cascade() {
        let router = Router::new(vec![BackendConfig::default()]);
        let item = EnrichmentItem {
            span_hash: "a".into(),
            code_snippet: "x".into(),
            file_path: "a.py".into(),
            line_range: (1, 2),
            content_type: "code".into(),
            classifier_confidence: 0.2,
        };
        let decision = router.route(&item);
        assert_eq!(decision.chain_name, "low-confidence-full-cascade");
    }
}
