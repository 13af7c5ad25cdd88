//! Capability matching.

use adreel_models::{EngineEntry, ExecutionPlan};

use crate::registry::RegistrySnapshot;

/// Engines that can run every segment of `plan`.
///
/// An engine qualifies when it is available, provides the union of all
/// segment capabilities, and accepts the longest segment. Registration
/// order is preserved.
pub fn get_compatible_engines(plan: &ExecutionPlan, registry: &RegistrySnapshot) -> Vec<EngineEntry> {
    let required = plan.required_capabilities();
    let longest = plan.max_segment_duration();

    registry
        .entries()
        .iter()
        .filter(|e| e.available && e.supports(&required) && e.accepts_duration(longest))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineAdapter, EngineError, EngineOutcome, EngineRequest};
    use crate::registry::EngineRegistry;
    use adreel_models::{Capability, CostProfile, EngineLocation, TimelineSegment};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Stub;

    #[async_trait]
    impl EngineAdapter for Stub {
        async fn invoke(&self, _request: &EngineRequest) -> Result<EngineOutcome, EngineError> {
            Err(EngineError::unavailable("stub"))
        }
    }

    fn registry(entries: Vec<EngineEntry>) -> Arc<RegistrySnapshot> {
        EngineRegistry::with_engines(
            entries
                .into_iter()
                .map(|e| (e, Arc::new(Stub) as Arc<dyn EngineAdapter>))
                .collect(),
        )
        .unwrap()
        .snapshot()
    }

    fn plan() -> ExecutionPlan {
        ExecutionPlan::new(
            "p",
            vec![
                TimelineSegment::new("s1", "a", 0.0, 10.0).requires(Capability::Transcode),
                TimelineSegment::new("s2", "b", 10.0, 45.0).requires(Capability::OverlayText),
            ],
        )
    }

    #[test]
    fn test_requires_union_of_capabilities() {
        let snapshot = registry(vec![
            EngineEntry::new("both", [Capability::Transcode, Capability::OverlayText], CostProfile::Low, EngineLocation::Cloud),
            EngineEntry::new("transcode-only", [Capability::Transcode], CostProfile::Free, EngineLocation::Local),
        ]);

        let ids: Vec<_> = get_compatible_engines(&plan(), &snapshot).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["both"]);
    }

    #[test]
    fn test_excludes_short_and_unavailable_engines() {
        let caps = [Capability::Transcode, Capability::OverlayText];
        let snapshot = registry(vec![
            EngineEntry::new("short", caps, CostProfile::Low, EngineLocation::Cloud).with_max_duration(30.0),
            EngineEntry::new("down", caps, CostProfile::Low, EngineLocation::Cloud).with_available(false),
            EngineEntry::new("ok", caps, CostProfile::High, EngineLocation::Server).with_max_duration(45.0),
        ]);

        let ids: Vec<_> = get_compatible_engines(&plan(), &snapshot).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_preserves_registration_order() {
        let caps = [Capability::Transcode, Capability::OverlayText];
        let snapshot = registry(vec![
            EngineEntry::new("z", caps, CostProfile::High, EngineLocation::Cloud),
            EngineEntry::new("a", caps, CostProfile::Free, EngineLocation::Local),
        ]);

        let ids: Vec<_> = get_compatible_engines(&plan(), &snapshot).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}
