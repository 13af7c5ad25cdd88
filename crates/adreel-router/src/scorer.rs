//! Deterministic engine ranking.
//!
//! Ordering, most significant first:
//! 1. cost profile, cheapest first
//! 2. declared priority, highest first (NaN ranks last)
//! 3. observed success rate, highest first
//! 4. local engines before remote ones
//! 5. engine id, ascending
//!
//! The last key is unique, so two calls with equal inputs always agree.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use adreel_models::{CostProfile, EngineEntry, EngineLocation};

use crate::stats::UNKNOWN_SUCCESS_RATE;

/// Caller-supplied limits applied before ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConstraints {
    /// Drop engines above this tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_profile: Option<CostProfile>,
    /// Keep only engines at this location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_location: Option<EngineLocation>,
}

impl ScoringConstraints {
    pub fn allows(&self, engine: &EngineEntry) -> bool {
        let cost_ok = self
            .max_cost_profile
            .map_or(true, |max| engine.cost_profile.rank() <= max.rank());
        let location_ok = self.force_location.map_or(true, |loc| engine.location == loc);
        cost_ok && location_ok
    }
}

/// Filter by `constraints` and order the survivors.
///
/// `success_rates` maps engine id to its rolling success rate; engines with
/// no entry are treated as fully reliable.
pub fn score_engines(
    candidates: &[EngineEntry],
    constraints: &ScoringConstraints,
    success_rates: &HashMap<String, f64>,
) -> Vec<EngineEntry> {
    let mut ranked: Vec<EngineEntry> = candidates
        .iter()
        .filter(|e| constraints.allows(e))
        .cloned()
        .collect();

    ranked.sort_by(|a, b| compare(a, b, success_rates));
    ranked
}

fn compare(a: &EngineEntry, b: &EngineEntry, rates: &HashMap<String, f64>) -> Ordering {
    let rate = |e: &EngineEntry| rates.get(&e.id).copied().unwrap_or(UNKNOWN_SUCCESS_RATE);
    let local_rank = |e: &EngineEntry| u8::from(e.location != EngineLocation::Local);

    a.cost_profile
        .rank()
        .cmp(&b.cost_profile.rank())
        .then_with(|| sortable(b.priority_score).total_cmp(&sortable(a.priority_score)))
        .then_with(|| sortable(rate(b)).total_cmp(&sortable(rate(a))))
        .then_with(|| local_rank(a).cmp(&local_rank(b)))
        .then_with(|| a.id.cmp(&b.id))
}

fn sortable(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adreel_models::Capability;

    fn engine(id: &str, cost: CostProfile, location: EngineLocation) -> EngineEntry {
        EngineEntry::new(id, [Capability::Transcode], cost, location)
    }

    fn ids(engines: &[EngineEntry]) -> Vec<&str> {
        engines.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_cost_ranks_first() {
        let candidates = vec![
            engine("a", CostProfile::Medium, EngineLocation::Cloud),
            engine("b", CostProfile::Low, EngineLocation::Cloud).with_priority(-5.0),
        ];
        let ranked = score_engines(&candidates, &ScoringConstraints::default(), &HashMap::new());
        assert_eq!(ids(&ranked), vec!["b", "a"]);
    }

    #[test]
    fn test_max_cost_profile_filters() {
        let candidates = vec![
            engine("cloud-a", CostProfile::Medium, EngineLocation::Cloud),
            engine("cloud-b", CostProfile::High, EngineLocation::Cloud),
        ];
        let constraints = ScoringConstraints {
            max_cost_profile: Some(CostProfile::Medium),
            force_location: None,
        };
        let ranked = score_engines(&candidates, &constraints, &HashMap::new());
        assert_eq!(ids(&ranked), vec!["cloud-a"]);
    }

    #[test]
    fn test_force_location_can_empty_the_list() {
        let candidates = vec![engine("cloud-a", CostProfile::Free, EngineLocation::Cloud)];
        let constraints = ScoringConstraints {
            max_cost_profile: None,
            force_location: Some(EngineLocation::Local),
        };
        assert!(score_engines(&candidates, &constraints, &HashMap::new()).is_empty());
    }

    #[test]
    fn test_tie_breakers() {
        let candidates = vec![
            engine("d", CostProfile::Low, EngineLocation::Cloud),
            engine("c", CostProfile::Low, EngineLocation::Local),
            engine("b", CostProfile::Low, EngineLocation::Cloud),
            engine("flaky", CostProfile::Low, EngineLocation::Local),
            engine("pref", CostProfile::Low, EngineLocation::Cloud).with_priority(1.0),
        ];
        let rates = HashMap::from([("flaky".to_string(), 0.2)]);

        let ranked = score_engines(&candidates, &ScoringConstraints::default(), &rates);
        assert_eq!(ids(&ranked), vec!["pref", "c", "b", "d", "flaky"]);
    }

    #[test]
    fn test_nan_priority_ranks_last_within_tier() {
        let candidates = vec![
            engine("nan", CostProfile::Low, EngineLocation::Local).with_priority(f64::NAN),
            engine("neg", CostProfile::Low, EngineLocation::Cloud).with_priority(-100.0),
        ];
        let ranked = score_engines(&candidates, &ScoringConstraints::default(), &HashMap::new());
        assert_eq!(ids(&ranked), vec!["neg", "nan"]);
    }

    #[test]
    fn test_is_deterministic() {
        let candidates: Vec<_> = ["e", "a", "c", "b", "d"]
            .iter()
            .map(|id| engine(id, CostProfile::Free, EngineLocation::Server))
            .collect();
        let first = score_engines(&candidates, &ScoringConstraints::default(), &HashMap::new());
        let mut reversed = candidates.clone();
        reversed.reverse();
        let second = score_engines(&reversed, &ScoringConstraints::default(), &HashMap::new());
        assert_eq!(first, second);
        assert_eq!(ids(&first), vec!["a", "b", "c", "d", "e"]);
    }
}
