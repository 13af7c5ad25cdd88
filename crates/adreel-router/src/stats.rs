//! Rolling per-engine success statistics.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Success rate assumed for an engine with no recorded outcomes.
pub const UNKNOWN_SUCCESS_RATE: f64 = 1.0;

/// Keeps the last `window` outcomes for every engine.
#[derive(Debug)]
pub struct SuccessStats {
    window: usize,
    outcomes: Mutex<HashMap<String, VecDeque<bool>>>,
}

impl Default for SuccessStats {
    fn default() -> Self {
        Self::new(50)
    }
}

impl SuccessStats {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Record one dispatch outcome.
    pub fn record(&self, engine_id: &str, success: bool) {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        let history = outcomes
            .entry(engine_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.window));
        if history.len() == self.window {
            history.pop_front();
        }
        history.push_back(success);
    }

    /// Success rate over the window, in `[0, 1]`.
    pub fn success_rate(&self, engine_id: &str) -> f64 {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        outcomes
            .get(engine_id)
            .map(rate)
            .unwrap_or(UNKNOWN_SUCCESS_RATE)
    }

    /// Point-in-time rates for every engine with history.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        let outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        outcomes.iter().map(|(id, h)| (id.clone(), rate(h))).collect()
    }
}

fn rate(history: &VecDeque<bool>) -> f64 {
    if history.is_empty() {
        return UNKNOWN_SUCCESS_RATE;
    }
    history.iter().filter(|ok| **ok).count() as f64 / history.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_engine_is_trusted() {
        let stats = SuccessStats::new(10);
        assert_eq!(stats.success_rate("new"), 1.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let stats = SuccessStats::new(4);
        for _ in 0..4 {
            stats.record("e", false);
        }
        assert_eq!(stats.success_rate("e"), 0.0);

        stats.record("e", true);
        stats.record("e", true);
        assert_eq!(stats.success_rate("e"), 0.5);
    }

    #[test]
    fn test_snapshot_only_includes_recorded_engines() {
        let stats = SuccessStats::new(10);
        stats.record("a", true);
        stats.record("a", false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["a"], 0.5);
    }
}
