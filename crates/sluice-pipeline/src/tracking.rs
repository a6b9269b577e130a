//! Asset-usage tracking seam
//!
//! Every reading routed into a filter stage is reported against the
//! stage's category name before the filter runs, whether or not the
//! filter later accepts it. The host decides what recording means; the
//! in-memory tracker below covers single-process hosts and tests.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Event tag marking filter-stage usage of an asset
pub const FILTER_EVENT: &str = "Filter";

pub trait AssetTracker: Send + Sync {
    fn track_asset(&self, category: &str, asset: &str, event: &str);
}

/// One recorded (category, asset, event) usage tuple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEvent {
    pub category: String,
    pub asset: String,
    pub event: String,
}

/// Tracker that accumulates events in memory
#[derive(Debug, Default)]
pub struct MemoryTracker {
    events: Mutex<Vec<AssetEvent>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        MemoryTracker::default()
    }

    /// Snapshot of all recorded events, in arrival order
    pub fn events(&self) -> Vec<AssetEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl AssetTracker for MemoryTracker {
    fn track_asset(&self, category: &str, asset: &str, event: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(AssetEvent {
                category: category.to_string(),
                asset: asset.to_string(),
                event: event.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_tracker_records_in_order() {
        let tracker = MemoryTracker::new();
        tracker.track_asset("stage-a", "pump1", FILTER_EVENT);
        tracker.track_asset("stage-a", "pump2", FILTER_EVENT);

        let events = tracker.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].asset, "pump1");
        assert_eq!(events[1].asset, "pump2");
        assert!(events.iter().all(|e| e.event == FILTER_EVENT));
        assert_eq!(tracker.count(), 2);
    }
}
