use std::collections::HashMap;

/// Latest distance report for one anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorDistanceEntry {
    /// Last reported distance (meters)
    pub distance: f64,
    /// Arrival time of the last report (monotonic milliseconds)
    pub last_seen_ms: u64,
    /// Insertion sequence, preserved across overwrites
    order: u64,
}

/// Last-write-wins store of anchor distances for one ranging session
///
/// Stale entries are never evicted here; they are excluded at snapshot time and
/// only removed when the radio reports a disconnect.
#[derive(Debug, Default)]
pub struct AnchorDistanceCache {
    entries: HashMap<String, AnchorDistanceEntry>,
    next_order: u64,
}

impl AnchorDistanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `device_id`
    pub fn update(&mut self, device_id: &str, distance: f64, timestamp_ms: u64) {
        if let Some(entry) = self.entries.get_mut(device_id) {
            entry.distance = distance;
            entry.last_seen_ms = timestamp_ms;
            return;
        }

        let order = self.next_order;
        self.next_order += 1;
        self.entries.insert(
            device_id.to_string(),
            AnchorDistanceEntry {
                distance,
                last_seen_ms: timestamp_ms,
                order,
            },
        );
    }

    /// Drop the entry for `device_id`, returning it if present
    pub fn remove(&mut self, device_id: &str) -> Option<AnchorDistanceEntry> {
        self.entries.remove(device_id)
    }

    pub fn get(&self, device_id: &str) -> Option<&AnchorDistanceEntry> {
        self.entries.get(device_id)
    }

    /// Entries seen within `window_ms` of `now_ms`, in first-seen order
    pub fn fresh_snapshot(&self, now_ms: u64, window_ms: u64) -> Vec<(String, f64)> {
        let mut fresh: Vec<(&String, &AnchorDistanceEntry)> = self
            .entries
            .iter()
            .filter(|(_, entry)| now_ms.saturating_sub(entry.last_seen_ms) <= window_ms)
            .collect();
        fresh.sort_by_key(|(_, entry)| entry.order);

        fresh
            .into_iter()
            .map(|(id, entry)| (id.clone(), entry.distance))
            .collect()
    }

    /// Every stored distance regardless of age
    pub fn live_distances(&self) -> HashMap<String, f64> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.distance))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FRESHNESS_WINDOW_MS;

    #[test]
    fn test_last_write_wins() {
        let mut cache = AnchorDistanceCache::new();
        cache.update("A", 1.0, 100);
        cache.update("A", 2.5, 200);

        assert_eq!(cache.len(), 1);
        let entry = cache.get("A").unwrap();
        assert_eq!(entry.distance, 2.5);
        assert_eq!(entry.last_seen_ms, 200);
    }

    #[test]
    fn test_stale_entry_excluded_but_still_live() {
        let mut cache = AnchorDistanceCache::new();
        cache.update("A", 1.0, 0);
        cache.update("B", 2.0, 1500);
        cache.update("C", 3.0, 2000);

        let fresh = cache.fresh_snapshot(2000, FRESHNESS_WINDOW_MS);
        assert_eq!(fresh, vec![("B".to_string(), 2.0), ("C".to_string(), 3.0)]);

        let live = cache.live_distances();
        assert_eq!(live.len(), 3);
        assert_eq!(live["A"], 1.0);

        cache.remove("A");
        assert!(!cache.live_distances().contains_key("A"));
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let mut cache = AnchorDistanceCache::new();
        cache.update("A", 1.0, 1000);

        assert_eq!(cache.fresh_snapshot(2000, 1000).len(), 1);
        assert!(cache.fresh_snapshot(2001, 1000).is_empty());
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let mut cache = AnchorDistanceCache::new();
        cache.update("A", 1.0, 5000);

        assert_eq!(cache.fresh_snapshot(4000, 1000).len(), 1);
    }

    #[test]
    fn test_snapshot_keeps_first_seen_order() {
        let mut cache = AnchorDistanceCache::new();
        cache.update("C", 3.0, 10);
        cache.update("A", 1.0, 20);
        cache.update("B", 2.0, 30);
        // Overwrite keeps position, re-insert after removal moves to the back
        cache.update("C", 3.5, 40);
        cache.remove("A");
        cache.update("A", 1.5, 50);

        let ids: Vec<String> = cache
            .fresh_snapshot(50, 1000)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["C", "B", "A"]);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut cache = AnchorDistanceCache::new();
        assert!(cache.remove("missing").is_none());
        assert!(cache.is_empty());
    }
}
