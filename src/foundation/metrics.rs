use std::collections::BTreeMap;

use tracing::warn;

/// Sink for storage-buffer allocation accounting.
///
/// Owned by the top-level renderer and handed to the resource allocator by reference. Every
/// allocation and every release of a backend buffer is reported here, so live bytes return to the
/// same value after any reallocation round trip.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetrics {
    by_label: BTreeMap<String, LabelUsage>,
    live_bytes: u64,
    live_buffers: u64,
    peak_bytes: u64,
    allocations: u64,
    releases: u64,
    budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LabelUsage {
    buffers: u64,
    bytes: u64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MemorySnapshot {
    pub live_bytes: u64,
    pub live_buffers: u64,
    pub peak_bytes: u64,
    pub allocations: u64,
    pub releases: u64,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics that warn once live bytes exceed `budget_bytes`.
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            budget_bytes: Some(budget_bytes),
            ..Self::default()
        }
    }

    pub fn record_allocation(&mut self, label: &str, bytes: u64) {
        let usage = self.by_label.entry(label.to_owned()).or_default();
        usage.buffers = usage.buffers.saturating_add(1);
        usage.bytes = usage.bytes.saturating_add(bytes);

        let was_within = self.within_budget();
        self.live_bytes = self.live_bytes.saturating_add(bytes);
        self.live_buffers = self.live_buffers.saturating_add(1);
        self.allocations = self.allocations.saturating_add(1);
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);

        if was_within && !self.within_budget() {
            warn!(
                live_bytes = self.live_bytes,
                budget_bytes = self.budget_bytes,
                label,
                "storage buffer budget exceeded"
            );
        }
    }

    pub fn record_release(&mut self, label: &str, bytes: u64) {
        if let Some(usage) = self.by_label.get_mut(label) {
            usage.buffers = usage.buffers.saturating_sub(1);
            usage.bytes = usage.bytes.saturating_sub(bytes);
            if usage.buffers == 0 {
                self.by_label.remove(label);
            }
        }
        self.live_bytes = self.live_bytes.saturating_sub(bytes);
        self.live_buffers = self.live_buffers.saturating_sub(1);
        self.releases = self.releases.saturating_add(1);
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn live_buffers(&self) -> u64 {
        self.live_buffers
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }

    /// Live bytes currently held under `label`.
    pub fn bytes_for(&self, label: &str) -> u64 {
        self.by_label.get(label).map_or(0, |u| u.bytes)
    }

    /// Labels with at least one live buffer, in sorted order.
    pub fn live_labels(&self) -> impl Iterator<Item = &str> {
        self.by_label.keys().map(String::as_str)
    }

    pub fn within_budget(&self) -> bool {
        self.budget_bytes.is_none_or(|b| self.live_bytes <= b)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            live_bytes: self.live_bytes,
            live_buffers: self.live_buffers,
            peak_bytes: self.peak_bytes,
            allocations: self.allocations,
            releases: self.releases,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/metrics.rs"]
mod tests;
