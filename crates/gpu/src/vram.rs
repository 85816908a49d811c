//! Central VRAM accounting.
//!
//! NVDEC decoders own their surface pools (an API requirement), so this
//! component is purely a ledger: it tracks bytes and surface counts per
//! camera, an aggregate running total, and a monotonic peak, and warns
//! when utilization crosses the configured ceiling. It never allocates
//! GPU memory itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

/// Accountant configuration.
#[derive(Clone, Debug)]
pub struct VramConfig {
    /// Aggregate allocation ceiling, bytes.
    pub max_gpu_memory_bytes: usize,
    /// Log when utilization exceeds 90%.
    pub enable_warnings: bool,
}

impl Default for VramConfig {
    fn default() -> Self {
        Self {
            max_gpu_memory_bytes: 3 * 1024 * 1024 * 1024,
            enable_warnings: true,
        }
    }
}

/// Snapshot of the accountant's state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VramStats {
    pub total_allocated_bytes: usize,
    /// Highest total ever observed; never decreases.
    pub peak_allocated_bytes: usize,
    pub total_surface_count: usize,
    pub per_camera_memory_bytes: BTreeMap<String, usize>,
    pub per_camera_surface_count: BTreeMap<String, usize>,
    /// Total relative to the configured ceiling, percent.
    pub utilization_percent: f64,
}

#[derive(Default)]
struct Ledger {
    per_camera_memory: BTreeMap<String, usize>,
    per_camera_surfaces: BTreeMap<String, usize>,
    /// Edge trigger for the utilization warning.
    warned: bool,
}

/// Tracks aggregate VRAM use across all cameras.
pub struct VramAccountant {
    config: VramConfig,
    ledger: Mutex<Ledger>,
    total: AtomicUsize,
    peak: AtomicUsize,
}

impl VramAccountant {
    pub fn new(config: VramConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
            total: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Record `bytes` / `surfaces` for a camera. Re-registering an
    /// already-present camera replaces its previous figures, so the
    /// total always equals the sum of the per-camera entries.
    pub fn register(&self, camera_id: &str, bytes: usize, surfaces: usize) {
        let mut ledger = self.ledger.lock();

        let previous = ledger
            .per_camera_memory
            .insert(camera_id.to_string(), bytes)
            .unwrap_or(0);
        ledger
            .per_camera_surfaces
            .insert(camera_id.to_string(), surfaces);

        let total = self.apply_delta(previous, bytes);
        self.check_limits(&mut ledger, total);
    }

    /// Remove a camera's entry (no-op for unknown cameras; the total is
    /// zero-clamped).
    pub fn unregister(&self, camera_id: &str) {
        let mut ledger = self.ledger.lock();

        if let Some(bytes) = ledger.per_camera_memory.remove(camera_id) {
            ledger.per_camera_surfaces.remove(camera_id);
            let total = self.apply_delta(bytes, 0);
            self.check_limits(&mut ledger, total);
        }
    }

    /// Replace a camera's figures in place; degrades to [`register`]
    /// when the camera is unknown.
    ///
    /// [`register`]: VramAccountant::register
    pub fn update(&self, camera_id: &str, new_bytes: usize, new_surfaces: usize) {
        // Same substitution semantics either way.
        self.register(camera_id, new_bytes, new_surfaces);
    }

    pub fn stats(&self) -> VramStats {
        let ledger = self.ledger.lock();
        let total = self.total.load(Ordering::Relaxed);

        VramStats {
            total_allocated_bytes: total,
            peak_allocated_bytes: self.peak.load(Ordering::Relaxed),
            total_surface_count: ledger.per_camera_surfaces.values().sum(),
            per_camera_memory_bytes: ledger.per_camera_memory.clone(),
            per_camera_surface_count: ledger.per_camera_surfaces.clone(),
            utilization_percent: self.utilization(total),
        }
    }

    /// Advisory: would adding `additional_bytes` cross the ceiling?
    pub fn would_exceed_limit(&self, additional_bytes: usize) -> bool {
        self.total.load(Ordering::Relaxed) + additional_bytes > self.config.max_gpu_memory_bytes
    }

    /// Advisory: bytes remaining under the ceiling.
    pub fn available_memory(&self) -> usize {
        self.config
            .max_gpu_memory_bytes
            .saturating_sub(self.total.load(Ordering::Relaxed))
    }

    fn apply_delta(&self, removed: usize, added: usize) -> usize {
        let old_total = self.total.load(Ordering::Relaxed);
        let new_total = old_total.saturating_sub(removed) + added;
        self.total.store(new_total, Ordering::Relaxed);
        self.peak.fetch_max(new_total, Ordering::Relaxed);
        new_total
    }

    fn utilization(&self, total: usize) -> f64 {
        if self.config.max_gpu_memory_bytes == 0 {
            return 0.0;
        }
        total as f64 / self.config.max_gpu_memory_bytes as f64 * 100.0
    }

    /// Warn once each time utilization crosses 90%.
    fn check_limits(&self, ledger: &mut Ledger, total: usize) {
        if !self.config.enable_warnings {
            return;
        }
        let utilization = self.utilization(total);
        if utilization > 90.0 {
            if !ledger.warned {
                ledger.warned = true;
                warn!(
                    utilization = format!("{utilization:.1}%"),
                    used_mb = total / (1024 * 1024),
                    limit_mb = self.config.max_gpu_memory_bytes / (1024 * 1024),
                    "GPU memory utilization high"
                );
            }
        } else {
            ledger.warned = false;
        }
    }
}

impl std::fmt::Debug for VramAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VramAccountant")
            .field("total", &self.total.load(Ordering::Relaxed))
            .field("peak", &self.peak.load(Ordering::Relaxed))
            .field("limit", &self.config.max_gpu_memory_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accountant(limit: usize) -> VramAccountant {
        VramAccountant::new(VramConfig {
            max_gpu_memory_bytes: limit,
            enable_warnings: false,
        })
    }

    // ── Register / unregister ────────────────────────────────────

    #[test]
    fn totals_follow_registrations() {
        let acc = accountant(1000);
        acc.register("a", 100, 4);
        acc.register("b", 200, 8);

        let stats = acc.stats();
        assert_eq!(stats.total_allocated_bytes, 300);
        assert_eq!(stats.total_surface_count, 12);
        assert_eq!(stats.per_camera_memory_bytes["a"], 100);
        assert_eq!(stats.per_camera_memory_bytes["b"], 200);
    }

    #[test]
    fn total_equals_per_camera_sum_under_interleaving() {
        let acc = accountant(100_000);
        acc.register("a", 100, 2);
        acc.update("a", 300, 4);
        acc.register("b", 50, 2);
        acc.unregister("a");
        acc.register("a", 70, 2);
        acc.update("c", 10, 1); // unknown -> register
        acc.unregister("b");

        let stats = acc.stats();
        let sum: usize = stats.per_camera_memory_bytes.values().sum();
        assert_eq!(stats.total_allocated_bytes, sum);
        assert_eq!(sum, 80);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let acc = accountant(1000);
        acc.register("a", 100, 2);
        acc.unregister("ghost");
        assert_eq!(acc.stats().total_allocated_bytes, 100);
    }

    #[test]
    fn reregistering_replaces_rather_than_accumulates() {
        let acc = accountant(1000);
        acc.register("a", 100, 2);
        acc.register("a", 100, 2);
        assert_eq!(acc.stats().total_allocated_bytes, 100);
    }

    #[test]
    fn register_unregister_register_restores_snapshot() {
        let acc = accountant(1000);
        acc.register("a", 128, 4);
        let before = acc.stats();

        acc.unregister("a");
        acc.register("a", 128, 4);
        let after = acc.stats();

        assert_eq!(before, after);
    }

    // ── Peak ─────────────────────────────────────────────────────

    #[test]
    fn peak_is_monotonic() {
        let acc = accountant(10_000);
        acc.register("a", 500, 4);
        assert_eq!(acc.stats().peak_allocated_bytes, 500);

        acc.unregister("a");
        assert_eq!(acc.stats().peak_allocated_bytes, 500);

        acc.register("b", 300, 2);
        assert_eq!(acc.stats().peak_allocated_bytes, 500);

        acc.register("c", 400, 2);
        assert_eq!(acc.stats().peak_allocated_bytes, 700);
    }

    // ── Advisory queries ─────────────────────────────────────────

    #[test]
    fn limit_checks() {
        let acc = accountant(1000);
        acc.register("a", 800, 4);

        assert!(!acc.would_exceed_limit(200));
        assert!(acc.would_exceed_limit(201));
        assert_eq!(acc.available_memory(), 200);

        acc.register("b", 300, 2);
        assert_eq!(acc.available_memory(), 0);
    }

    #[test]
    fn utilization_percent() {
        let acc = accountant(1000);
        acc.register("a", 250, 2);
        let stats = acc.stats();
        assert!((stats.utilization_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn quality_change_updates_in_place() {
        // Grid (4 surfaces) -> Fullscreen (12 surfaces) grows the ledger.
        let acc = accountant(usize::MAX);
        let surface_bytes = 1920 * 1080 * 3 / 2;

        acc.register("cam", surface_bytes * 4, 4);
        let before = acc.stats().total_allocated_bytes;

        acc.update("cam", surface_bytes * 12, 12);
        let stats = acc.stats();
        assert!(stats.total_allocated_bytes > before);
        assert_eq!(stats.per_camera_surface_count["cam"], 12);
    }
}
