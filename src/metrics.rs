// Run metrics module
//
// Lock-free counters for engine passes and target outcomes, logged at the end
// of a run

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every controller of a run.
///
/// Uses atomic operations so one instance can be shared through an `Arc`
/// without locking.
#[derive(Debug)]
pub struct RunMetrics {
    /// Targets that produced an imaging result
    pub targets_imaged: AtomicUsize,

    /// Targets that ended with an error
    pub targets_failed: AtomicUsize,

    /// Engine passes issued, dirty images included
    pub engine_passes: AtomicU64,

    /// Wall time spent inside engine passes in milliseconds
    pub engine_time_ms: AtomicU64,

    /// Automask fallbacks that switched the masking mode
    pub masking_fallbacks: AtomicU64,

    /// Stale products that could not be removed
    pub cleanup_failures: AtomicU64,

    /// Moment images created
    pub moment_maps: AtomicU64,

    start_time: Instant,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            targets_imaged: AtomicUsize::new(0),
            targets_failed: AtomicUsize::new(0),
            engine_passes: AtomicU64::new(0),
            engine_time_ms: AtomicU64::new(0),
            masking_fallbacks: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
            moment_maps: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_target_imaged(&self) {
        self.targets_imaged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_target_failed(&self) {
        self.targets_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one engine pass and the time it took
    pub fn record_pass(&self, duration: Duration) {
        self.engine_passes.fetch_add(1, Ordering::Relaxed);
        self.engine_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.masking_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cleanup_failures(&self, count: usize) {
        self.cleanup_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_moment_maps(&self, count: u64) {
        self.moment_maps.fetch_add(count, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average engine time per pass in milliseconds
    pub fn avg_pass_time_ms(&self) -> f64 {
        let total = self.engine_time_ms.load(Ordering::Relaxed);
        let count = self.engine_passes.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Imaging Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Targets: {} imaged, {} failed",
            self.targets_imaged.load(Ordering::Relaxed),
            self.targets_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Engine passes: {} in {:.2}s (avg: {:.2}ms per pass)",
            self.engine_passes.load(Ordering::Relaxed),
            self.engine_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_pass_time_ms()
        );
        tracing::info!(
            "Masking fallbacks: {}, cleanup failures: {}, moment maps: {}",
            self.masking_fallbacks.load(Ordering::Relaxed),
            self.cleanup_failures.load(Ordering::Relaxed),
            self.moment_maps.load(Ordering::Relaxed)
        );
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}
