//! Prometheus metrics for the swapper.
//!
//! Each [`SwapMetrics`] owns its own registry, so several swappers (or tests)
//! can coexist in one process. The handle is cheap to clone and safe to read
//! from other threads while the owner thread updates it.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Counters and gauges updated by the swapper.
#[derive(Clone)]
pub struct SwapMetrics {
    registry: Registry,
    pub hits: IntCounter,
    pub misses: IntCounter,
    pub disk_reads: IntCounter,
    pub background_loads: IntCounter,
    pub write_backs: IntCounter,
    pub evictions: IntCounter,
    pub timeouts: IntCounter,
    pub task_failures: IntCounter,
    pub resident_experts: IntGauge,
    pub pending_operations: IntGauge,
}

/// Serializable snapshot of [`SwapMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwapStats {
    pub hits: u64,
    pub misses: u64,
    pub disk_reads: u64,
    pub background_loads: u64,
    pub write_backs: u64,
    pub evictions: u64,
    pub timeouts: u64,
    pub task_failures: u64,
    pub resident_experts: i64,
    pub pending_operations: i64,
}

impl SwapStats {
    /// Fraction of lookups served from RAM.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

impl SwapMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("expert_swap".to_string()), None)?;

        Ok(Self {
            hits: counter(&registry, "cache_hits_total", "Lookups served from RAM")?,
            misses: counter(&registry, "cache_misses_total", "Lookups not resident in RAM")?,
            disk_reads: counter(&registry, "disk_reads_total", "Synchronous disk loads")?,
            background_loads: counter(&registry, "background_loads_total", "Background loads issued")?,
            write_backs: counter(&registry, "write_backs_total", "Disk writes issued (async and sync)")?,
            evictions: counter(&registry, "evictions_total", "LRU evictions")?,
            timeouts: counter(&registry, "timeouts_total", "get() deadlines that expired")?,
            task_failures: counter(&registry, "task_failures_total", "Failed background I/O tasks")?,
            resident_experts: gauge(&registry, "resident_experts", "Experts resident in RAM")?,
            pending_operations: gauge(&registry, "pending_operations", "In-flight I/O tasks")?,
            registry,
        })
    }

    pub fn snapshot(&self) -> SwapStats {
        SwapStats {
            hits: self.hits.get(),
            misses: self.misses.get(),
            disk_reads: self.disk_reads.get(),
            background_loads: self.background_loads.get(),
            write_backs: self.write_backs.get(),
            evictions: self.evictions.get(),
            timeouts: self.timeouts.get(),
            task_failures: self.task_failures.get(),
            resident_experts: self.resident_experts.get(),
            pending_operations: self.pending_operations.get(),
        }
    }

    /// Prometheus text exposition of all metrics.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl std::fmt::Debug for SwapMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SwapMetrics").field(&self.snapshot()).finish()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let metrics = SwapMetrics::new().unwrap();
        metrics.hits.inc_by(3);
        metrics.misses.inc();
        metrics.resident_experts.set(2);

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.resident_experts, 2);
        assert!((stats.hit_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_encode_uses_namespace() {
        let metrics = SwapMetrics::new().unwrap();
        metrics.evictions.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("expert_swap_evictions_total 1"));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = SwapMetrics::new().unwrap();
        let view = metrics.clone();
        metrics.write_backs.inc();
        assert_eq!(view.snapshot().write_backs, 1);
    }
}
