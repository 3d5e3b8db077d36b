//! Fleet metrics
//!
//! Prometheus-compatible counters, gauges and latency histograms for the
//! coordinator: probes, evictions, autoscaling and snapshot fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets
    pub fn new() -> Self {
        let boundaries = LATENCY_BUCKETS.to_vec();
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a duration
    pub fn observe(&self, elapsed: Duration) {
        let value = elapsed.as_secs_f64() * 1000.0;
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // microseconds, for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative buckets, `+Inf` last
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    /// Sum of all observed values, in milliseconds
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Coordinator metrics registry
#[derive(Debug)]
pub struct FleetMetrics {
    pub probes_total: Counter,
    pub probe_failures: Counter,
    pub nodes_evicted: Counter,
    pub clients_reassigned: Counter,
    pub clients_orphaned: Counter,
    pub scale_ups: Counter,
    pub scale_downs: Counter,
    pub spawn_failures: Counter,
    pub stop_failures: Counter,
    pub snapshots_delivered: Counter,
    pub snapshots_failed: Counter,
    pub lock_timeouts: Counter,

    pub fleet_size: Gauge,
    pub client_sessions: Gauge,

    pub probe_latency: Histogram,
    pub fanout_latency: Histogram,

    start_time: Instant,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self {
            probes_total: Counter::new(),
            probe_failures: Counter::new(),
            nodes_evicted: Counter::new(),
            clients_reassigned: Counter::new(),
            clients_orphaned: Counter::new(),
            scale_ups: Counter::new(),
            scale_downs: Counter::new(),
            spawn_failures: Counter::new(),
            stop_failures: Counter::new(),
            snapshots_delivered: Counter::new(),
            snapshots_failed: Counter::new(),
            lock_timeouts: Counter::new(),
            fleet_size: Gauge::new(),
            client_sessions: Gauge::new(),
            probe_latency: Histogram::new(),
            fanout_latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 12] = [
            ("probes_total", "Liveness probes sent", &self.probes_total),
            ("probe_failures_total", "Liveness probes that failed", &self.probe_failures),
            ("nodes_evicted_total", "Nodes evicted after a failed probe", &self.nodes_evicted),
            ("clients_reassigned_total", "Client sessions moved to another node", &self.clients_reassigned),
            ("clients_orphaned_total", "Client sessions left without a node", &self.clients_orphaned),
            ("scale_ups_total", "Workers added by the autoscaler", &self.scale_ups),
            ("scale_downs_total", "Idle workers retired by the autoscaler", &self.scale_downs),
            ("spawn_failures_total", "Worker starts that failed", &self.spawn_failures),
            ("stop_failures_total", "Worker stops that failed", &self.stop_failures),
            ("snapshots_delivered_total", "Snapshots applied by a peer", &self.snapshots_delivered),
            ("snapshots_failed_total", "Snapshots a peer rejected or timed out on", &self.snapshots_failed),
            ("lock_timeouts_total", "Bounded lock acquisitions that gave up", &self.lock_timeouts),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP fleetlb_{} {}", name, help);
            let _ = writeln!(out, "# TYPE fleetlb_{} counter", name);
            let _ = writeln!(out, "fleetlb_{} {}", name, counter.get());
        }

        let gauges: [(&str, &str, u64); 3] = [
            ("fleet_size", "Registered nodes", self.fleet_size.get()),
            ("client_sessions", "Routed client sessions", self.client_sessions.get()),
            ("uptime_seconds", "Coordinator uptime in seconds", self.uptime_seconds()),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP fleetlb_{} {}", name, help);
            let _ = writeln!(out, "# TYPE fleetlb_{} gauge", name);
            let _ = writeln!(out, "fleetlb_{} {}", name, value);
        }

        let histograms = [
            ("probe_duration_ms", "Liveness probe duration", &self.probe_latency),
            ("fanout_duration_ms", "Snapshot fan-out duration", &self.fanout_latency),
        ];
        for (name, help, hist) in histograms {
            let _ = writeln!(out, "# HELP fleetlb_{} {}", name, help);
            let _ = writeln!(out, "# TYPE fleetlb_{} histogram", name);
            for (le, count) in hist.get_buckets() {
                if le.is_infinite() {
                    let _ = writeln!(out, "fleetlb_{}_bucket{{le=\"+Inf\"}} {}", name, count);
                } else {
                    let _ = writeln!(out, "fleetlb_{}_bucket{{le=\"{}\"}} {}", name, le, count);
                }
            }
            let _ = writeln!(out, "fleetlb_{}_sum {}", name, hist.sum());
            let _ = writeln!(out, "fleetlb_{}_count {}", name, hist.count());
        }

        out
    }
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram() {
        let hist = Histogram::new();

        hist.observe(Duration::from_millis(5));
        hist.observe(Duration::from_millis(50));
        hist.observe(Duration::from_secs(10));

        assert_eq!(hist.count(), 3);

        let buckets = hist.get_buckets();
        assert_eq!(buckets.len(), LATENCY_BUCKETS.len() + 1);
        // 10s lands only in +Inf
        assert_eq!(buckets[buckets.len() - 2].1, 2);
        assert_eq!(buckets[buckets.len() - 1].1, 3);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = FleetMetrics::new();
        metrics.scale_ups.inc();
        metrics.fleet_size.set(3);

        let out = metrics.to_prometheus();
        assert!(out.contains("fleetlb_scale_ups_total 1"));
        assert!(out.contains("fleetlb_fleet_size 3"));
        assert!(out.contains("fleetlb_fanout_duration_ms_bucket{le=\"+Inf\"} 0"));
    }
}
