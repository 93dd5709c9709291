use crate::snapshot::{InstanceMetrics, MethodMetrics, MetricsSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Instant, SystemTime};

/// Bucket `i` holds latencies in `[2^(i-1), 2^i)` microseconds; the last
/// bucket also absorbs everything above.
const NUM_BUCKETS: usize = 40;

/// Limits on the number of distinct keys a registry tracks.
///
/// When a limit is reached, the least recently touched entry is evicted to
/// make room for a new one.
///
/// # Example
///
/// ```rust
/// use wirerpc_metrics::MetricsConfig;
///
/// let config = MetricsConfig {
///     max_methods: 500,
///     max_instances: 50,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Maximum number of distinct `service.method` keys
    pub max_methods: usize,
    /// Maximum number of distinct instance addresses (client side)
    pub max_instances: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_methods: 1000,
            max_instances: 100,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Power-of-two latency histogram.
///
/// Recording is a handful of relaxed atomic adds; percentiles are reported
/// as the upper bound of the bucket that contains them, so they are within
/// a factor of two of the true value.
#[derive(Debug)]
struct LatencyHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    total_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            total_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    fn bucket_for(latency_us: u64) -> usize {
        ((u64::BITS - latency_us.leading_zeros()) as usize).min(NUM_BUCKETS - 1)
    }

    fn bucket_upper_bound(bucket: usize) -> u64 {
        if bucket == 0 {
            0
        } else {
            (1u64 << bucket) - 1
        }
    }

    fn record(&self, latency_us: u64) {
        self.buckets[Self::bucket_for(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(latency_us, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    fn percentile(&self, samples: u64, percentile: u64) -> u64 {
        // Rank of the sample at this percentile, 1-based
        let target = ((samples * percentile).div_ceil(100)).max(1);
        let mut seen = 0;
        for (bucket, count) in self.buckets.iter().enumerate() {
            seen += count.load(Ordering::Relaxed);
            if seen >= target {
                return Self::bucket_upper_bound(bucket);
            }
        }
        Self::bucket_upper_bound(NUM_BUCKETS - 1)
    }

    /// `(avg, p50, p95, p99)` in microseconds, all zero without samples.
    fn summary(&self) -> (u64, u64, u64, u64) {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return (0, 0, 0, 0);
        }
        let avg = self.total_us.load(Ordering::Relaxed) / samples;
        (
            avg,
            self.percentile(samples, 50),
            self.percentile(samples, 95),
            self.percentile(samples, 99),
        )
    }
}

#[derive(Debug)]
struct MethodStats {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    latencies: LatencyHistogram,
    last_touch: AtomicU64,
}

impl MethodStats {
    fn new(tick: u64) -> Self {
        Self {
            calls: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            last_touch: AtomicU64::new(tick),
        }
    }

    fn record(&self, latency_us: u64, success: bool, tick: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.latencies.record(latency_us);
        self.last_touch.store(tick, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MethodMetrics {
        let (avg_latency_us, p50_latency_us, p95_latency_us, p99_latency_us) =
            self.latencies.summary();
        MethodMetrics {
            call_count: self.calls.load(Ordering::Relaxed),
            success_count: self.successes.load(Ordering::Relaxed),
            failure_count: self.failures.load(Ordering::Relaxed),
            avg_latency_us,
            p50_latency_us,
            p95_latency_us,
            p99_latency_us,
        }
    }
}

#[derive(Debug)]
struct InstanceStats {
    requests: AtomicU64,
    failures: AtomicU64,
    last_request_ms: AtomicU64,
    last_touch: AtomicU64,
}

impl InstanceStats {
    fn new(tick: u64) -> Self {
        Self {
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_request_ms: AtomicU64::new(0),
            last_touch: AtomicU64::new(tick),
        }
    }

    fn record(&self, success: bool, tick: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_request_ms.store(now_ms(), Ordering::Relaxed);
        self.last_touch.store(tick, Ordering::Relaxed);
    }

    fn snapshot(&self, address: &str) -> InstanceMetrics {
        InstanceMetrics {
            address: address.to_string(),
            request_count: self.requests.load(Ordering::Relaxed),
            failure_count: self.failures.load(Ordering::Relaxed),
            last_request_ms: self.last_request_ms.load(Ordering::Relaxed),
        }
    }
}

trait Touched {
    fn last_touch(&self) -> u64;
}

impl Touched for MethodStats {
    fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Relaxed)
    }
}

impl Touched for InstanceStats {
    fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Relaxed)
    }
}

/// Returns the entry for `key`, creating it (and evicting the least recently
/// touched entry if the map is full) when missing.
fn entry<T: Touched>(
    map: &RwLock<HashMap<String, Arc<T>>>,
    key: &str,
    limit: usize,
    create: impl FnOnce() -> T,
) -> Arc<T> {
    if let Some(stats) = map.read().unwrap_or_else(PoisonError::into_inner).get(key) {
        return Arc::clone(stats);
    }

    let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(stats) = map.get(key) {
        return Arc::clone(stats);
    }
    if map.len() >= limit.max(1) {
        let oldest = map
            .iter()
            .min_by_key(|(_, stats)| stats.last_touch())
            .map(|(name, _)| name.clone());
        if let Some(oldest) = oldest {
            map.remove(&oldest);
        }
    }
    let stats = Arc::new(create());
    map.insert(key.to_string(), Arc::clone(&stats));
    stats
}

/// Thread-safe call statistics.
///
/// Counters are lock-free atomics; the per-method and per-instance maps sit
/// behind `RwLock`s that are only written when a new key shows up.
///
/// # Example
///
/// ```rust
/// use wirerpc_metrics::MetricsRegistry;
///
/// let registry = MetricsRegistry::new();
/// registry.record_method_call("EchoService.echo", 150, true);
///
/// let snapshot = registry.snapshot(false);
/// assert_eq!(snapshot.total_requests, 1);
/// ```
#[derive(Debug)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicU64,
    methods: RwLock<HashMap<String, Arc<MethodStats>>>,
    instances: RwLock<HashMap<String, Arc<InstanceStats>>>,
    /// Logical clock ordering accesses for eviction
    clock: AtomicU64,
    start_time: Instant,
    config: MetricsConfig,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            methods: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            start_time: Instant::now(),
            config,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Records one finished call.
    pub fn record_method_call(&self, method: &str, latency_us: u64, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let tick = self.tick();
        let stats = entry(&self.methods, method, self.config.max_methods, || {
            MethodStats::new(tick)
        });
        stats.record(latency_us, success, tick);
    }

    /// Records one request sent to the instance at `address`.
    pub fn record_instance_request(&self, address: &str, success: bool) {
        let tick = self.tick();
        let stats = entry(&self.instances, address, self.config.max_instances, || {
            InstanceStats::new(tick)
        });
        stats.record(success, tick);
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn method_count(&self) -> usize {
        self.methods.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Point-in-time copy of every counter.
    ///
    /// Counters are read individually, so a snapshot taken under load may
    /// be off by the calls finishing while it is taken.
    pub fn snapshot(&self, include_instances: bool) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::new(self.uptime_ms(), include_instances);
        snapshot.total_requests = self.total_requests.load(Ordering::Relaxed);
        snapshot.successful_requests = self.successful_requests.load(Ordering::Relaxed);
        snapshot.failed_requests = self.failed_requests.load(Ordering::Relaxed);
        snapshot.active_connections = self.active_connections.load(Ordering::Relaxed);

        snapshot.methods = self
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect();

        if let Some(instances) = snapshot.instances.as_mut() {
            *instances = self
                .instances
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(address, stats)| (address.clone(), stats.snapshot(address)))
                .collect();
        }

        snapshot
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
