use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};
use wirerpc_common::discovery::ServiceRegistry;
use wirerpc_common::protocol::{
    CorrelationIdGenerator, Request, Result, RpcError, ServiceInstance,
};
use wirerpc_common::transport::{CodecConfig, TcpTransportAsync};

use crate::memory::InMemoryRegistry;

/// Method probed on every instance
pub const PROBE_METHOD: &str = "_info";

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    /// Failed probes an evicted instance gets before it is forgotten
    pub forget_after: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_millis(2000),
            failure_threshold: 3,
            forget_after: 20,
        }
    }
}

#[derive(Debug, Default)]
struct Tracked {
    failures: u32,
    evicted: bool,
}

/// Keeps an [`InMemoryRegistry`] in line with which instances answer.
///
/// Each round probes every registered instance, plus the ones this checker
/// evicted earlier, with an `_info` call. After `failure_threshold`
/// consecutive failures an instance is deregistered; the first successful
/// probe afterwards registers it again. Instances deregistered by someone
/// else are forgotten, and so is an evicted instance once it has failed
/// `forget_after` more probes.
pub struct HealthChecker {
    registry: Arc<InMemoryRegistry>,
    transport: TcpTransportAsync,
    ids: CorrelationIdGenerator,
    config: HealthCheckConfig,
    tracked: Mutex<HashMap<ServiceInstance, Tracked>>,
}

impl HealthChecker {
    pub fn new(registry: Arc<InMemoryRegistry>, config: HealthCheckConfig) -> Self {
        Self {
            registry,
            transport: TcpTransportAsync::new(CodecConfig::default(), config.timeout),
            ids: CorrelationIdGenerator::new(),
            config,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the health check loop.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// Runs one round of probes and applies the results.
    pub async fn check_all(&self) {
        let targets = self.targets();

        let checks = targets.into_iter().map(|instance| async move {
            let result = self.probe(&instance).await;
            (instance, result)
        });
        let results = futures::future::join_all(checks).await;

        for (instance, result) in results {
            self.apply(instance, result);
        }
    }

    /// Registered instances plus evicted ones, with stale entries dropped.
    fn targets(&self) -> Vec<ServiceInstance> {
        let registered = self.registry.all_instances();
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);

        tracked.retain(|instance, state| state.evicted || registered.contains(instance));

        let mut targets = registered;
        targets.extend(
            tracked
                .iter()
                .filter(|(_, state)| state.evicted)
                .map(|(instance, _)| instance.clone()),
        );
        targets
    }

    async fn probe(&self, instance: &ServiceInstance) -> Result<()> {
        let timeout = self.config.timeout;
        let attempt = async {
            let mut stream = self.transport.connect(&instance.address()).await?;
            let request = Request::new(self.ids.next_id(), instance.service_name(), PROBE_METHOD);
            let response = self.transport.send_request(&mut stream, &request).await?;
            response.into_result().map(|_| ())
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                correlation_id: format!("probe:{}", instance),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn apply(&self, instance: ServiceInstance, result: Result<()>) {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let state = tracked.entry(instance.clone()).or_default();

        match result {
            Ok(()) => {
                state.failures = 0;
                if state.evicted {
                    state.evicted = false;
                    if let Err(e) = self.registry.register(instance.clone()) {
                        warn!(instance = %instance, error = %e, "Failed to restore instance");
                        return;
                    }
                    info!(instance = %instance, "Instance restored after health check recovery");
                }
            }
            Err(e) => {
                state.failures = state.failures.saturating_add(1);
                if state.evicted
                    && state.failures
                        >= self
                            .config
                            .failure_threshold
                            .saturating_add(self.config.forget_after)
                {
                    // Given up on; never probed or restored again
                    tracked.remove(&instance);
                    info!(instance = %instance, "Forgetting evicted instance");
                    return;
                }
                if !state.evicted && state.failures >= self.config.failure_threshold {
                    state.evicted = true;
                    if let Err(err) = self.registry.deregister(&instance) {
                        warn!(instance = %instance, error = %err, "Failed to evict instance");
                        return;
                    }
                    warn!(
                        instance = %instance,
                        failures = state.failures,
                        error = %e,
                        "Instance evicted after consecutive health check failures"
                    );
                }
            }
        }
    }

    pub fn consecutive_failures(&self, instance: &ServiceInstance) -> u32 {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance)
            .map_or(0, |state| state.failures)
    }

    /// Instances currently removed from the registry by this checker.
    pub fn evicted(&self) -> Vec<ServiceInstance> {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, state)| state.evicted)
            .map(|(instance, _)| instance.clone())
            .collect()
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }
}
