//! Scaling module — load-driven replica autoscaling
//!
//! Samples ongoing-request counts into sliding windows, evaluates a
//! hysteretic policy against a per-replica target, and actuates the
//! resulting decisions through a pluggable executor.

pub mod autoscaler;
pub mod executor;
pub mod window;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::AutoscalingConfig;
use crate::engine::EngineProxy;
use crate::error::{Result, ServingError};
use crate::scaling::autoscaler::ReplicaAutoscaler;
use crate::scaling::executor::{ScaleExecutor, ScaleResult};
use crate::scaling::window::ReplicaMetric;

/// Async source of replica load samples
#[async_trait]
pub trait ReplicaMetricsSource: Send + Sync {
    /// Take one sample per visible replica
    async fn sample(&self) -> Result<Vec<ReplicaMetric>>;

    /// Source name (for logging)
    fn name(&self) -> &str;
}

/// Metrics source reading the in-process engine proxy of this replica
pub struct LocalMetricsSource {
    /// Identity this replica reports under
    replica_id: u32,
    /// Proxy whose ongoing-request gauge is sampled
    proxy: Arc<EngineProxy>,
}

impl LocalMetricsSource {
    /// Create a source that samples the given proxy
    pub fn new(replica_id: u32, proxy: Arc<EngineProxy>) -> Self {
        Self { replica_id, proxy }
    }
}

#[async_trait]
impl ReplicaMetricsSource for LocalMetricsSource {
    async fn sample(&self) -> Result<Vec<ReplicaMetric>> {
        Ok(vec![ReplicaMetric {
            replica_id: self.replica_id,
            ongoing_request_count: self.proxy.ongoing_request_count(),
            sampled_at: Instant::now(),
        }])
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Metrics source polling the control plane for every replica in the group
pub struct HttpMetricsSource {
    /// Base URL of the control plane
    base_url: String,
    /// HTTP client
    client: reqwest::Client,
}

impl HttpMetricsSource {
    /// Create a source polling the given control plane
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

/// Wire format of one replica's load report
#[derive(Debug, Deserialize)]
struct ReplicaMetricWire {
    replica_id: u32,
    ongoing_request_count: usize,
}

#[async_trait]
impl ReplicaMetricsSource for HttpMetricsSource {
    async fn sample(&self) -> Result<Vec<ReplicaMetric>> {
        let url = format!("{}/v1/replicas/metrics", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            ServingError::Scaling(format!("Replica metrics query failed: {}", e))
        })?;

        if !resp.status().is_success() {
            return Err(ServingError::Scaling(format!(
                "Replica metrics query returned {}",
                resp.status()
            )));
        }

        let reports = resp.json::<Vec<ReplicaMetricWire>>().await.map_err(|e| {
            ServingError::Scaling(format!("Failed to parse replica metrics: {}", e))
        })?;

        let now = Instant::now();
        Ok(reports
            .into_iter()
            .map(|r| ReplicaMetric {
                replica_id: r.replica_id,
                ongoing_request_count: r.ongoing_request_count,
                sampled_at: now,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "control-plane"
    }
}

/// Periodic autoscaling loop: sample, evaluate, actuate.
///
/// Each cycle pulls fresh load samples from the metrics source, feeds them
/// to the autoscaler, and hands any resulting decision to the executor.
/// Cycle failures are logged and the loop continues.
pub struct AutoscalingController {
    /// Decision engine
    autoscaler: Mutex<ReplicaAutoscaler>,
    /// Where load samples come from
    source: Arc<dyn ReplicaMetricsSource>,
    /// Where decisions are actuated
    executor: Arc<dyn ScaleExecutor>,
    /// Sampling interval
    interval: Duration,
    /// Replica group under management
    group: String,
}

impl AutoscalingController {
    /// Create a controller for the given policy, source, and executor
    pub fn new(
        policy: AutoscalingConfig,
        source: Arc<dyn ReplicaMetricsSource>,
        executor: Arc<dyn ScaleExecutor>,
    ) -> Self {
        let interval = Duration::from_secs(policy.metrics_interval_secs);
        let group = policy.group.clone();
        Self {
            autoscaler: Mutex::new(ReplicaAutoscaler::new(policy)),
            source,
            executor,
            interval,
            group,
        }
    }

    /// One sampling and evaluation cycle.
    ///
    /// Returns the executor's result when a decision fired, `None` otherwise.
    pub async fn tick(&self, now: Instant) -> Result<Option<ScaleResult>> {
        let samples = self.source.sample().await?;

        let decision = {
            let mut autoscaler = self.autoscaler.lock().unwrap();
            for sample in samples {
                autoscaler.record(sample);
            }
            autoscaler.evaluate(now)
        };

        let Some(decision) = decision else {
            return Ok(None);
        };

        info!(
            group = %decision.group,
            direction = %decision.direction,
            current = decision.current_replicas,
            desired = decision.desired_replicas,
            reason = %decision.reason,
            "Scaling decision"
        );

        match self.executor.execute(&decision).await {
            Ok(result) => {
                if result.actual_replicas != decision.desired_replicas {
                    self.autoscaler
                        .lock()
                        .unwrap()
                        .set_current_replicas(result.actual_replicas);
                }
                info!(
                    group = %self.group,
                    accepted = result.accepted,
                    replicas = result.actual_replicas,
                    "Scaling executed"
                );
                Ok(Some(result))
            }
            Err(e) => {
                // Roll back so the next cycle can retry the same step.
                self.autoscaler
                    .lock()
                    .unwrap()
                    .set_current_replicas(decision.current_replicas);
                Err(e)
            }
        }
    }

    /// Run the controller until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            group = %self.group,
            source = self.source.name(),
            executor = self.executor.name(),
            interval_secs = self.interval.as_secs(),
            "Autoscaling controller started"
        );

        // Sync with the actuator's view of the group before the first cycle.
        match self.executor.current_replicas(&self.group).await {
            Ok(replicas) if replicas > 0 => {
                self.autoscaler.lock().unwrap().set_current_replicas(replicas);
            }
            Ok(_) => {}
            Err(e) => warn!(group = %self.group, "Replica count sync failed: {}", e),
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        warn!(group = %self.group, "Autoscaling cycle failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!(group = %self.group, "Autoscaling controller stopped");
                        return;
                    }
                }
            }
        }
    }
}
