//! Replica orchestrator — high-level coordinator for one serving instance
//!
//! Ties together configuration, the engine proxy, request admission, the
//! HTTP entrypoint, and the optional autoscaling controller into a single
//! manageable unit.

use crate::admission::{HeuristicTokenCounter, RequestAdmission};
use crate::config::{AutoscalingConfig, ServingConfig};
use crate::engine::{EngineProxy, HttpEngine};
use crate::entrypoint;
use crate::error::{Result, ServingError};
use crate::observability::ServingMetrics;
use crate::scaling::executor::{HttpScaleExecutor, ScaleExecutor};
use crate::scaling::{AutoscalingController, HttpMetricsSource, ReplicaMetricsSource};
use crate::{HealthStatus, ReplicaState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::watch;

/// The main serving replica — coordinates all components
pub struct Replica {
    /// Validated configuration
    config: Arc<ServingConfig>,
    /// Replica runtime state
    state: Arc<RwLock<ReplicaState>>,
    /// Start time
    start_time: Instant,
    /// Shutdown flag
    shutdown: Arc<AtomicBool>,
    /// Broadcasts shutdown to background loops
    shutdown_tx: watch::Sender<bool>,
    /// Metrics collector
    metrics: Arc<ServingMetrics>,
    /// Request admission
    admission: Arc<RequestAdmission>,
    /// Shared engine proxy
    proxy: Arc<EngineProxy>,
    /// Active background task handles
    handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
}

impl Replica {
    /// Create a new replica from configuration
    pub fn new(config: ServingConfig) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(ServingMetrics::new());
        let admission = Arc::new(RequestAdmission::new(
            config.admission.clone(),
            Arc::new(HeuristicTokenCounter),
            metrics.clone(),
        ));
        let engine = Arc::new(HttpEngine::new(config.engine.endpoint.clone()));
        let proxy = Arc::new(EngineProxy::new(
            engine,
            config.engine.clone(),
            metrics.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(ReplicaState::Created)),
            start_time: Instant::now(),
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            metrics,
            admission,
            proxy,
            handles: RwLock::new(Vec::new()),
        })
    }

    /// Start the replica — initializes the engine and begins accepting requests
    pub async fn start(&self) -> Result<()> {
        self.set_state(ReplicaState::Starting);

        // Engine initialization is fatal on failure; a replica without a
        // working engine must not accept requests.
        self.proxy.initialize().await?;

        let addr: SocketAddr = self.config.server.listen_addr.parse().map_err(|e| {
            ServingError::Config(format!(
                "Invalid server.listen_addr '{}': {}",
                self.config.server.listen_addr, e
            ))
        })?;

        let serving_state = Arc::new(entrypoint::ServingState {
            config: self.config.clone(),
            replica_state: self.state.clone(),
            start_time: self.start_time,
            admission: self.admission.clone(),
            proxy: self.proxy.clone(),
            metrics: self.metrics.clone(),
        });

        let mut new_handles = vec![entrypoint::start_http_entrypoint(addr, serving_state).await?];

        if self.config.autoscaling.enabled {
            new_handles.push(self.start_autoscaling(&self.config.autoscaling).await?);
            tracing::info!(group = %self.config.autoscaling.group, "Autoscaling enabled");
        }

        let mut handles = self.handles.write().unwrap();
        *handles = new_handles;

        self.set_state(ReplicaState::Running);
        tracing::info!(model = %self.config.engine.model_id, "Replica is running");

        Ok(())
    }

    /// Spawn the autoscaling controller for this replica's group.
    ///
    /// Samples group load through the control plane so the decision sees
    /// every replica, not just this one.
    async fn start_autoscaling(
        &self,
        policy: &AutoscalingConfig,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let source: Arc<dyn ReplicaMetricsSource> =
            Arc::new(HttpMetricsSource::new(policy.control_plane_url.clone()));

        let executor: Arc<dyn ScaleExecutor> = match policy.executor.as_str() {
            "http" => Arc::new(HttpScaleExecutor::new(policy.control_plane_url.clone())),
            #[cfg(feature = "kube")]
            "k8s" => Arc::new(crate::scaling::executor::K8sScaleExecutor::new("default").await?),
            #[cfg(not(feature = "kube"))]
            "k8s" => {
                return Err(ServingError::Config(
                    "autoscaling.executor 'k8s' requires the 'kube' feature".to_string(),
                ));
            }
            other => {
                return Err(ServingError::Config(format!(
                    "autoscaling.executor '{}' is not one of: http, k8s",
                    other
                )));
            }
        };

        let controller = Arc::new(AutoscalingController::new(
            policy.clone(),
            source,
            executor,
        ));
        Ok(tokio::spawn(controller.run(self.shutdown_tx.subscribe())))
    }

    /// Initiate graceful shutdown
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return; // Already shutting down
        }

        self.set_state(ReplicaState::Stopping);
        tracing::info!("Replica shutting down");

        let _ = self.shutdown_tx.send(true);

        // Abort background tasks; in-flight request tasks drain on their own.
        let mut handles = self.handles.write().unwrap();
        for handle in handles.drain(..) {
            handle.abort();
        }

        self.set_state(ReplicaState::Stopped);
        tracing::info!("Replica stopped");
    }

    /// Wait for a shutdown signal (Ctrl+C)
    pub async fn wait_for_shutdown(&self) {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        self.shutdown().await;
    }

    /// Get the current replica state
    pub fn state(&self) -> ReplicaState {
        self.state.read().unwrap().clone()
    }

    /// Get a health status snapshot
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            state: self.state(),
            model_id: self.config.engine.model_id.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ongoing_requests: self.proxy.ongoing_request_count(),
            admitted_requests: self.metrics.admitted_requests(),
        }
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> &Arc<ServingMetrics> {
        &self.metrics
    }

    /// Get the engine proxy
    pub fn proxy(&self) -> &Arc<EngineProxy> {
        &self.proxy
    }

    /// Get the current configuration
    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    /// Check if the replica is running
    pub fn is_running(&self) -> bool {
        self.state() == ReplicaState::Running
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn set_state(&self, new_state: ReplicaState) {
        let mut state = self.state.write().unwrap();
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> ServingConfig {
        let mut config = ServingConfig::default();
        config.engine.model_id = "facebook/opt-125m".to_string();
        config
    }

    // --- Replica construction ---

    #[test]
    fn test_replica_new() {
        let replica = Replica::new(minimal_config()).unwrap();
        assert_eq!(replica.state(), ReplicaState::Created);
        assert!(!replica.is_running());
        assert!(!replica.is_shutdown());
    }

    #[test]
    fn test_replica_new_invalid_config() {
        // Missing model id fails validation.
        let result = Replica::new(ServingConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_replica_new_invalid_listen_addr() {
        let mut config = minimal_config();
        config.server.listen_addr = "not-an-addr".to_string();
        assert!(Replica::new(config).is_err());
    }

    // --- Health ---

    #[test]
    fn test_replica_health() {
        let replica = Replica::new(minimal_config()).unwrap();
        let health = replica.health();
        assert_eq!(health.state, ReplicaState::Created);
        assert_eq!(health.model_id, "facebook/opt-125m");
        assert_eq!(health.ongoing_requests, 0);
        assert_eq!(health.admitted_requests, 0);
    }

    // --- State transitions ---

    #[test]
    fn test_state_transitions() {
        let replica = Replica::new(minimal_config()).unwrap();
        assert_eq!(replica.state(), ReplicaState::Created);

        replica.set_state(ReplicaState::Starting);
        assert_eq!(replica.state(), ReplicaState::Starting);

        replica.set_state(ReplicaState::Running);
        assert!(replica.is_running());

        replica.set_state(ReplicaState::Stopping);
        assert!(!replica.is_running());

        replica.set_state(ReplicaState::Stopped);
        assert_eq!(replica.state(), ReplicaState::Stopped);
    }

    // --- Shutdown ---

    #[tokio::test]
    async fn test_replica_shutdown() {
        let replica = Replica::new(minimal_config()).unwrap();
        assert!(!replica.is_shutdown());
        replica.shutdown().await;
        assert!(replica.is_shutdown());
        assert_eq!(replica.state(), ReplicaState::Stopped);
    }

    #[tokio::test]
    async fn test_replica_double_shutdown() {
        let replica = Replica::new(minimal_config()).unwrap();
        replica.shutdown().await;
        replica.shutdown().await; // Should not panic
        assert_eq!(replica.state(), ReplicaState::Stopped);
    }

    // --- Autoscaling wiring ---

    #[tokio::test]
    async fn test_unknown_executor_rejected_at_start() {
        let mut config = minimal_config();
        config.autoscaling.enabled = true;
        config.autoscaling.control_plane_url = "http://127.0.0.1:9090".to_string();
        config.autoscaling.executor = "swarm".to_string();
        // validate() already rejects this at construction.
        assert!(Replica::new(config).is_err());
    }
}
