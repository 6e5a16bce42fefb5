//! Cancellation — client-disconnect detection racing generation progress
//!
//! HTTP gives no positive disconnect signal, so the transport holds a
//! [`ClientHandle`] for as long as the connection lives and its drop marks
//! the client gone. [`CancellationWatcher`] races that signal against the
//! token stream and aborts the generation when the client wins; natural
//! completion always takes precedence over a simultaneous disconnect.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::admission::TokenChunk;
use crate::engine::{EngineProxy, TokenStream};
use crate::error::{Result, ServingError};
use crate::observability::ServingMetrics;
use crate::stream::{CompletedGeneration, StreamMultiplexer};

/// Create a connected handle/monitor pair
pub fn client_channel() -> (ClientHandle, ClientMonitor) {
    let (tx, rx) = watch::channel(false);
    (ClientHandle { _tx: tx }, ClientMonitor { rx })
}

/// Held by the transport for as long as the client connection lives.
///
/// Dropping the handle is the disconnect signal.
pub struct ClientHandle {
    _tx: watch::Sender<bool>,
}

/// Resolves once the paired [`ClientHandle`] is dropped
#[derive(Clone)]
pub struct ClientMonitor {
    rx: watch::Receiver<bool>,
}

impl ClientMonitor {
    /// Wait until the client goes away
    pub async fn disconnected(&mut self) {
        while self.rx.changed().await.is_ok() {}
    }
}

/// What the watcher observed first
#[derive(Debug)]
pub enum Watched {
    /// A delta arrived before any disconnect
    Chunk(TokenChunk),
    /// The stream ended without a terminal chunk
    End,
    /// The client went away; the generation was aborted
    ClientGone,
}

/// How a buffered delivery ended
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The generation finished and the response can be written
    Completed(CompletedGeneration),
    /// The client went away first
    ClientGone,
}

/// Races a token stream against the client-gone signal
pub struct CancellationWatcher {
    monitor: ClientMonitor,
    proxy: Arc<EngineProxy>,
    metrics: Arc<ServingMetrics>,
    fired: bool,
}

impl CancellationWatcher {
    /// Create a watcher for one request
    pub fn new(
        monitor: ClientMonitor,
        proxy: Arc<EngineProxy>,
        metrics: Arc<ServingMetrics>,
    ) -> Self {
        Self {
            monitor,
            proxy,
            metrics,
            fired: false,
        }
    }

    /// Next chunk, or the client-gone signal, whichever happens first
    pub async fn watch(&mut self, stream: &mut TokenStream) -> Result<Watched> {
        tokio::select! {
            chunk = stream.next() => {
                match chunk? {
                    Some(chunk) => Ok(Watched::Chunk(chunk)),
                    None => Ok(Watched::End),
                }
            }
            _ = self.monitor.disconnected() => {
                self.handle_disconnect(stream.request_id()).await;
                Ok(Watched::ClientGone)
            }
        }
    }

    /// Record the disconnect and abort the generation, at most once
    pub async fn handle_disconnect(&mut self, request_id: &str) {
        if self.fired {
            return;
        }
        self.fired = true;
        self.metrics.record_client_disconnect();
        info!(request_id, "Client gone; aborting generation");
        self.proxy.abort(request_id).await;
    }

    /// Drain the stream into one buffered response, racing the client signal
    pub async fn collect(
        mut self,
        stream: &mut TokenStream,
        prefix: Option<&str>,
    ) -> Result<DeliveryOutcome> {
        let mut mux = StreamMultiplexer::buffered(prefix);
        loop {
            match self.watch(stream).await? {
                Watched::Chunk(chunk) => {
                    let terminal = chunk.is_terminal();
                    mux.absorb(&chunk);
                    if terminal {
                        break;
                    }
                }
                Watched::End => break,
                Watched::ClientGone => return Ok(DeliveryOutcome::ClientGone),
            }
        }

        match mux.into_completed() {
            Some(completed) => Ok(DeliveryOutcome::Completed(completed)),
            None => Err(ServingError::Engine(
                "Token stream ended without a finish reason".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{FinishReason, GenerationRequest, GenerationState, SamplingOptions};
    use crate::config::EngineConfig;
    use crate::engine::{EngineUpdate, MockEngine};
    use std::time::Duration;

    fn request(id: &str) -> GenerationRequest {
        GenerationRequest {
            id: id.to_string(),
            prompt: "Hello".to_string(),
            sampling: SamplingOptions::default(),
            context_length: 8192,
            input_token_count: 2,
            max_new_tokens: 64,
            stream: false,
            created_at: chrono::Utc::now(),
        }
    }

    fn proxy_with(engine: Arc<MockEngine>) -> (Arc<EngineProxy>, Arc<ServingMetrics>) {
        let metrics = Arc::new(ServingMetrics::default());
        let config = EngineConfig {
            model_id: "test-model".to_string(),
            ..EngineConfig::default()
        };
        (
            Arc::new(EngineProxy::new(engine, config, metrics.clone())),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_monitor_resolves_on_handle_drop() {
        let (handle, mut monitor) = client_channel();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), monitor.disconnected())
            .await
            .expect("dropping the handle should resolve the monitor");
    }

    #[tokio::test]
    async fn test_completion_wins_when_client_stays() {
        let engine = Arc::new(MockEngine::completing("Hello world"));
        let (proxy, metrics) = proxy_with(engine.clone());
        let (_handle, monitor) = client_channel();

        let mut stream = proxy.submit(request("req-1")).await.unwrap();
        let watcher = CancellationWatcher::new(monitor, proxy.clone(), metrics.clone());

        let outcome = watcher.collect(&mut stream, None).await.unwrap();
        match outcome {
            DeliveryOutcome::Completed(completed) => {
                assert_eq!(completed.text, "Hello world");
                assert_eq!(completed.finish_reason, FinishReason::Stop);
            }
            DeliveryOutcome::ClientGone => panic!("client never went away"),
        }
        assert!(engine.aborted().is_empty());
        assert_eq!(metrics.snapshot().client_disconnects_total, 0);
    }

    #[tokio::test]
    async fn test_disconnect_aborts_generation() {
        // An engine that never produces anything and never finishes.
        let engine = Arc::new(MockEngine::with_updates(Vec::new()).hold_open());
        let (proxy, metrics) = proxy_with(engine.clone());
        let (handle, monitor) = client_channel();

        let mut stream = proxy.submit(request("req-1")).await.unwrap();
        let watcher = CancellationWatcher::new(monitor, proxy.clone(), metrics.clone());

        drop(handle);
        let outcome = watcher.collect(&mut stream, None).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::ClientGone));

        assert_eq!(proxy.state("req-1"), Some(GenerationState::Aborted));
        assert_eq!(engine.aborted(), vec!["req-1".to_string()]);
        assert_eq!(metrics.snapshot().client_disconnects_total, 1);
        assert_eq!(metrics.snapshot().aborted_total, 1);
    }

    #[tokio::test]
    async fn test_disconnect_mid_stream_keeps_partial_silent() {
        let engine = Arc::new(
            MockEngine::with_updates(vec![EngineUpdate::Progress {
                text: "partial".to_string(),
            }])
            .hold_open(),
        );
        let (proxy, metrics) = proxy_with(engine.clone());
        let (handle, monitor) = client_channel();

        let mut stream = proxy.submit(request("req-1")).await.unwrap();
        let mut watcher = CancellationWatcher::new(monitor, proxy.clone(), metrics);

        // First chunk arrives while the client is still there.
        let first = watcher.watch(&mut stream).await.unwrap();
        assert!(matches!(first, Watched::Chunk(ref c) if c.delta == "partial"));

        drop(handle);
        let second = watcher.watch(&mut stream).await.unwrap();
        assert!(matches!(second, Watched::ClientGone));
        assert_eq!(engine.aborted(), vec!["req-1".to_string()]);
    }

    #[tokio::test]
    async fn test_handle_disconnect_fires_once() {
        let engine = Arc::new(MockEngine::with_updates(Vec::new()).hold_open());
        let (proxy, metrics) = proxy_with(engine.clone());
        let (_handle, monitor) = client_channel();

        let stream = proxy.submit(request("req-1")).await.unwrap();
        let mut watcher = CancellationWatcher::new(monitor, proxy.clone(), metrics.clone());

        watcher.handle_disconnect(stream.request_id()).await;
        watcher.handle_disconnect(stream.request_id()).await;

        assert_eq!(metrics.snapshot().client_disconnects_total, 1);
        assert_eq!(engine.aborted().len(), 1);
    }
}
