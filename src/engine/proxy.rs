//! Engine proxy — watermark admission, the request registry, and aborts
//!
//! One proxy fronts one engine. Submitting a generation registers it,
//! charges the ongoing-request gauge, and returns a [`TokenStream`] that
//! yields text deltas until the generation reaches a terminal state.
//! Aborts are idempotent and only ever act on registered requests; the
//! gauge charge and registry slot are released when the stream drops.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::admission::{FinishReason, GenerationRequest, GenerationState, TokenChunk};
use crate::config::EngineConfig;
use crate::engine::{EngineUpdate, GenerationEngine};
use crate::error::{Result, ServingError};
use crate::observability::ServingMetrics;
use crate::stream::DeltaCursor;

/// In-flight generations and their states
type Registry = Arc<RwLock<HashMap<String, GenerationState>>>;

/// Serving-side wrapper around a generation engine
pub struct EngineProxy {
    /// The engine this proxy fronts
    engine: Arc<dyn GenerationEngine>,
    /// Engine and watermark configuration
    config: EngineConfig,
    /// Shared serving metrics
    metrics: Arc<ServingMetrics>,
    /// In-flight request registry
    registry: Registry,
}

impl EngineProxy {
    /// Create a proxy for the given engine
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        config: EngineConfig,
        metrics: Arc<ServingMetrics>,
    ) -> Self {
        Self {
            engine,
            config,
            metrics,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Initialize the engine. The replica must not serve until this succeeds.
    pub async fn initialize(&self) -> Result<()> {
        info!(
            model_id = %self.config.model_id,
            engine = self.engine.name(),
            "Initializing engine"
        );
        self.engine.initialize(&self.config).await
    }

    /// Submit an admitted generation and stream its tokens.
    ///
    /// Fails with [`ServingError::Overloaded`] when the ongoing-request
    /// watermark is reached. A request with no token budget completes
    /// immediately without touching the engine.
    pub async fn submit(&self, request: GenerationRequest) -> Result<TokenStream> {
        self.metrics.inc_ongoing();
        if self.metrics.ongoing_requests() > self.config.max_ongoing_requests {
            self.metrics.dec_ongoing();
            self.metrics.record_overloaded();
            return Err(ServingError::Overloaded(format!(
                "ongoing requests at capacity {}",
                self.config.max_ongoing_requests
            )));
        }

        // From here the guard owns the gauge charge and the registry slot.
        self.registry
            .write()
            .unwrap()
            .insert(request.id.clone(), GenerationState::Queued);
        let guard = OngoingGuard {
            request_id: request.id.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            engine: self.engine.clone(),
        };

        let source = if request.has_token_budget() {
            match self.engine.generate(&request).await {
                Ok(receiver) => Some(receiver),
                Err(e) => {
                    if let Some(entry) =
                        self.registry.write().unwrap().get_mut(&request.id)
                    {
                        *entry = GenerationState::Failed;
                    }
                    self.metrics.record_failed();
                    return Err(e);
                }
            }
        } else {
            debug!(request_id = %request.id, "No token budget; completing without engine");
            None
        };

        debug!(
            request_id = %request.id,
            input_tokens = request.input_token_count,
            max_new_tokens = request.max_new_tokens,
            "Generation submitted"
        );

        Ok(TokenStream {
            request_id: request.id,
            source,
            cursor: DeltaCursor::new(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            started: false,
            done: false,
            _guard: guard,
        })
    }

    /// Abort a generation.
    ///
    /// Idempotent: terminal or unknown ids are a no-op, and the engine is
    /// told to stop at most once per request. Engine-side failures are
    /// logged, never surfaced.
    pub async fn abort(&self, request_id: &str) {
        let should_stop = {
            let mut registry = self.registry.write().unwrap();
            match registry.get_mut(request_id) {
                Some(state) if !state.is_terminal() => {
                    *state = GenerationState::Aborted;
                    true
                }
                _ => false,
            }
        };

        if !should_stop {
            debug!(request_id, "Abort ignored for terminal or unknown request");
            return;
        }

        self.metrics.record_aborted();
        info!(request_id, "Generation aborted");
        if let Err(e) = self.engine.abort(request_id).await {
            warn!(request_id, "Engine abort failed: {}", e);
        }
    }

    /// Number of in-flight generations on this replica
    pub fn ongoing_request_count(&self) -> usize {
        self.metrics.ongoing_requests()
    }

    /// Registry state of a request while it is in flight
    pub fn state(&self, request_id: &str) -> Option<GenerationState> {
        self.registry.read().unwrap().get(request_id).copied()
    }
}

/// Releases a generation's registry slot and gauge charge on drop.
///
/// A drop before the generation reached a terminal state counts as an
/// abort and tells the engine to stop.
struct OngoingGuard {
    request_id: String,
    registry: Registry,
    metrics: Arc<ServingMetrics>,
    engine: Arc<dyn GenerationEngine>,
}

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        let state = self.registry.write().unwrap().remove(&self.request_id);
        self.metrics.dec_ongoing();

        if let Some(state) = state {
            if !state.is_terminal() {
                self.metrics.record_aborted();
                warn!(
                    request_id = %self.request_id,
                    state = %state,
                    "Stream dropped mid-generation; aborting"
                );
                let engine = self.engine.clone();
                let request_id = self.request_id.clone();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(e) = engine.abort(&request_id).await {
                            warn!(request_id = %request_id, "Engine abort failed: {}", e);
                        }
                    });
                }
            }
        }
    }
}

/// Pull-based stream of text deltas for one generation.
///
/// The final chunk carries a finish reason; after it, `next` returns
/// `Ok(None)`. An aborted generation ends the stream without a terminal
/// chunk.
pub struct TokenStream {
    /// Id of the generation this stream serves
    request_id: String,
    /// Engine updates; `None` for a generation with no token budget
    source: Option<mpsc::Receiver<EngineUpdate>>,
    /// Tracks how much accumulated text has been delivered
    cursor: DeltaCursor,
    /// Shared registry, for state transitions
    registry: Registry,
    /// Shared serving metrics
    metrics: Arc<ServingMetrics>,
    /// Whether the first poll has happened
    started: bool,
    /// Whether a terminal condition was reached
    done: bool,
    /// Owns the gauge charge and registry slot
    _guard: OngoingGuard,
}

impl TokenStream {
    /// Id of the generation this stream serves
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Next delta, `Ok(None)` at end of stream
    pub async fn next(&mut self) -> Result<Option<TokenChunk>> {
        if self.done {
            return Ok(None);
        }

        if !self.started {
            self.started = true;
            if self.source.is_some() {
                self.set_state(GenerationState::Running);
            }
        }

        loop {
            if self.is_aborted() {
                self.done = true;
                return Ok(None);
            }

            let update = match self.source.as_mut() {
                Some(receiver) => receiver.recv().await,
                None => {
                    self.done = true;
                    self.set_state(GenerationState::Completed);
                    self.metrics.record_completed();
                    return Ok(Some(TokenChunk {
                        delta: String::new(),
                        finish_reason: Some(FinishReason::Length),
                    }));
                }
            };

            match update {
                Some(EngineUpdate::Progress { text }) => {
                    let delta = self.cursor.advance(&text);
                    if delta.is_empty() {
                        continue;
                    }
                    self.set_state(GenerationState::Streaming);
                    self.metrics.record_chunk(delta.chars().count());
                    return Ok(Some(TokenChunk {
                        delta,
                        finish_reason: None,
                    }));
                }
                Some(EngineUpdate::Finished {
                    text,
                    finish_reason,
                }) => {
                    self.done = true;
                    let delta = self.cursor.advance(&text);
                    if !delta.is_empty() {
                        self.metrics.record_chunk(delta.chars().count());
                    }
                    self.set_state(GenerationState::Completed);
                    self.metrics.record_completed();
                    return Ok(Some(TokenChunk {
                        delta,
                        finish_reason: Some(finish_reason),
                    }));
                }
                Some(EngineUpdate::Failed { error }) => {
                    self.done = true;
                    if self.is_aborted() {
                        return Ok(None);
                    }
                    self.set_state(GenerationState::Failed);
                    self.metrics.record_failed();
                    return Err(ServingError::Engine(error));
                }
                None => {
                    self.done = true;
                    if self.is_aborted() {
                        return Ok(None);
                    }
                    self.set_state(GenerationState::Failed);
                    self.metrics.record_failed();
                    return Err(ServingError::Engine(format!(
                        "Engine stream for '{}' ended unexpectedly",
                        self.request_id
                    )));
                }
            }
        }
    }

    /// Record a state transition; terminal states are never overwritten
    fn set_state(&self, state: GenerationState) {
        let mut registry = self.registry.write().unwrap();
        if let Some(entry) = registry.get_mut(&self.request_id) {
            if !entry.is_terminal() && *entry != state {
                debug!(
                    request_id = %self.request_id,
                    from = %entry,
                    to = %state,
                    "Generation state changed"
                );
                *entry = state;
            }
        }
    }

    fn is_aborted(&self) -> bool {
        matches!(
            self.registry.read().unwrap().get(&self.request_id),
            Some(GenerationState::Aborted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::SamplingOptions;
    use crate::engine::MockEngine;
    use std::time::Duration;

    fn request(id: &str, max_new_tokens: u32) -> GenerationRequest {
        GenerationRequest {
            id: id.to_string(),
            prompt: "Hello".to_string(),
            sampling: SamplingOptions::default(),
            context_length: 8192,
            input_token_count: 2,
            max_new_tokens,
            stream: false,
            created_at: chrono::Utc::now(),
        }
    }

    fn proxy_with(engine: Arc<MockEngine>, max_ongoing: usize) -> EngineProxy {
        let config = EngineConfig {
            model_id: "test-model".to_string(),
            max_ongoing_requests: max_ongoing,
            ..EngineConfig::default()
        };
        EngineProxy::new(engine, config, Arc::new(ServingMetrics::default()))
    }

    async fn drain(stream: &mut TokenStream) -> (String, Option<FinishReason>) {
        let mut text = String::new();
        let mut finish = None;
        while let Some(chunk) = stream.next().await.unwrap() {
            text.push_str(&chunk.delta);
            if chunk.finish_reason.is_some() {
                finish = chunk.finish_reason;
                break;
            }
        }
        (text, finish)
    }

    // --- submit and stream tests ---

    #[tokio::test]
    async fn test_submit_streams_to_completion() {
        let engine = Arc::new(MockEngine::completing("Hello world"));
        let proxy = proxy_with(engine.clone(), 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        assert_eq!(proxy.ongoing_request_count(), 1);

        let (text, finish) = drain(&mut stream).await;
        assert_eq!(text, "Hello world");
        assert_eq!(finish, Some(FinishReason::Stop));
        assert_eq!(proxy.state("req-1"), Some(GenerationState::Completed));

        drop(stream);
        assert_eq!(proxy.ongoing_request_count(), 0);
        assert_eq!(proxy.state("req-1"), None);
        assert_eq!(engine.generated(), vec!["req-1".to_string()]);
        assert!(engine.aborted().is_empty());
    }

    #[tokio::test]
    async fn test_zero_budget_completes_without_engine() {
        let engine = Arc::new(MockEngine::new());
        let proxy = proxy_with(engine.clone(), 8);

        let mut stream = proxy.submit(request("req-1", 0)).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert!(chunk.delta.is_empty());
        assert_eq!(chunk.finish_reason, Some(FinishReason::Length));
        assert!(stream.next().await.unwrap().is_none());

        assert!(engine.generated().is_empty());
    }

    #[tokio::test]
    async fn test_empty_progress_snapshots_are_skipped() {
        let engine = Arc::new(MockEngine::with_updates(vec![
            EngineUpdate::Progress {
                text: String::new(),
            },
            EngineUpdate::Progress {
                text: "Hi".to_string(),
            },
            EngineUpdate::Progress {
                text: "Hi".to_string(),
            },
            EngineUpdate::Finished {
                text: "Hi!".to_string(),
                finish_reason: FinishReason::Stop,
            },
        ]));
        let proxy = proxy_with(engine, 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.delta, "Hi");
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.delta, "!");
        assert_eq!(second.finish_reason, Some(FinishReason::Stop));
    }

    // --- watermark tests ---

    #[tokio::test]
    async fn test_watermark_rejects_at_capacity() {
        let engine = Arc::new(
            MockEngine::with_updates(vec![EngineUpdate::Progress {
                text: "a".to_string(),
            }])
            .hold_open(),
        );
        let proxy = proxy_with(engine, 1);

        let held = proxy.submit(request("req-1", 64)).await.unwrap();
        let rejected = proxy.submit(request("req-2", 64)).await;
        assert!(matches!(rejected, Err(ServingError::Overloaded(_))));
        assert_eq!(proxy.ongoing_request_count(), 1);

        drop(held);
        assert!(proxy.submit(request("req-3", 64)).await.is_ok());
    }

    // --- abort tests ---

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let engine = Arc::new(
            MockEngine::with_updates(vec![EngineUpdate::Progress {
                text: "partial".to_string(),
            }])
            .hold_open(),
        );
        let proxy = proxy_with(engine.clone(), 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.delta, "partial");

        proxy.abort("req-1").await;
        proxy.abort("req-1").await;
        assert_eq!(proxy.state("req-1"), Some(GenerationState::Aborted));
        assert_eq!(engine.aborted(), vec!["req-1".to_string()]);

        // The stream ends without a terminal chunk.
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abort_unknown_id_is_noop() {
        let engine = Arc::new(MockEngine::new());
        let proxy = proxy_with(engine.clone(), 8);

        proxy.abort("never-submitted").await;
        assert!(engine.aborted().is_empty());
    }

    #[tokio::test]
    async fn test_abort_after_completion_is_noop() {
        let engine = Arc::new(MockEngine::completing("done"));
        let proxy = proxy_with(engine.clone(), 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        drain(&mut stream).await;

        proxy.abort("req-1").await;
        assert!(engine.aborted().is_empty());
        assert_eq!(proxy.state("req-1"), Some(GenerationState::Completed));
    }

    #[tokio::test]
    async fn test_drop_mid_generation_aborts_engine() {
        let engine = Arc::new(
            MockEngine::with_updates(vec![EngineUpdate::Progress {
                text: "partial".to_string(),
            }])
            .hold_open(),
        );
        let proxy = proxy_with(engine.clone(), 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        stream.next().await.unwrap();
        drop(stream);

        // The engine abort runs on a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.aborted(), vec!["req-1".to_string()]);
        assert_eq!(proxy.ongoing_request_count(), 0);
    }

    // --- failure tests ---

    #[tokio::test]
    async fn test_engine_failure_surfaces() {
        let engine = Arc::new(MockEngine::with_updates(vec![
            EngineUpdate::Progress {
                text: "x".to_string(),
            },
            EngineUpdate::Failed {
                error: "cuda out of memory".to_string(),
            },
        ]));
        let proxy = proxy_with(engine, 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        stream.next().await.unwrap();
        let err = stream.next().await.unwrap_err();
        assert!(err.to_string().contains("cuda out of memory"));
        assert_eq!(proxy.state("req-1"), Some(GenerationState::Failed));
    }

    #[tokio::test]
    async fn test_truncated_engine_stream_fails() {
        let engine = Arc::new(MockEngine::with_updates(vec![EngineUpdate::Progress {
            text: "x".to_string(),
        }]));
        let proxy = proxy_with(engine, 8);

        let mut stream = proxy.submit(request("req-1", 64)).await.unwrap();
        stream.next().await.unwrap();
        assert!(stream.next().await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_propagates_engine_error() {
        let engine = Arc::new(MockEngine::new().with_init_error("model not found"));
        let proxy = proxy_with(engine, 8);

        let err = proxy.initialize().await.unwrap_err();
        assert!(matches!(err, ServingError::EngineInit(_)));
    }
}
