//! Scripted in-memory engine used by unit tests

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::admission::{FinishReason, GenerationRequest};
use crate::config::EngineConfig;
use crate::engine::{EngineUpdate, GenerationEngine};
use crate::error::{Result, ServingError};

/// Engine that replays a fixed script of updates for every generation
pub(crate) struct MockEngine {
    /// Updates sent to each generation, in order
    updates: Vec<EngineUpdate>,
    /// Optional pause before each update
    pace: Option<Duration>,
    /// Keep the update channel open after the script drains
    hold_open: bool,
    /// Error returned from initialize, if set
    init_error: Option<String>,
    /// Request ids seen by generate
    generated: Mutex<Vec<String>>,
    /// Request ids seen by abort
    aborted: Mutex<Vec<String>>,
}

impl MockEngine {
    /// Engine that completes every generation with "Hello world"
    pub(crate) fn new() -> Self {
        Self::completing("Hello world")
    }

    /// Engine that streams `text` in two steps and finishes with `stop`
    pub(crate) fn completing(text: &str) -> Self {
        let half = text.len() / 2;
        Self::with_updates(vec![
            EngineUpdate::Progress {
                text: text[..half].to_string(),
            },
            EngineUpdate::Finished {
                text: text.to_string(),
                finish_reason: FinishReason::Stop,
            },
        ])
    }

    /// Engine replaying exactly the given updates
    pub(crate) fn with_updates(updates: Vec<EngineUpdate>) -> Self {
        Self {
            updates,
            pace: None,
            hold_open: false,
            init_error: None,
            generated: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
        }
    }

    /// Pause before each update
    pub(crate) fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Keep each generation's channel open after the script drains,
    /// simulating an engine that never finishes on its own
    pub(crate) fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fail initialization with the given message
    pub(crate) fn with_init_error(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    /// Request ids passed to generate
    pub(crate) fn generated(&self) -> Vec<String> {
        self.generated.lock().unwrap().clone()
    }

    /// Request ids passed to abort
    pub(crate) fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationEngine for MockEngine {
    async fn initialize(&self, _config: &EngineConfig) -> Result<()> {
        match &self.init_error {
            Some(message) => Err(ServingError::EngineInit(message.clone())),
            None => Ok(()),
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<EngineUpdate>> {
        self.generated.lock().unwrap().push(request.id.clone());

        let script = self.updates.clone();
        let pace = self.pace;
        let hold_open = self.hold_open;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            for update in script {
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
                if tx.send(update).await.is_err() {
                    return;
                }
            }
            if hold_open {
                tx.closed().await;
            }
        });

        Ok(rx)
    }

    async fn abort(&self, request_id: &str) -> Result<()> {
        self.aborted.lock().unwrap().push(request_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
