//! Context caching: upload a large file once, wait for the provider to
//! process it, then create a cache that later questions can reference.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::config::{CacheSettings, GenerationConfig};
use crate::context::{AttachmentInput, ProviderTurn};
use crate::error::{ChatError, Result};
use crate::llm::{
    CacheHandle, CacheProvider, CacheRequest, ModelProvider, ProcessingState, ProviderResponse,
    UploadedFile,
};

/// Phase of a [`CacheJob`]. `Active`, `Failed` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePhase {
    Uploading,
    Processing,
    Active,
    Failed,
    TimedOut,
}

impl CachePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Failed | Self::TimedOut)
    }
}

#[derive(Debug, Clone)]
pub enum CacheJobEvent {
    Phase(CachePhase),
    Uploaded(UploadedFile),
    Polled {
        state: ProcessingState,
        elapsed: Duration,
    },
    Created(CacheHandle),
}

/// Upload, poll, and create a cache for one file.
#[derive(Debug, Clone)]
pub struct CacheJob {
    model: String,
    ttl: Duration,
    system_instruction: Option<String>,
    poll_interval: Duration,
    max_wait: Duration,
    events: Option<UnboundedSender<CacheJobEvent>>,
}

impl CacheJob {
    pub fn new(model: impl Into<String>, settings: &CacheSettings) -> Self {
        Self {
            model: model.into(),
            ttl: settings.default_ttl(),
            system_instruction: None,
            poll_interval: settings.poll_interval(),
            max_wait: settings.max_wait(),
            events: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<CacheJobEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub async fn run(
        &self,
        provider: &dyn CacheProvider,
        file: &AttachmentInput,
    ) -> Result<CacheHandle> {
        self.emit(CacheJobEvent::Phase(CachePhase::Uploading));
        let uploaded = provider.upload_file(file).await?;
        tracing::info!(file = %uploaded.name, "upload complete");
        self.emit(CacheJobEvent::Uploaded(uploaded.clone()));

        let active = self.wait_until_active(provider, uploaded).await?;

        let request = CacheRequest::for_file(&self.model, &active, self.ttl)
            .with_system_instruction(self.system_instruction.clone());
        let handle = provider.create_cache(&request).await?;
        tracing::info!(cache = %handle.name, ttl_secs = self.ttl.as_secs(), "cache created");
        self.emit(CacheJobEvent::Created(handle.clone()));
        Ok(handle)
    }

    /// Poll the file every `poll_interval` until it leaves `Processing` or
    /// `max_wait` has elapsed.
    pub async fn wait_until_active(
        &self,
        provider: &dyn CacheProvider,
        mut file: UploadedFile,
    ) -> Result<UploadedFile> {
        self.emit(CacheJobEvent::Phase(CachePhase::Processing));
        let started = Instant::now();

        loop {
            match file.state {
                ProcessingState::Active => {
                    self.emit(CacheJobEvent::Phase(CachePhase::Active));
                    return Ok(file);
                }
                ProcessingState::Failed => {
                    tracing::warn!(file = %file.name, "file processing failed");
                    self.emit(CacheJobEvent::Phase(CachePhase::Failed));
                    return Err(ChatError::CacheProcessingFailed {
                        name: label(&file),
                    });
                }
                ProcessingState::Processing => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_wait {
                tracing::warn!(file = %file.name, waited_secs = elapsed.as_secs(), "file processing timed out");
                self.emit(CacheJobEvent::Phase(CachePhase::TimedOut));
                return Err(ChatError::CacheProcessingTimedOut {
                    name: label(&file),
                    waited: elapsed,
                });
            }

            tokio::time::sleep(self.poll_interval.min(self.max_wait - elapsed)).await;
            file = provider.get_file(&file.name).await?;
            tracing::debug!(file = %file.name, state = ?file.state, "polled file");
            self.emit(CacheJobEvent::Polled {
                state: file.state,
                elapsed: started.elapsed(),
            });
        }
    }

    fn emit(&self, event: CacheJobEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

fn label(file: &UploadedFile) -> String {
    file.display_name.clone().unwrap_or_else(|| file.name.clone())
}

/// Ask one question against an existing cache. Single turn, not streamed;
/// the caller reports its usage separately from any session totals.
pub async fn query_cache(
    provider: &dyn ModelProvider,
    model: &str,
    config: &GenerationConfig,
    cache_name: &str,
    prompt: &str,
) -> Result<ProviderResponse> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ChatError::EmptyTurn);
    }
    let config = config.clone().with_cached_content(cache_name);
    let history = [ProviderTurn::user_text(prompt)];
    tracing::info!(cache = cache_name, model, "querying cache");
    provider.generate(model, &history, &config).await
}
