mod assembly;
mod attachments;

pub use assembly::{AssembledReply, AssemblyState, ResponseAssembly};
pub use attachments::{AttachmentId, AttachmentTray, TrayEntry};

use futures::StreamExt;
use std::sync::Arc;

use crate::config::{GenerationConfig, Settings};
use crate::constants::{defaults, messages, models};
use crate::context::{
    AttachmentInput, ContentPart, HistoryProjector, ProviderTurn, RequestToken, Role, Turn,
    TurnMetadata, TurnStore, UsageAccumulator, UsageCounters, UsageDelta,
};
use crate::error::{ChatError, Result};
use crate::llm::{Fragment, ModelProvider, ProviderResponse, StreamEvent};

/// Events emitted while a message is in flight, for the front-end to render.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Requesting { model: String },
    TextDelta(String),
    Complete(TurnOutcome),
    Error(String),
}

/// How a completed request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Reply {
        text: String,
        grounding: Option<String>,
        usage: Option<UsageDelta>,
    },
    /// The provider stopped the reply for safety or policy reasons.
    Blocked {
        reason: String,
        usage: Option<UsageDelta>,
    },
}

impl TurnOutcome {
    /// Text shown to the user for this outcome.
    pub fn display_text(&self) -> String {
        match self {
            Self::Reply { text, .. } if text.is_empty() => messages::EMPTY_RESPONSE.to_string(),
            Self::Reply { text, .. } => text.clone(),
            Self::Blocked { reason, .. } => format!("{}{reason}", messages::BLOCKED_PREFIX),
        }
    }

    pub fn usage(&self) -> Option<UsageDelta> {
        match self {
            Self::Reply { usage, .. } | Self::Blocked { usage, .. } => *usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Remove the pending user turn when its request fails or is abandoned.
    pub rollback_user_turn_on_failure: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            rollback_user_turn_on_failure: defaults::ROLLBACK_USER_TURN_ON_FAILURE,
        }
    }
}

/// Everything needed to issue one provider call.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub token: RequestToken,
    pub model: String,
    pub history: Vec<ProviderTurn>,
    pub config: GenerationConfig,
}

#[derive(Debug)]
struct InFlight {
    token: RequestToken,
    epoch: u64,
    assembly: ResponseAssembly,
}

/// One conversation: turn store, usage counters, generation settings, and at
/// most one request in flight.
///
/// The step methods (`begin_send`, `push_fragment`, `finish`, `fail`,
/// `abandon`) drive a request by hand; `send_message` runs them against the
/// session's provider. If a `send_message` future is dropped mid-stream, call
/// [`abandon_in_flight`](Self::abandon_in_flight) before sending again.
pub struct ChatSession {
    provider: Arc<dyn ModelProvider>,
    model: String,
    config: GenerationConfig,
    projector: HistoryProjector,
    policy: SessionPolicy,
    store: TurnStore,
    usage: UsageAccumulator,
    in_flight: Option<InFlight>,
}

impl ChatSession {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            model: models::DEFAULT_MODEL.to_string(),
            config: GenerationConfig::default(),
            projector: HistoryProjector::default(),
            policy: SessionPolicy::default(),
            store: TurnStore::new(),
            usage: UsageAccumulator::new(),
            in_flight: None,
        }
    }

    pub fn from_settings(provider: Arc<dyn ModelProvider>, settings: &Settings) -> Self {
        Self::new(provider)
            .with_model(&settings.provider.model)
            .with_config(settings.generation.clone())
            .with_projector(settings.build_projector())
            .with_policy(SessionPolicy {
                rollback_user_turn_on_failure: settings.session.rollback_user_turn_on_failure,
            })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_projector(mut self, projector: HistoryProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn turns(&self) -> &[Turn] {
        self.store.all()
    }

    pub fn store(&self) -> &TurnStore {
        &self.store
    }

    pub fn usage(&self) -> UsageCounters {
        self.usage.snapshot()
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Settings changes apply from the next request on.
    pub fn config_mut(&mut self) -> &mut GenerationConfig {
        &mut self.config
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn projector(&self) -> &HistoryProjector {
        &self.projector
    }

    /// True while a request issued since the last `clear` is unresolved.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.epoch == self.store.epoch())
    }

    /// State of the in-flight response, if any.
    pub fn assembly_state(&self) -> Option<AssemblyState> {
        self.in_flight.as_ref().map(|f| f.assembly.state())
    }

    /// Text received so far for the in-flight response.
    pub fn partial_text(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|f| f.assembly.text())
    }

    /// A previous request failed and left its user turn in place.
    pub fn has_dangling_turn(&self) -> bool {
        !self.is_busy() && self.store.awaiting_reply()
    }

    // ── History and usage actions ────────────────────────────────────────

    /// Drop all turns. An in-flight response becomes stale; its late events
    /// are rejected and never recorded. Usage counters are left alone.
    pub fn clear(&mut self) {
        self.store.clear();
        tracing::info!("conversation cleared");
    }

    pub fn reset_usage(&mut self) {
        self.usage.reset();
    }

    // ── Step API ─────────────────────────────────────────────────────────

    /// Append the user turn and build the request for it. Attachments go
    /// with this request only; the stored turn keeps their names.
    pub fn begin_send(
        &mut self,
        text: &str,
        attachments: Vec<AttachmentInput>,
    ) -> Result<OutboundRequest> {
        self.ensure_idle()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyTurn);
        }
        self.projector.validate_attachments(&attachments)?;

        let metadata = TurnMetadata {
            attachment_names: attachments.iter().map(|a| a.name.clone()).collect(),
            grounding: None,
        };
        self.store.append(Turn::user(text).with_metadata(metadata))?;

        let pending: Vec<ContentPart> = attachments.into_iter().map(ContentPart::from).collect();
        let history = match self.projector.project(self.store.all(), &pending) {
            Ok(history) => history,
            Err(e) => {
                self.store.pop_pending_user();
                return Err(e);
            }
        };
        self.start(history)
    }

    /// Reissue the request for a user turn left behind by a failure.
    pub fn retry(&mut self, attachments: Vec<AttachmentInput>) -> Result<OutboundRequest> {
        self.ensure_idle()?;
        if self.store.is_empty() {
            return Err(ChatError::EmptyHistory);
        }
        if !self.store.awaiting_reply() {
            return Err(ChatError::InvalidTurnOrder {
                expected: Role::User,
                found: Role::Model,
            });
        }
        self.projector.validate_attachments(&attachments)?;
        let pending: Vec<ContentPart> = attachments.into_iter().map(ContentPart::from).collect();
        let history = self.projector.project(self.store.all(), &pending)?;
        self.start(history)
    }

    pub fn push_fragment(&mut self, token: RequestToken, fragment: Fragment) -> Result<()> {
        let flight = self.active(token)?;
        if flight.assembly.push_fragment(fragment)? {
            tracing::debug!(request = %token, "usage staged");
        }
        Ok(())
    }

    /// Complete the request: append the model turn and record its usage.
    pub fn finish(&mut self, token: RequestToken) -> Result<TurnOutcome> {
        let reply = self.active(token)?.assembly.complete()?;
        self.in_flight = None;

        let (stored_text, outcome) = match reply.block_reason {
            Some(reason) => {
                tracing::warn!(request = %token, %reason, "response blocked");
                let outcome = TurnOutcome::Blocked {
                    reason,
                    usage: reply.usage,
                };
                (outcome.display_text(), outcome)
            }
            None => {
                let outcome = TurnOutcome::Reply {
                    text: reply.text,
                    grounding: reply.grounding.clone(),
                    usage: reply.usage,
                };
                (outcome.display_text(), outcome)
            }
        };

        let metadata = TurnMetadata {
            attachment_names: Vec::new(),
            grounding: reply.grounding,
        };
        self.store.append(Turn::model(stored_text).with_metadata(metadata))?;
        if let Some(usage) = reply.usage {
            self.usage.record_for(token, usage);
        }
        tracing::info!(request = %token, turns = self.store.len(), "response completed");
        Ok(outcome)
    }

    /// Fail the request with `error`, discard partial text, and apply the
    /// rollback policy. Hands the error back for the caller to surface.
    pub fn fail(&mut self, token: RequestToken, error: ChatError) -> ChatError {
        if self.active(token).is_err() {
            tracing::debug!(request = %token, "failure for inactive request ignored");
            return error;
        }
        tracing::warn!(request = %token, error = %error, "request failed");
        self.terminate();
        error
    }

    /// Give up on the request without an error. Same cleanup as `fail`.
    pub fn abandon(&mut self, token: RequestToken) -> Result<()> {
        self.active(token)?;
        tracing::info!(request = %token, "request abandoned");
        self.terminate();
        Ok(())
    }

    /// Abandon whatever is in flight. Returns whether anything was.
    pub fn abandon_in_flight(&mut self) -> bool {
        match self.in_flight.as_ref().map(|f| f.token) {
            Some(token) => self.abandon(token).is_ok(),
            None => false,
        }
    }

    // ── Provider-driven sends ────────────────────────────────────────────

    pub async fn send_message(
        &mut self,
        text: &str,
        attachments: Vec<AttachmentInput>,
    ) -> Result<TurnOutcome> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        self.send_message_with_events(text, attachments, tx).await
    }

    /// Send a message, emitting `SessionEvent`s as the reply streams in.
    pub async fn send_message_with_events(
        &mut self,
        text: &str,
        attachments: Vec<AttachmentInput>,
        event_tx: tokio::sync::mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<TurnOutcome> {
        let request = self.begin_send(text, attachments)?;
        self.drive(request, &event_tx).await
    }

    pub async fn retry_with_events(
        &mut self,
        attachments: Vec<AttachmentInput>,
        event_tx: tokio::sync::mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<TurnOutcome> {
        let request = self.retry(attachments)?;
        self.drive(request, &event_tx).await
    }

    /// One-shot question against a provider-side context cache. Does not
    /// touch the conversation or the session counters.
    pub async fn query_cache(&self, cache_name: &str, prompt: &str) -> Result<ProviderResponse> {
        crate::caching::query_cache(
            self.provider.as_ref(),
            &self.model,
            &self.config,
            cache_name,
            prompt,
        )
        .await
    }

    async fn drive(
        &mut self,
        request: OutboundRequest,
        event_tx: &tokio::sync::mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<TurnOutcome> {
        let token = request.token;
        let _ = event_tx.send(SessionEvent::Requesting {
            model: request.model.clone(),
        });

        let provider = Arc::clone(&self.provider);
        let mut stream = match provider
            .generate_stream(&request.model, &request.history, &request.config)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let _ = event_tx.send(SessionEvent::Error(e.to_string()));
                return Err(self.fail(token, e));
            }
        };

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Fragment(fragment) => {
                    let delta = fragment.text.clone().filter(|t| !t.is_empty());
                    if let Err(e) = self.push_fragment(token, fragment) {
                        return Err(self.fail(token, e));
                    }
                    if let Some(delta) = delta {
                        let _ = event_tx.send(SessionEvent::TextDelta(delta));
                    }
                }
                StreamEvent::Done => {
                    let outcome = self.finish(token)?;
                    let _ = event_tx.send(SessionEvent::Complete(outcome.clone()));
                    return Ok(outcome);
                }
                StreamEvent::Error(e) => {
                    let _ = event_tx.send(SessionEvent::Error(e.to_string()));
                    return Err(self.fail(token, e));
                }
            }
        }

        let e = ChatError::provider("Stream closed before completion");
        let _ = event_tx.send(SessionEvent::Error(e.to_string()));
        Err(self.fail(token, e))
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn ensure_idle(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(ChatError::RequestInFlight);
        }
        // Left over from before a clear.
        self.in_flight = None;
        Ok(())
    }

    fn start(&mut self, history: Vec<ProviderTurn>) -> Result<OutboundRequest> {
        let token = RequestToken::new();
        let mut assembly = ResponseAssembly::new();
        assembly.start_request()?;
        self.in_flight = Some(InFlight {
            token,
            epoch: self.store.epoch(),
            assembly,
        });
        tracing::info!(request = %token, model = %self.model, turns = history.len(), "sending request");
        Ok(OutboundRequest {
            token,
            model: self.model.clone(),
            history,
            config: self.config.clone(),
        })
    }

    fn active(&mut self, token: RequestToken) -> Result<&mut InFlight> {
        let epoch = self.store.epoch();
        match self.in_flight.as_ref().map(|f| (f.token == token, f.epoch == epoch)) {
            Some((true, true)) => {}
            Some((true, false)) => {
                tracing::debug!(request = %token, "history cleared, dropping response");
                self.in_flight = None;
                return Err(ChatError::StaleRequest);
            }
            _ => return Err(ChatError::StaleRequest),
        }
        self.in_flight.as_mut().ok_or(ChatError::StaleRequest)
    }

    fn terminate(&mut self) {
        if let Some(mut flight) = self.in_flight.take() {
            let _ = flight.assembly.fail();
        }
        if self.policy.rollback_user_turn_on_failure && self.store.pop_pending_user().is_some() {
            tracing::info!("rolled back unanswered user turn");
        }
    }
}
