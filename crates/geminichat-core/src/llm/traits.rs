use crate::config::GenerationConfig;
use crate::context::{ProviderTurn, UsageDelta};
use crate::error::ChatError;

/// One incrementally delivered piece of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub text: Option<String>,
    pub usage: Option<UsageDelta>,
    /// Safety/policy stop reported by the provider.
    pub block_reason: Option<String>,
    /// Rendered search suggestion for grounded replies.
    pub grounding: Option<String>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: UsageDelta) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            block_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Events emitted on a streaming response channel.
#[derive(Debug)]
pub enum StreamEvent {
    Fragment(Fragment),
    Done,
    Error(ChatError),
}

/// A complete, non-streamed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Option<UsageDelta>,
    pub block_reason: Option<String>,
    pub grounding: Option<String>,
}

/// The model-provider collaborator. Implementations offer both a blocking
/// and a streaming call over already-projected history.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send the history and wait for the full reply.
    async fn generate(
        &self,
        model: &str,
        history: &[ProviderTurn],
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, ChatError>;

    /// Send the history and receive the reply as a stream of events.
    async fn generate_stream(
        &self,
        model: &str,
        history: &[ProviderTurn],
        config: &GenerationConfig,
    ) -> Result<futures::channel::mpsc::UnboundedReceiver<StreamEvent>, ChatError>;
}
