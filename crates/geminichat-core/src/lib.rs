pub mod error;
pub mod constants;
pub mod context;
pub mod config;
pub mod llm;
pub mod session;
pub mod caching;

// Re-export key types
pub use error::{ChatError, Result};
pub use config::{GenerationConfig, Settings};
pub use context::{
    AttachmentInput, ContentPart, HistoryProjector, MimeAllowList, MimeCategory, ProviderPart,
    ProviderTurn, RequestToken, Role, Turn, TurnMetadata, TurnStore, UsageAccumulator,
    UsageCounters, UsageDelta,
};
pub use llm::{
    CacheHandle, CacheProvider, CacheRequest, Fragment, GeminiClient, ModelProvider,
    ProcessingState, ProviderResponse, StreamEvent, UploadedFile,
};
pub use session::{
    AssemblyState, AttachmentId, AttachmentTray, ChatSession, OutboundRequest, ResponseAssembly,
    SessionEvent, SessionPolicy, TurnOutcome,
};
pub use caching::{CacheJob, CacheJobEvent, CachePhase};
