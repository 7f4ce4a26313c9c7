pub mod cache;
pub mod gemini;
pub mod traits;

pub use cache::{
    format_ttl, parse_ttl, CacheHandle, CacheProvider, CacheRequest, ProcessingState,
    UploadedFile,
};
pub use gemini::GeminiClient;
pub use traits::{Fragment, ModelProvider, ProviderResponse, StreamEvent};
