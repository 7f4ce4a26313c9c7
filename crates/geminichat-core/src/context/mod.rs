mod turn;
mod history;
mod mime;
mod projector;
mod usage;

pub use turn::{AttachmentInput, ContentPart, Role, Turn, TurnMetadata};
pub use history::TurnStore;
pub use mime::{MimeAllowList, MimeCategory};
pub use projector::{FileData, HistoryProjector, InlineData, ProviderPart, ProviderTurn};
pub use usage::{RequestToken, UsageAccumulator, UsageCounters, UsageDelta};
