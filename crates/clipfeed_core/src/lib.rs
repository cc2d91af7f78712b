pub mod domain;
pub mod llm;
pub mod ports;
pub mod profile;
pub mod prompts;
pub mod saved;
pub mod schema;
pub mod share;
pub mod watch_monitor;

pub use domain::{
    ChangeEvent, GeneratedPrompt, PromptGeneration, SavedKind, SavedVideo, Share, WatchCounts,
};
pub use llm::{LlmConfig, LlmError, LlmRequest, LlmResponse, LlmResult, RetryPolicy};
pub use ports::{
    ChangeFeed, IdentityService, LanguageModelService, PortError, PortResult, ProfileBuilder,
    PromptStore, SavedVideoStore, ShareStore, WatchCountStore,
};
pub use schema::GenerationMode;
