//! `creditgate-ai`
//!
//! **Responsibility:** the model-facing boundary of the system.
//!
//! - `completion`: the provider contract (`{model, messages, max_tokens,
//!   temperature} -> {choices[].message.content}`) and prompt payload parsing
//! - `http`: an OpenAI-compatible HTTP provider
//! - `abuse`: deterministic risk scoring over an account activity snapshot
//!
//! Nothing here touches the ledger. Scoring returns an assessment; deciding to
//! block is the caller's job.

pub mod abuse;
pub mod completion;
pub mod http;

pub use abuse::{
    AbuseDetector, AbuseThresholds, ActivitySnapshot, RequestTrace, RiskAssessment, RiskSignal,
    RiskVerdict, ScoredSignal,
};
pub use completion::{
    ChatMessage, Choice, ChoiceMessage, CompletionError, CompletionProvider, CompletionRequest,
    CompletionResponse, PromptDefaults, PromptPayload,
};
pub use http::HttpCompletionProvider;
