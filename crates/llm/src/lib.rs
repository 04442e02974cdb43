pub mod client;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod profile;
pub mod schema;

pub use client::{strip_think, Backend, LlmClient, LlmConfig, LlmError, QueryRequest};
pub use profile::DecodingProfile;
pub use schema::GuidedSchema;

use async_trait::async_trait;

/// Capability set shared by every completion backend.
///
/// Both forms have identical semantics: one round trip, no caching, no
/// internal retry. Retry policy belongs to the caller.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<String, LlmError>;

    /// Blocking form. Must not be called from inside an async runtime.
    fn query_blocking(&self, request: &QueryRequest) -> Result<String, LlmError>;
}
