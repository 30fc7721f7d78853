//! Model gateway: the single seam between the deliberation pipeline and
//! remote model endpoints
//!
//! Everything above this module works in terms of `invoke(model, messages)`
//! returning text or a typed failure. Provider protocol details, auth
//! headers, and retry policy live below it.

mod error;
mod openrouter;
mod types;

pub use error::GatewayError;
pub use openrouter::OpenRouterGateway;
pub use types::{ChatMessage, Role};

use async_trait::async_trait;

/// Trait for model gateways
///
/// Implementations must not panic on remote errors; every failure mode maps
/// to a `GatewayError` so callers can apply a uniform fallback policy.
/// Retries, if any, happen inside the gateway and are not observable beyond
/// eventual success or failure.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Get the gateway name
    fn name(&self) -> &str;

    /// Invoke a named model with an ordered chat history, returning its text
    async fn invoke(&self, model: &str, messages: &[ChatMessage])
        -> Result<String, GatewayError>;
}
