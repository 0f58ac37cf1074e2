//! Model provider abstraction.
//!
//! A provider turns a [`CompletionRequest`] into a stream of [`Fragment`]s:
//! partial assistant turns, the last of which carries a finish reason.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use rusty_interp_core::merge::Fragment;
use rusty_interp_core::transcript::Turn;

#[cfg(feature = "openai")]
pub mod openai;
pub mod sse;

/// Credentials for authenticating with a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
    /// Local servers that take no key.
    #[serde(rename = "no_auth")]
    NoAuth,
}

/// A request to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub temperature: Option<f64>,
    /// Function schemas advertised to the model.
    pub functions: Vec<serde_json::Value>,
    pub system: Option<String>,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<Fragment>> + Send>>;

/// The core provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "openai").
    fn id(&self) -> &str;

    /// Convert the transcript into the provider's message format.
    fn format_messages(&self, transcript: &[Turn]) -> Vec<serde_json::Value>;

    /// Stream a chat completion as turn fragments.
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<FragmentStream>;
}
