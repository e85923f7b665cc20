//! Token-streaming generation boundary. A real implementation wraps a remote LLM
//! client's chunked HTTP/SSE response; here only the trait and a canned test double
//! live in this crate — the concrete client is an external integration detail.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use relay_shared::domain::sse_event::TokenUsage;
use relay_shared::error::{RelayError, RelayResult};

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

/// One chunk of a streamed completion. `usage` is `Some` only on the (implementation
/// defined) chunk that carries final token accounting — usually the last one.
#[derive(Debug, Clone)]
pub struct TokenChunk {
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub type GenError = RelayError;
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<TokenChunk, GenError>> + Send>>;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[PromptMessage], temperature: f64) -> RelayResult<TokenStream>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_double {
    use super::*;
    use futures::stream;

    /// Replays a fixed sequence of tokens as a stream, with usage attached to the
    /// final chunk — good enough to exercise the pipeline's per-token publication and
    /// assembly logic without a network call.
    pub struct ScriptedGenerator {
        pub tokens: Vec<&'static str>,
        pub usage: Option<TokenUsage>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _messages: &[PromptMessage], _temperature: f64) -> RelayResult<TokenStream> {
            let mut chunks: Vec<Result<TokenChunk, GenError>> = self
                .tokens
                .iter()
                .map(|t| {
                    Ok(TokenChunk {
                        content: Some(t.to_string()),
                        usage: None,
                    })
                })
                .collect();
            if let Some(last) = chunks.last_mut() {
                if let Ok(chunk) = last {
                    chunk.usage = self.usage.clone();
                }
            }
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    pub struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _messages: &[PromptMessage], _temperature: f64) -> RelayResult<TokenStream> {
            Err(RelayError::handler_runtime("generation backend unavailable"))
        }
    }
}
