//! Minimal, in-process implementations of the external-collaborator traits
//! (`IntentClassifier`, `Retriever`, `Generator`) so the demonstration binary can run
//! end to end without a live knowledge base or LLM provider wired in. None of these
//! are meant to be the product implementation — swapping them for a real classifier,
//! retriever, and streaming LLM client is the integration work this core deliberately
//! leaves external.

use async_trait::async_trait;
use futures::stream;

use relay_chat::{Generator, IntentClassifier, PromptMessage, RouterDecision, TokenChunk, TokenStream, Retriever};
use relay_shared::domain::evidence::RetrievedEvidence;
use relay_shared::error::RelayResult;

/// Routes anything that looks like a question, or is long enough to plausibly need
/// grounding, to the search path; short declarative/social content gets a canned
/// direct reply instead. A real classifier would call out to an LLM for this
/// decision, and a real chat-direct reply would come from that same call rather than
/// a fixed string.
pub struct HeuristicClassifier;

#[async_trait]
impl IntentClassifier for HeuristicClassifier {
    async fn classify(&self, query: &str) -> RelayResult<RouterDecision> {
        let trimmed = query.trim();
        let looks_like_a_question = trimmed.ends_with('?') || trimmed.len() > 60;
        if looks_like_a_question {
            Ok(RouterDecision::Search { query: trimmed.to_string() })
        } else {
            Ok(RouterDecision::Chat { reply: format!("You said: {trimmed}") })
        }
    }
}

/// No knowledge base is wired into this demonstration binary, so retrieval always
/// comes back empty. The chat handler already treats empty evidence as a normal,
/// ungrounded reply rather than an error.
pub struct NullRetriever;

#[async_trait]
impl Retriever for NullRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> RelayResult<Vec<RetrievedEvidence>> {
        Ok(Vec::new())
    }
}

/// Streams a canned acknowledgement back token by token instead of calling out to a
/// real LLM provider, exercising the handler's per-token publication path without a
/// network dependency.
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, messages: &[PromptMessage], _temperature: f64) -> RelayResult<TokenStream> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let reply = format!("You said: {last_user}");
        let tokens: Vec<Result<TokenChunk, relay_chat::GenError>> = reply
            .split_whitespace()
            .map(|word| Ok(TokenChunk { content: Some(format!("{word} ")), usage: None }))
            .collect();

        Ok(Box::pin(stream::iter(tokens)))
    }
}
