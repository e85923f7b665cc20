//! Routes an incoming chat message to either a direct reply or a retrieve-then-generate
//! path. The classifier is untrusted here: every failure mode degrades toward doing
//! *more* work (retrieval), never toward silently skipping it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use relay_shared::error::RelayResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterDecision {
    Chat { reply: String },
    Search { query: String },
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &str) -> RelayResult<RouterDecision>;
}

const CLASSIFY_SOFT_DEADLINE: Duration = Duration::from_millis(300);

/// Calls `classifier.classify` once, retries once on timeout/error, and falls back to
/// [`RouterDecision::Search`] with the original query on two consecutive failures —
/// never to [`RouterDecision::Chat`], since skipping retrieval silently is worse than
/// an unnecessary retrieval pass.
pub async fn classify_with_retry(classifier: &dyn IntentClassifier, query: &str) -> RouterDecision {
    for attempt in 0..2 {
        match tokio::time::timeout(CLASSIFY_SOFT_DEADLINE, classifier.classify(query)).await {
            Ok(Ok(decision)) => return decision,
            Ok(Err(e)) => warn!(attempt, error = %e, "intent classification failed"),
            Err(_) => warn!(attempt, "intent classification exceeded its soft deadline"),
        }
    }
    RouterDecision::Search { query: query.to_string() }
}
