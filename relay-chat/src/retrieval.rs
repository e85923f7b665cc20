//! Retrieval-augmented generation: resolving how much to retrieve, and the trait the
//! actual vector/keyword search lives behind.

use async_trait::async_trait;

use relay_shared::domain::evidence::RetrievedEvidence;
use relay_shared::dynamic_config::DynamicConfig;
use relay_shared::error::RelayResult;

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> RelayResult<Vec<RetrievedEvidence>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub top_k: usize,
}

impl RetrievalParams {
    const DEFAULT_TOP_K: u64 = 5;
    const DEFAULT_MAX_CANDIDATES: u64 = 20;

    /// Resolve the effective `top_k`: an explicit per-request hint takes priority but
    /// is still raised to meet the operator-configured floor, then clamped to the
    /// operator-configured ceiling. Mirrors the original's layered
    /// request-hint/strategy-default/hard-ceiling resolution, minus the strategy
    /// classifier this scope doesn't carry.
    pub async fn resolve(hint: Option<usize>, dynamic_config: &DynamicConfig) -> RelayResult<Self> {
        let configured_default = dynamic_config.get_u64_or("rag_top_k", Self::DEFAULT_TOP_K).await?;
        let max_candidates = dynamic_config
            .get_u64_or("rag_max_candidates", Self::DEFAULT_MAX_CANDIDATES)
            .await?;

        let top_k = match hint {
            Some(requested) if requested > 0 => (requested as u64).max(configured_default),
            _ => configured_default,
        };
        let top_k = top_k.min(max_candidates).max(1);

        Ok(Self { top_k: top_k as usize })
    }
}
