use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::{
    error::LedgerError,
    model::{ContributorId, RelayCandidate},
    storage::SessionStore,
};

pub const NO_CONTRIBUTORS_AVAILABLE: &str = "No users available for routing";

/// Picks one contributor out of the eligible candidates.
pub trait SelectionStrategy: Send + Sync {
    fn pick<'a>(&self, candidates: &'a [RelayCandidate]) -> Option<&'a RelayCandidate>;

    fn name(&self) -> &'static str;
}

/// Every candidate is equally likely.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformRandom;

impl SelectionStrategy for UniformRandom {
    fn pick<'a>(&self, candidates: &'a [RelayCandidate]) -> Option<&'a RelayCandidate> {
        candidates.choose(&mut rand::thread_rng())
    }

    fn name(&self) -> &'static str {
        "uniform_random"
    }
}

/// Prefers the session with the most remaining bandwidth.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl SelectionStrategy for LeastLoaded {
    fn pick<'a>(&self, candidates: &'a [RelayCandidate]) -> Option<&'a RelayCandidate> {
        candidates
            .iter()
            .max_by(|a, b| a.headroom_mb.total_cmp(&b.headroom_mb))
    }

    fn name(&self) -> &'static str {
        "least_loaded"
    }
}

#[derive(Clone)]
pub struct ContributorSelector<S> {
    store: S,
    strategy: Arc<dyn SelectionStrategy>,
    min_headroom_mb: f64,
    candidate_limit: u64,
}

impl<S> ContributorSelector<S>
where
    S: SessionStore,
{
    pub fn new(store: S, min_headroom_mb: f64, candidate_limit: u64) -> Self {
        Self {
            store,
            strategy: Arc::new(UniformRandom),
            min_headroom_mb,
            candidate_limit: candidate_limit.max(1),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Honors an explicit contributor as-is; the settlement path verifies it
    /// has an active session. Otherwise picks among active sessions with
    /// enough headroom.
    pub async fn select(
        &self,
        requested: Option<ContributorId>,
    ) -> Result<ContributorId, LedgerError> {
        if let Some(contributor) = requested {
            return Ok(contributor);
        }

        let candidates = self
            .store
            .list_relay_candidates(self.min_headroom_mb, self.candidate_limit)
            .await?;
        let eligible: Vec<RelayCandidate> = candidates
            .into_iter()
            .filter(|candidate| candidate.headroom_mb >= self.min_headroom_mb)
            .collect();

        let chosen = self
            .strategy
            .pick(&eligible)
            .ok_or_else(|| LedgerError::ResourceUnavailable(NO_CONTRIBUTORS_AVAILABLE.into()))?;
        debug!(
            contributor = %chosen.contributor_id,
            strategy = self.strategy.name(),
            pool = eligible.len(),
            "selected contributor"
        );
        Ok(chosen.contributor_id.clone())
    }
}
