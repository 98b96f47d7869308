use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::{ContributorId, PartnerId};

/// Map sizes above which idle entries are swept on the next lock call.
const SWEEP_THRESHOLD: usize = 1024;

/// One async mutex per key, created on demand and dropped once idle.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if map.len() >= SWEEP_THRESHOLD {
                // Only the map holds an idle slot, so nobody can be waiting on it.
                map.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            map.entry(key.to_owned()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-partner and per-contributor serialization shared by the settlement,
/// session and payout paths.
///
/// Whenever both are needed the partner lock is taken first.
#[derive(Clone, Default)]
pub struct LedgerLocks {
    partners: KeyedLocks,
    contributors: KeyedLocks,
}

impl LedgerLocks {
    pub async fn partner(&self, id: &PartnerId) -> OwnedMutexGuard<()> {
        self.partners.lock(id.as_str()).await
    }

    pub async fn contributor(&self, id: &ContributorId) -> OwnedMutexGuard<()> {
        self.contributors.lock(id.as_str()).await
    }

    /// Both locks, in partner-then-contributor order.
    pub async fn settlement(
        &self,
        partner: &PartnerId,
        contributor: &ContributorId,
    ) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        let partner_guard = self.partner(partner).await;
        let contributor_guard = self.contributor(contributor).await;
        (partner_guard, contributor_guard)
    }
}
