use crate::store::Store;
use anyhow::{Context, Result};
use tracing::info;

/// Counts accepted facts and flushes the store every `commit_rate` of them.
///
/// A flush commits the open transaction and evicts the store's entity cache.
/// A commit rate of 0 disables intermediate flushes; the caller still commits
/// once at the end of the pass.
pub struct BatchSink {
    commit_rate: u32,
    accepted: u64,
    flushes: u64,
}

impl BatchSink {
    pub fn new(commit_rate: u32) -> Self {
        Self {
            commit_rate,
            accepted: 0,
            flushes: 0,
        }
    }

    /// Records one processor outcome and returns the running accepted count.
    pub fn record(&mut self, store: &mut dyn Store, accepted: bool) -> Result<u64> {
        if !accepted {
            return Ok(self.accepted);
        }
        self.accepted += 1;
        if self.commit_rate > 0 && self.accepted % u64::from(self.commit_rate) == 0 {
            info!(accepted = self.accepted, "Reached batch size, committing");
            store
                .commit()
                .with_context(|| format!("Commit failed after {} accepted elements", self.accepted))?;
            store.evict_all();
            self.flushes += 1;
        }
        Ok(self.accepted)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Intermediate commits performed so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}
