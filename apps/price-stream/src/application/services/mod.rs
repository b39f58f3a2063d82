//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `WatchlistSync`: Brings the stream's watched set in line with the
//!   symbol source

use crate::application::ports::{
    ControllerError, PriceStreamControl, SymbolSource, SymbolSourceError,
};
use crate::domain::subscription::{SubscriptionChanges, SubscriptionTracker};

/// Errors raised while syncing the watchlist.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The symbol source could not be read.
    #[error(transparent)]
    Source(#[from] SymbolSourceError),

    /// The price stream has stopped.
    #[error(transparent)]
    Stream(#[from] ControllerError),
}

/// Applies the symbol source's current list to a running price stream.
///
/// Additions are applied before removals so that replacing the whole list
/// never passes through an empty set, which would disconnect the stream.
#[derive(Debug)]
pub struct WatchlistSync<S, P> {
    source: S,
    stream: P,
}

impl<S, P> WatchlistSync<S, P>
where
    S: SymbolSource,
    P: PriceStreamControl,
{
    /// Create a new sync service.
    pub const fn new(source: S, stream: P) -> Self {
        Self { source, stream }
    }

    /// Pull the source and apply the difference.
    ///
    /// Returns what was added and removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the stream has
    /// stopped.
    pub async fn sync(&self) -> Result<SubscriptionChanges, SyncError> {
        let target = self.source.symbols().await?;

        let mut current = SubscriptionTracker::new();
        current.subscribe(self.stream.watched().await?);
        let diff = current.diff(&target);

        if diff.is_empty() {
            tracing::debug!(symbols = current.len(), "Watchlist already in sync");
            return Ok(diff);
        }

        let mut applied = SubscriptionChanges::default();
        if !diff.added.is_empty() {
            applied.added = self.stream.add(diff.added).await?.added;
        }
        if !diff.removed.is_empty() {
            applied.removed = self.stream.remove(diff.removed).await?.removed;
        }

        tracing::info!(
            added = ?applied.added,
            removed = ?applied.removed,
            "Watchlist synced"
        );
        Ok(applied)
    }
}
