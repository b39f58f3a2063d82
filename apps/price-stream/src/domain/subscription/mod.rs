//! Subscription Tracking
//!
//! Domain types for the set of symbols the price stream is watching.
//!
//! # Design
//!
//! The feed negotiates its asset list only when a connection is opened, so
//! the tracker never talks to the transport. It only answers "what changed?"
//! for each add/remove, and the controller turns a non-empty change into a
//! reconnect.
//!
//! Identifiers are otherwise opaque. They are normalized on the way in
//! (trimmed, lower-cased) so that `"BTC"` and `"btc"` are the same entry;
//! escaping them for the connection target is the endpoint's job.

use std::collections::BTreeSet;

// =============================================================================
// Types
// =============================================================================

/// A symbol identifier (e.g. a coin id such as `bitcoin`).
pub type Symbol = String;

/// Normalize a raw identifier.
///
/// Returns `None` for identifiers that are empty after trimming.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let symbol = raw.trim().to_lowercase();
    (!symbol.is_empty()).then_some(symbol)
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Delta produced by a subscribe or unsubscribe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that were not watched before and now are.
    pub added: Vec<Symbol>,
    /// Symbols that were watched before and no longer are.
    pub removed: Vec<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Create changes with only additions.
    #[must_use]
    pub fn added_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            added: symbols.into_iter().collect(),
            removed: Vec::new(),
        }
    }

    /// Create changes with only removals.
    #[must_use]
    pub fn removed_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            added: Vec::new(),
            removed: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Subscription Tracker
// =============================================================================

/// Owns the watched-symbol set.
///
/// Not synchronized: the controller's actor task is the only owner.
///
/// # Example
///
/// ```rust
/// use price_stream::domain::subscription::SubscriptionTracker;
///
/// let mut tracker = SubscriptionTracker::new();
///
/// let changes = tracker.subscribe(["Bitcoin", "ethereum"]);
/// assert_eq!(changes.added, vec!["bitcoin".to_string(), "ethereum".to_string()]);
///
/// // Already watched - nothing to do
/// assert!(tracker.subscribe(["bitcoin"]).is_empty());
///
/// assert_eq!(tracker.symbols(), vec!["bitcoin", "ethereum"]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct SubscriptionTracker {
    symbols: BTreeSet<Symbol>,
}

impl SubscriptionTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols, returning those that were not already watched.
    ///
    /// Blank identifiers are skipped.
    pub fn subscribe<I, S>(&mut self, ids: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = Vec::new();

        for raw in ids {
            let Some(symbol) = normalize_symbol(raw.as_ref()) else {
                tracing::warn!(symbol = raw.as_ref(), "Ignoring blank symbol");
                continue;
            };

            if self.symbols.insert(symbol.clone()) {
                added.push(symbol);
            }
        }

        SubscriptionChanges::added_only(added)
    }

    /// Remove symbols, returning those that were actually watched.
    pub fn unsubscribe<I, S>(&mut self, ids: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = ids
            .into_iter()
            .filter_map(|raw| normalize_symbol(raw.as_ref()))
            .filter(|symbol| self.symbols.remove(symbol))
            .collect::<Vec<_>>();

        SubscriptionChanges::removed_only(removed)
    }

    /// Compute the changes that would turn the current set into `target`.
    ///
    /// Does not modify the tracker.
    #[must_use]
    pub fn diff<I, S>(&self, target: I) -> SubscriptionChanges
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let target: BTreeSet<Symbol> = target
            .into_iter()
            .filter_map(|raw| normalize_symbol(raw.as_ref()))
            .collect();

        SubscriptionChanges {
            added: target.difference(&self.symbols).cloned().collect(),
            removed: self.symbols.difference(&target).cloned().collect(),
        }
    }

    /// Watched symbols in sorted order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().cloned().collect()
    }

    /// Number of watched symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether nothing is watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
