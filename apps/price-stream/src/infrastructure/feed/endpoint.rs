//! Feed endpoint and connection target.

use url::form_urlencoded;

use crate::DEFAULT_FEED_URL;
use crate::domain::subscription::SubscriptionTracker;

/// Base address of the price feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    base: String,
}

impl Default for FeedEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_URL)
    }
}

impl FeedEndpoint {
    /// Create an endpoint from a base URL without query string.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let base = base.trim_end_matches('?').to_string();
        Self { base }
    }

    /// Base URL.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Connection target for the tracker's current symbols.
    ///
    /// The `assets` parameter is always present, even when empty. Each
    /// symbol is percent-encoded on its own so the separating commas stay
    /// literal.
    #[must_use]
    pub fn url_for(&self, tracker: &SubscriptionTracker) -> String {
        let assets = tracker
            .symbols()
            .iter()
            .map(|symbol| form_urlencoded::byte_serialize(symbol.as_bytes()).collect::<String>())
            .collect::<Vec<_>>()
            .join(",");

        format!("{}?assets={assets}", self.base)
    }
}
