//! Watchlist Adapters
//!
//! Implementations of the [`SymbolSource`] port.

use async_trait::async_trait;

use crate::application::ports::{SymbolSource, SymbolSourceError};

/// Symbol source backed by a fixed list, typically from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticSymbolSource {
    symbols: Vec<String>,
}

impl StaticSymbolSource {
    /// Create a source holding `symbols`.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SymbolSource for StaticSymbolSource {
    async fn symbols(&self) -> Result<Vec<String>, SymbolSourceError> {
        Ok(self.symbols.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_current_list() {
        let source = StaticSymbolSource::new(["bitcoin", "ethereum"]);
        assert_eq!(source.symbols().await.unwrap(), vec!["bitcoin", "ethereum"]);
        // Raw ids are passed through; normalization happens downstream.
        let raw = StaticSymbolSource::new([" Solana "]);
        assert_eq!(raw.symbols().await.unwrap(), vec![" Solana "]);
    }

    #[tokio::test]
    async fn empty_by_default() {
        let source = StaticSymbolSource::default();
        assert!(source.symbols().await.unwrap().is_empty());
    }
}
