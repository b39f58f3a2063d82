//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`FeedTransport`]: Opens a text-frame connection to the price feed
//! - [`FeedConnection`]: One open connection, read and closed by the stream
//! - [`SymbolSource`]: Portfolio/watchlist supplying the symbols to watch
//!
//! ## Driving Ports (Inbound)
//!
//! - [`PriceStreamControl`]: Changes the watched set of a running stream

use async_trait::async_trait;

use crate::domain::subscription::{Symbol, SubscriptionChanges};

// =============================================================================
// Feed Transport
// =============================================================================

/// Errors raised by a transport adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed (DNS, TCP, TLS or handshake).
    #[error("failed to open connection: {0}")]
    Open(String),

    /// Reading the next frame failed.
    #[error("failed to read frame: {0}")]
    Read(String),

    /// Closing the connection failed.
    #[error("failed to close connection: {0}")]
    Close(String),
}

/// Opens connections to the price feed.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] if the connection cannot be
    /// established.
    async fn open(&self, url: &str) -> Result<Box<dyn FeedConnection>, TransportError>;
}

/// An open connection to the price feed.
#[async_trait]
pub trait FeedConnection: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `Ok(None)` once the remote side has closed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Read`] if the connection broke.
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Close`] if the close handshake failed.
    async fn close(&mut self) -> Result<(), TransportError>;
}

// =============================================================================
// Symbol Source
// =============================================================================

/// Errors raised by a symbol source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SymbolSourceError {
    /// The source could not be read.
    #[error("symbol source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the symbols the user is interested in.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Current symbols of interest.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolSourceError`] if the source cannot be read.
    async fn symbols(&self) -> Result<Vec<String>, SymbolSourceError>;
}

// =============================================================================
// Price Stream Control
// =============================================================================

/// Errors raised when talking to a running price stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// The controller task has stopped.
    #[error("price stream controller has shut down")]
    Closed,
}

/// Changes the watched set of a running price stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStreamControl: Send + Sync {
    /// Currently watched symbols, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the stream has stopped.
    async fn watched(&self) -> Result<Vec<Symbol>, ControllerError>;

    /// Watch additional symbols.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the stream has stopped.
    async fn add(&self, ids: Vec<String>) -> Result<SubscriptionChanges, ControllerError>;

    /// Stop watching symbols.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the stream has stopped.
    async fn remove(&self, ids: Vec<String>) -> Result<SubscriptionChanges, ControllerError>;
}
