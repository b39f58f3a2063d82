//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for price streaming with no
//! I/O. The connection state machine, price events and the watched-symbol
//! set all live here.

/// Price streaming types (connection state, price updates, price book).
pub mod streaming;

/// Watched-symbol tracking.
pub mod subscription;
