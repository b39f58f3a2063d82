//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (feed transport, symbol source).
pub mod ports;

/// Application services coordinating the symbol source and the stream.
pub mod services;
