//! Application Layer - Use cases and port definitions.
//!
//! Services here orchestrate the domain types against the outside world
//! through the traits in [`ports`].

/// Port interfaces for the quote provider and notification delivery.
pub mod ports;

/// Scheduler, fallback generator, health reporting and the market data service.
pub mod services;
