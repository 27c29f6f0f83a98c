//! Domain Layer - Quotes, quotas, cache and alert rules.
//!
//! Pure, synchronous types. Time is always passed in (or read through a
//! [`clock::Clock`]) so every rule is testable without a runtime.

/// Time source abstraction.
pub mod clock;

/// Quote value type and symbol normalization.
pub mod quote;

/// Fixed-window request budget.
pub mod quota;

/// Freshness-bounded latest-quote store.
pub mod cache;

/// Price alert rules and evaluation.
pub mod alert;

/// Per-symbol stream subscription reference counts.
pub mod subscription;
