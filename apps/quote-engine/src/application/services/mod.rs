//! Application Services
//!
//! - `RequestScheduler`: paces provider requests against the quota
//! - `SyntheticQuoteGenerator`: demo and fallback quotes
//! - `MarketDataService`: quote lookups, alerts and stream dispatch
//! - `health`: health report classification

pub mod fallback;
pub mod health;
pub mod market_data;
pub mod scheduler;

pub use fallback::SyntheticQuoteGenerator;
pub use health::{HealthReport, HealthStatus};
pub use market_data::{MarketDataService, ServiceSettings};
pub use scheduler::{BatchConfig, RequestScheduler, SchedulerError};
