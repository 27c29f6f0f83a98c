//! Price Alerts
//!
//! User-owned threshold rules evaluated against every applied quote.
//!
//! # Rules
//!
//! - An alert is breached when `ABOVE && price >= threshold` or
//!   `BELOW && price <= threshold`.
//! - A breached alert fires only if it never fired or its last trigger is at
//!   least one cool-down (default one hour) ago. Firing does not disable it.
//! - Removing an alert soft-disables it. Once the last alert on a symbol is
//!   removed, the symbol's alerts are purged and the stream subscription is
//!   released.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::quote::{Quote, Symbol, normalize_symbol};
use super::subscription::{SubscriptionChange, SymbolRefCounts};

/// Default minimum time between two triggers of the same alert.
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::hours(1);

/// Identifier of the user owning an alert.
pub type OwnerId = String;

/// Unique alert identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Which side of the threshold triggers the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Trigger when the price rises to or above the threshold.
    Above,
    /// Trigger when the price falls to or below the threshold.
    Below,
}

impl Direction {
    /// Whether `price` is on the triggering side of `threshold`.
    #[must_use]
    pub fn is_breached(self, price: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::Above => price >= threshold,
            Self::Below => price <= threshold,
        }
    }
}

/// A user-owned price threshold rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// Alert identifier.
    pub id: AlertId,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Watched symbol.
    pub symbol: Symbol,
    /// Triggering side.
    pub direction: Direction,
    /// Threshold price.
    pub threshold_price: Decimal,
    /// Whether the alert is still evaluated.
    pub active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last time the alert fired.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Alert {
    fn is_cooled_down(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_triggered_at
            .is_none_or(|last| now - last >= cooldown)
    }
}

/// Notification request produced when an alert fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertTrigger {
    /// Alert that fired.
    pub alert_id: AlertId,
    /// Owner to notify.
    pub owner_id: OwnerId,
    /// Symbol whose price breached the threshold.
    pub symbol: Symbol,
    /// Triggering side.
    pub direction: Direction,
    /// Price that caused the breach.
    pub price: Decimal,
    /// Configured threshold.
    pub threshold: Decimal,
    /// When the trigger was decided.
    pub triggered_at: DateTime<Utc>,
}

/// Alert registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    /// Symbol is empty after normalization.
    #[error("alert symbol cannot be empty")]
    EmptySymbol,
    /// Threshold must be a positive price.
    #[error("alert threshold must be positive, got {0}")]
    InvalidThreshold(Decimal),
}

/// Result of registering an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// New alert identifier.
    pub id: AlertId,
    /// Upstream subscription to open, if this is the symbol's first alert.
    pub change: Option<SubscriptionChange>,
}

/// Result of removing an alert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Removal {
    /// Whether an active alert owned by the caller was removed.
    pub removed: bool,
    /// Upstream subscription to close, if this was the symbol's last alert.
    pub change: Option<SubscriptionChange>,
}

/// Registry and evaluator for price alerts.
#[derive(Debug)]
pub struct AlertEngine {
    cooldown: Duration,
    alerts: HashMap<AlertId, Alert>,
    by_symbol: HashMap<Symbol, Vec<AlertId>>,
    refs: SymbolRefCounts,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_COOLDOWN)
    }
}

impl AlertEngine {
    /// Create an empty engine with the given cool-down.
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            alerts: HashMap::new(),
            by_symbol: HashMap::new(),
            refs: SymbolRefCounts::new(),
        }
    }

    /// Register a new alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError` if the symbol is blank or the threshold is not
    /// positive.
    pub fn register(
        &mut self,
        owner_id: &str,
        symbol: &str,
        direction: Direction,
        threshold_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Registration, AlertError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(AlertError::EmptySymbol);
        }
        if threshold_price <= Decimal::ZERO {
            return Err(AlertError::InvalidThreshold(threshold_price));
        }

        let alert = Alert {
            id: AlertId::new(),
            owner_id: owner_id.to_string(),
            symbol: symbol.clone(),
            direction,
            threshold_price,
            active: true,
            created_at: now,
            last_triggered_at: None,
        };
        let id = alert.id;

        self.alerts.insert(id, alert);
        self.by_symbol.entry(symbol.clone()).or_default().push(id);
        let change = self.refs.acquire(&symbol);

        Ok(Registration { id, change })
    }

    /// Remove an active alert owned by `owner_id`.
    ///
    /// Unknown ids, foreign owners and already removed alerts yield
    /// `removed: false`.
    pub fn unregister(&mut self, owner_id: &str, id: AlertId) -> Removal {
        let Some(alert) = self
            .alerts
            .get_mut(&id)
            .filter(|alert| alert.active && alert.owner_id == owner_id)
        else {
            return Removal::default();
        };

        alert.active = false;
        let symbol = alert.symbol.clone();

        // The record stays until the symbol is purged; evaluation skips it.
        if let Some(ids) = self.by_symbol.get_mut(&symbol) {
            ids.retain(|other| *other != id);
        }

        let change = self.refs.release(&symbol);
        if change.is_some() {
            self.purge_symbol(&symbol);
        }

        Removal {
            removed: true,
            change,
        }
    }

    /// Active alerts owned by `owner_id`, oldest first.
    #[must_use]
    pub fn list(&self, owner_id: &str) -> Vec<Alert> {
        let mut alerts: Vec<_> = self
            .alerts
            .values()
            .filter(|alert| alert.active && alert.owner_id == owner_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|alert| alert.created_at);
        alerts
    }

    /// Evaluate every active alert on the quote's symbol.
    ///
    /// Fired alerts record `now` as their last trigger time.
    pub fn evaluate(&mut self, quote: &Quote, now: DateTime<Utc>) -> Vec<AlertTrigger> {
        let Some(ids) = self.by_symbol.get(&quote.symbol) else {
            return Vec::new();
        };

        let mut triggers = Vec::new();
        for id in ids {
            let Some(alert) = self.alerts.get_mut(id) else {
                continue;
            };
            if !alert.active
                || !alert
                    .direction
                    .is_breached(quote.current_price, alert.threshold_price)
                || !alert.is_cooled_down(now, self.cooldown)
            {
                continue;
            }

            alert.last_triggered_at = Some(now);
            triggers.push(AlertTrigger {
                alert_id: alert.id,
                owner_id: alert.owner_id.clone(),
                symbol: alert.symbol.clone(),
                direction: alert.direction,
                price: quote.current_price,
                threshold: alert.threshold_price,
                triggered_at: now,
            });
        }

        triggers
    }

    /// Symbols with at least one active alert.
    #[must_use]
    pub fn watched_symbols(&self) -> Vec<Symbol> {
        self.refs.active_symbols()
    }

    /// Number of active alerts.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.alerts.values().filter(|alert| alert.active).count()
    }

    fn purge_symbol(&mut self, symbol: &str) {
        self.by_symbol.remove(symbol);
        self.alerts.retain(|_, alert| alert.symbol != symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
    }

    fn quote(symbol: &str, price: Decimal, observed_at: DateTime<Utc>) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            current_price: price,
            change: dec!(0),
            change_percent: dec!(0),
            high: price,
            low: price,
            open: price,
            previous_close: price,
            volume: None,
            observed_at,
        }
    }

    #[test_case(Direction::Above, dec!(195), dec!(190), true ; "above breached")]
    #[test_case(Direction::Above, dec!(190), dec!(190), true ; "above at threshold")]
    #[test_case(Direction::Above, dec!(189.99), dec!(190), false ; "above not breached")]
    #[test_case(Direction::Below, dec!(185), dec!(190), true ; "below breached")]
    #[test_case(Direction::Below, dec!(190), dec!(190), true ; "below at threshold")]
    #[test_case(Direction::Below, dec!(190.01), dec!(190), false ; "below not breached")]
    fn breach_rule(direction: Direction, price: Decimal, threshold: Decimal, expected: bool) {
        assert_eq!(direction.is_breached(price, threshold), expected);
    }

    #[test]
    fn cooldown_scenario() {
        let mut engine = AlertEngine::default();
        engine
            .register("user-1", "AAPL", Direction::Above, dec!(190), t0())
            .unwrap();

        let first = engine.evaluate(&quote("AAPL", dec!(195), t0()), t0());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].symbol, "AAPL");
        assert_eq!(first[0].price, dec!(195));
        assert_eq!(first[0].threshold, dec!(190));

        let ten_min = t0() + Duration::minutes(10);
        assert!(engine.evaluate(&quote("AAPL", dec!(196), ten_min), ten_min).is_empty());

        let sixty_one = t0() + Duration::minutes(61);
        let again = engine.evaluate(&quote("AAPL", dec!(197), sixty_one), sixty_one);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].price, dec!(197));
    }

    #[test]
    fn firing_keeps_alert_active() {
        let mut engine = AlertEngine::default();
        engine
            .register("user-1", "AAPL", Direction::Below, dec!(150), t0())
            .unwrap();

        engine.evaluate(&quote("AAPL", dec!(149), t0()), t0());

        let alerts = engine.list("user-1");
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].active);
        assert_eq!(alerts[0].last_triggered_at, Some(t0()));
    }

    #[test]
    fn other_symbols_are_not_evaluated() {
        let mut engine = AlertEngine::default();
        engine
            .register("user-1", "AAPL", Direction::Above, dec!(1), t0())
            .unwrap();

        assert!(engine.evaluate(&quote("MSFT", dec!(420), t0()), t0()).is_empty());
    }

    #[test]
    fn registration_validates_input() {
        let mut engine = AlertEngine::default();

        assert_eq!(
            engine.register("u", "  ", Direction::Above, dec!(10), t0()),
            Err(AlertError::EmptySymbol)
        );
        assert_eq!(
            engine.register("u", "AAPL", Direction::Above, dec!(0), t0()),
            Err(AlertError::InvalidThreshold(dec!(0)))
        );
    }

    #[test]
    fn registration_normalizes_symbol_and_subscribes_once() {
        let mut engine = AlertEngine::default();

        let first = engine
            .register("alice", " aapl", Direction::Above, dec!(190), t0())
            .unwrap();
        let second = engine
            .register("bob", "AAPL", Direction::Below, dec!(150), t0())
            .unwrap();

        assert_eq!(
            first.change,
            Some(SubscriptionChange::Subscribe("AAPL".to_string()))
        );
        assert_eq!(second.change, None);
        assert_eq!(engine.watched_symbols(), vec!["AAPL".to_string()]);
    }

    #[test]
    fn removal_is_reference_counted_across_owners() {
        let mut engine = AlertEngine::default();
        let alice = engine
            .register("alice", "AAPL", Direction::Above, dec!(190), t0())
            .unwrap()
            .id;
        let bob = engine
            .register("bob", "AAPL", Direction::Below, dec!(150), t0())
            .unwrap()
            .id;

        let removal = engine.unregister("alice", alice);
        assert!(removal.removed);
        assert_eq!(removal.change, None);
        assert!(engine.list("alice").is_empty());
        assert_eq!(engine.list("bob").len(), 1);

        // Soft-disabled alert no longer fires.
        let triggers = engine.evaluate(&quote("AAPL", dec!(200), t0()), t0());
        assert!(triggers.is_empty());

        let removal = engine.unregister("bob", bob);
        assert_eq!(
            removal.change,
            Some(SubscriptionChange::Unsubscribe("AAPL".to_string()))
        );
        assert!(engine.watched_symbols().is_empty());
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn churn_beside_a_long_lived_alert_keeps_evaluation_index_small() {
        let mut engine = AlertEngine::default();
        let keeper = engine
            .register("alice", "AAPL", Direction::Above, dec!(190), t0())
            .unwrap()
            .id;

        for _ in 0..100 {
            let id = engine
                .register("bob", "AAPL", Direction::Above, dec!(1), t0())
                .unwrap()
                .id;
            assert!(engine.unregister("bob", id).removed);
            assert!(!engine.alerts[&id].active);
        }

        assert_eq!(engine.by_symbol["AAPL"], vec![keeper]);
        let triggers = engine.evaluate(&quote("AAPL", dec!(200), t0()), t0());
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].alert_id, keeper);

        assert!(engine.unregister("alice", keeper).change.is_some());
        assert!(engine.alerts.is_empty());
        assert!(engine.by_symbol.is_empty());
    }

    #[test]
    fn removal_requires_matching_owner() {
        let mut engine = AlertEngine::default();
        let id = engine
            .register("alice", "AAPL", Direction::Above, dec!(190), t0())
            .unwrap()
            .id;

        assert!(!engine.unregister("mallory", id).removed);
        assert!(engine.unregister("alice", id).removed);
        assert!(!engine.unregister("alice", id).removed);
    }

    #[test]
    fn removing_unknown_alert_returns_false() {
        let mut engine = AlertEngine::default();
        assert_eq!(engine.unregister("alice", AlertId::new()), Removal::default());
    }

    #[test]
    fn list_is_ordered_by_creation() {
        let mut engine = AlertEngine::default();
        engine
            .register("alice", "MSFT", Direction::Above, dec!(500), t0() + Duration::seconds(5))
            .unwrap();
        engine
            .register("alice", "AAPL", Direction::Above, dec!(190), t0())
            .unwrap();

        let symbols: Vec<_> = engine
            .list("alice")
            .into_iter()
            .map(|alert| alert.symbol)
            .collect();
        assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn alert_id_round_trips_through_string() {
        let id = AlertId::new();
        assert_eq!(id.to_string().parse::<AlertId>().unwrap(), id);
    }
}
