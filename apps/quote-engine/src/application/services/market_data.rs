//! Market Data Service
//!
//! Entry point for quote lookups and alert management. Owns the price cache,
//! the alert engine and the request scheduler, and ties them to the quote
//! provider, the trade stream and the notification sink.
//!
//! # Data Flow
//!
//! ```text
//! get_current_quote ─► cache hit? ──yes──► quote
//!                          │ no
//!                          ▼
//!                   RequestScheduler ─► QuoteProvider ─┬─► publish ─► cache ─► alerts
//!                                                      └─► error ─► synthetic quote
//!
//! StreamEvent::Trade ─► dispatcher ─► publish ─► cache ─► alerts
//!
//! alerts ─► trigger channel ─► notifier task ─► NotificationSink
//! ```
//!
//! # Locking
//!
//! Publishing takes the cache write lock and evaluates alerts while holding
//! it, so updates for a symbol are applied and evaluated in arrival order.
//! Triggers leave through an unbounded channel; the sink is never called
//! under a lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::fallback::SyntheticQuoteGenerator;
use super::health::{HealthReport, classify};
use super::scheduler::{BatchConfig, RequestScheduler, SchedulerError};
use crate::application::ports::{
    NotificationSink, ProviderError, QuoteProvider, StreamEvent, StreamSubscriber, TradeTick,
};
use crate::domain::alert::{Alert, AlertEngine, AlertError, AlertId, AlertTrigger, Direction};
use crate::domain::cache::PriceCache;
use crate::domain::clock::SharedClock;
use crate::domain::quota::{QuotaState, QuotaTracker};
use crate::domain::quote::{Quote, Symbol, normalize_symbol};
use crate::domain::subscription::{ConnectionState, SubscriptionChange};
use crate::infrastructure::metrics::{
    QuoteSource, record_alerts_triggered, record_fallback, record_provider_request,
    record_quote_served, record_stream_tick, set_cache_entries, set_stream_connected,
};

// =============================================================================
// Settings
// =============================================================================

/// Tunables for [`MarketDataService`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Provider requests allowed per quota window.
    pub quota_limit: u32,
    /// Quota window length.
    pub quota_window: chrono::Duration,
    /// Cache freshness bound.
    pub cache_ttl: chrono::Duration,
    /// Minimum delay between two provider requests.
    pub request_spacing: Duration,
    /// Timeout applied to every provider request.
    pub request_timeout: Duration,
    /// Sub-batch settings for multi-symbol lookups.
    pub batch: BatchConfig,
    /// Minimum time between two triggers of one alert.
    pub alert_cooldown: chrono::Duration,
    /// Alert symbol refresh period while the stream is down. Zero disables it.
    pub poll_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            quota_limit: crate::domain::quota::DEFAULT_QUOTA_LIMIT,
            quota_window: crate::domain::quota::DEFAULT_QUOTA_WINDOW,
            cache_ttl: crate::domain::cache::DEFAULT_CACHE_TTL,
            request_spacing: super::scheduler::DEFAULT_REQUEST_SPACING,
            request_timeout: Duration::from_secs(10),
            batch: BatchConfig::default(),
            alert_cooldown: crate::domain::alert::DEFAULT_ALERT_COOLDOWN,
            poll_interval: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Quote lookup, alert registration and status reporting.
///
/// Build with [`new`](Self::new) and the `with_*` methods, wrap in an `Arc`,
/// then [`start`](Self::start). Without a provider (or after the provider
/// rejects the credentials) the service runs in demo mode and serves
/// synthetic quotes.
pub struct MarketDataService {
    settings: ServiceSettings,
    clock: SharedClock,
    cache: RwLock<PriceCache>,
    alerts: Mutex<AlertEngine>,
    scheduler: RequestScheduler,
    fallback: SyntheticQuoteGenerator,
    provider: Option<Arc<dyn QuoteProvider>>,
    stream: Option<Arc<dyn StreamSubscriber>>,
    stream_events: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    sink: Arc<dyn NotificationSink>,
    trigger_tx: mpsc::UnboundedSender<AlertTrigger>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<AlertTrigger>>>,
    unauthorized: Arc<AtomicBool>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for MarketDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataService")
            .field("settings", &self.settings)
            .field("demo_mode", &self.demo_mode())
            .finish_non_exhaustive()
    }
}

impl MarketDataService {
    /// Create a service in demo mode with no stream attached.
    #[must_use]
    pub fn new(settings: ServiceSettings, clock: SharedClock, sink: Arc<dyn NotificationSink>) -> Self {
        let now = clock.now();
        let quota = QuotaTracker::new(settings.quota_limit, settings.quota_window, now);
        let scheduler = RequestScheduler::new(quota, Arc::clone(&clock), settings.request_spacing);
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        Self {
            cache: RwLock::new(PriceCache::new(settings.cache_ttl)),
            alerts: Mutex::new(AlertEngine::new(settings.alert_cooldown)),
            scheduler,
            fallback: SyntheticQuoteGenerator::new(),
            provider: None,
            stream: None,
            stream_events: Mutex::new(None),
            sink,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            unauthorized: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            settings,
            clock,
        }
    }

    /// Fetch quotes from `provider` instead of running in demo mode.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn QuoteProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attach a trade stream and the receiving end of its event channel.
    #[must_use]
    pub fn with_stream(
        mut self,
        stream: Arc<dyn StreamSubscriber>,
        events: mpsc::Receiver<StreamEvent>,
    ) -> Self {
        self.stream = Some(stream);
        *self.stream_events.get_mut() = Some(events);
        self
    }

    /// Replace the synthetic quote generator (e.g. with a seeded one).
    #[must_use]
    pub fn with_fallback(mut self, fallback: SyntheticQuoteGenerator) -> Self {
        self.fallback = fallback;
        self
    }

    /// Spawn the scheduler, notifier, stream dispatcher and alert poller.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyStarted`] if called twice.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut tasks = vec![self.scheduler.start(self.cancel.child_token())?];

        if let Some(trigger_rx) = self.trigger_rx.lock().take() {
            tasks.push(tokio::spawn(run_notifier(
                Arc::clone(&self.sink),
                trigger_rx,
                self.cancel.clone(),
            )));
        }

        if let Some(events) = self.stream_events.lock().take() {
            tasks.push(tokio::spawn(Arc::clone(self).run_dispatcher(events)));
        }

        tasks.push(tokio::spawn(Arc::clone(self).run_alert_poller()));
        self.tasks.lock().extend(tasks);

        tracing::info!(
            demo_mode = self.demo_mode(),
            streaming = self.stream.is_some(),
            "Market data service started"
        );
        Ok(())
    }

    /// Stop every background task and wait for them to finish.
    ///
    /// Triggers already decided are still delivered to the sink.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Service task ended abnormally");
            }
        }

        tracing::info!("Market data service stopped");
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    /// Latest quote for `symbol`. Never fails: errors yield a synthetic quote.
    pub async fn get_current_quote(&self, symbol: &str) -> Quote {
        let symbol = normalize_symbol(symbol);

        if let Some(quote) = self.fresh_quote(&symbol) {
            record_quote_served(QuoteSource::Cache);
            return quote;
        }

        let Some(provider) = self.live_provider() else {
            return self.fallback_quote(&symbol, "demo_mode");
        };

        let unauthorized = Arc::clone(&self.unauthorized);
        let timeout = self.settings.request_timeout;
        let request_symbol = symbol.clone();
        let outcome = self
            .scheduler
            .enqueue(move || {
                fetch_quote_with_timeout(provider, unauthorized, request_symbol, timeout)
            })
            .await;

        self.resolve(&symbol, outcome)
    }

    /// Latest quotes for several symbols, keyed by normalized symbol.
    ///
    /// Cache misses are fetched through the scheduler in sub-batches. Never
    /// fails: every requested symbol gets a quote.
    pub async fn get_batch_quotes<S: AsRef<str>>(&self, symbols: &[S]) -> HashMap<Symbol, Quote> {
        let mut wanted: Vec<Symbol> = symbols
            .iter()
            .map(|symbol| normalize_symbol(symbol.as_ref()))
            .filter(|symbol| !symbol.is_empty())
            .collect();
        wanted.sort();
        wanted.dedup();

        let mut quotes = HashMap::with_capacity(wanted.len());
        let mut missing = Vec::new();
        {
            let now = self.clock.now();
            let cache = self.cache.read();
            for symbol in wanted {
                if let Some(quote) = cache.get(&symbol, now) {
                    record_quote_served(QuoteSource::Cache);
                    quotes.insert(symbol, quote.clone());
                } else {
                    missing.push(symbol);
                }
            }
        }

        if missing.is_empty() {
            return quotes;
        }

        let Some(provider) = self.live_provider() else {
            for symbol in missing {
                let quote = self.fallback_quote(&symbol, "demo_mode");
                quotes.insert(symbol, quote);
            }
            return quotes;
        };

        let unauthorized = Arc::clone(&self.unauthorized);
        let timeout = self.settings.request_timeout;
        let outcomes = self
            .scheduler
            .enqueue_batch(missing.clone(), self.settings.batch, move |symbol| {
                fetch_quote_with_timeout(
                    Arc::clone(&provider),
                    Arc::clone(&unauthorized),
                    symbol,
                    timeout,
                )
            })
            .await;

        for (symbol, outcome) in missing.into_iter().zip(outcomes) {
            let quote = self.resolve(&symbol, outcome);
            quotes.insert(symbol, quote);
        }

        quotes
    }

    /// Apply a quote to the cache and evaluate the symbol's alerts.
    ///
    /// Returns the quote now cached for the symbol, which is the cached one
    /// when `quote` is older than it.
    pub fn publish_quote(&self, quote: Quote) -> Quote {
        let now = self.clock.now();
        let mut cache = self.cache.write();
        self.commit(&mut cache, quote, now)
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Register a price alert. The symbol is added to the stream on its
    /// first alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError` for a blank symbol or a non-positive threshold.
    pub fn add_alert(
        &self,
        owner_id: &str,
        symbol: &str,
        direction: Direction,
        threshold_price: Decimal,
    ) -> Result<AlertId, AlertError> {
        let now = self.clock.now();
        let mut alerts = self.alerts.lock();
        let registration = alerts.register(owner_id, symbol, direction, threshold_price, now)?;

        if let Some(change) = registration.change {
            self.apply_subscription_change(change);
        }

        tracing::info!(owner_id, alert_id = %registration.id, ?direction, %threshold_price, "Alert registered");
        Ok(registration.id)
    }

    /// Remove an alert owned by `owner_id`. The symbol leaves the stream
    /// when its last alert is removed.
    pub fn remove_alert(&self, owner_id: &str, alert_id: AlertId) -> bool {
        let mut alerts = self.alerts.lock();
        let removal = alerts.unregister(owner_id, alert_id);

        if let Some(change) = removal.change {
            self.apply_subscription_change(change);
        }

        if removal.removed {
            tracing::info!(owner_id, %alert_id, "Alert removed");
        }
        removal.removed
    }

    /// Active alerts owned by `owner_id`.
    #[must_use]
    pub fn list_alerts(&self, owner_id: &str) -> Vec<Alert> {
        self.alerts.lock().list(owner_id)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Current request budget.
    #[must_use]
    pub fn api_status(&self) -> QuotaState {
        self.scheduler.quota_status()
    }

    /// Snapshot of the engine's health. Pure read.
    #[must_use]
    pub fn health_check(&self) -> HealthReport {
        let quota = self.api_status();
        let connection_state = self.connection_state();
        let connection_open = connection_state.is_open();
        let pending_requests = self.scheduler.pending();

        HealthReport {
            status: classify(connection_open, &quota),
            quota,
            connection_open,
            connection_state,
            cache_size: self.cache.read().len(),
            subscribed_symbols: self
                .stream
                .as_ref()
                .map_or_else(Vec::new, |stream| stream.subscribed_symbols()),
            active_alerts: self.alerts.lock().active_count(),
            pending_requests,
            demo_mode: self.demo_mode(),
        }
    }

    /// Whether quotes come from the synthetic generator only.
    #[must_use]
    pub fn demo_mode(&self) -> bool {
        self.live_provider().is_none()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn fresh_quote(&self, symbol: &str) -> Option<Quote> {
        self.cache.read().get(symbol, self.clock.now()).cloned()
    }

    fn live_provider(&self) -> Option<Arc<dyn QuoteProvider>> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return None;
        }
        self.provider.clone()
    }

    fn connection_state(&self) -> ConnectionState {
        self.stream
            .as_ref()
            .map_or(ConnectionState::Disconnected, |stream| stream.connection_state())
    }

    fn resolve(
        &self,
        symbol: &str,
        outcome: Result<Result<Quote, ProviderError>, SchedulerError>,
    ) -> Quote {
        match outcome {
            Ok(Ok(quote)) => {
                record_provider_request("ok");
                record_quote_served(QuoteSource::Provider);
                self.publish_quote(quote)
            }
            Ok(Err(error)) => {
                record_provider_request(error.reason());
                self.handle_provider_error(symbol, &error)
            }
            Err(error) => {
                tracing::warn!(symbol, error = %error, "Quote request not run, serving synthetic quote");
                self.fallback_quote(symbol, "scheduler_closed")
            }
        }
    }

    fn handle_provider_error(&self, symbol: &str, error: &ProviderError) -> Quote {
        match error {
            ProviderError::Unauthorized => {
                if !self.unauthorized.swap(true, Ordering::Relaxed) {
                    tracing::error!(
                        "Quote provider rejected the API key, serving synthetic quotes for the rest of the run"
                    );
                }
            }
            ProviderError::InvalidPayload(_) | ProviderError::NoData(_) => {
                tracing::warn!(symbol, error = %error, "Unusable provider quote, serving synthetic quote");
            }
            _ => {
                tracing::warn!(symbol, error = %error, "Quote fetch failed, serving synthetic quote");
            }
        }

        self.fallback_quote(symbol, error.reason())
    }

    /// Synthetic quote for `symbol`, cached and evaluated like a real one so
    /// a failing symbol does not hit the provider again within the TTL.
    fn fallback_quote(&self, symbol: &str, reason: &'static str) -> Quote {
        let quote = self.fallback.synthetic_quote(symbol, self.clock.now());
        record_fallback(reason);
        record_quote_served(QuoteSource::Fallback);
        self.publish_quote(quote)
    }

    fn commit(&self, cache: &mut PriceCache, quote: Quote, now: chrono::DateTime<chrono::Utc>) -> Quote {
        let outcome = cache.put(quote.clone());
        set_cache_entries(cache.len());

        if !outcome.is_applied() {
            tracing::trace!(symbol = %quote.symbol, "Discarding out-of-order quote");
            return cache.peek(&quote.symbol).cloned().unwrap_or(quote);
        }

        let triggers = self.alerts.lock().evaluate(&quote, now);
        if !triggers.is_empty() {
            record_alerts_triggered(triggers.len());
        }
        for trigger in triggers {
            tracing::debug!(
                alert_id = %trigger.alert_id,
                symbol = %trigger.symbol,
                price = %trigger.price,
                "Queueing alert trigger"
            );
            let _ = self.trigger_tx.send(trigger);
        }

        quote
    }

    fn apply_subscription_change(&self, change: SubscriptionChange) {
        let Some(stream) = &self.stream else {
            return;
        };

        match change {
            SubscriptionChange::Subscribe(symbol) => stream.subscribe(&symbol),
            SubscriptionChange::Unsubscribe(symbol) => stream.unsubscribe(&symbol),
        }
    }

    // =========================================================================
    // Background Tasks
    // =========================================================================

    async fn run_dispatcher(self: Arc<Self>, mut events: mpsc::Receiver<StreamEvent>) {
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            self.handle_stream_event(event);
        }

        tracing::debug!("Stream dispatcher stopped");
    }

    fn handle_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::Trade(tick) => self.apply_trade(tick),
            StreamEvent::StateChanged(state) => {
                set_stream_connected(state.is_open());
                tracing::debug!(state = state.as_str(), "Stream state changed");
            }
            StreamEvent::PermanentlyClosed { reason } => {
                set_stream_connected(false);
                tracing::warn!(%reason, "Stream closed permanently, alerts continue in polling mode");
            }
        }
    }

    fn apply_trade(&self, tick: TradeTick) {
        if tick.price <= Decimal::ZERO {
            tracing::debug!(symbol = %tick.symbol, "Ignoring trade without a price");
            return;
        }
        record_stream_tick();

        let now = self.clock.now();
        let symbol = normalize_symbol(&tick.symbol);
        let mut cache = self.cache.write();
        let quote = Quote::from_trade(cache.peek(&symbol), symbol, tick.price, tick.volume, now);
        self.commit(&mut cache, quote, now);
    }

    async fn run_alert_poller(self: Arc<Self>) {
        let period = self.settings.poll_interval;
        if period.is_zero() {
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.connection_state().is_open() {
                continue;
            }

            let symbols = self.alerts.lock().watched_symbols();
            if symbols.is_empty() {
                continue;
            }

            tracing::debug!(count = symbols.len(), "Polling alert symbols");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = self.get_batch_quotes(&symbols) => {}
            }
        }

        tracing::debug!("Alert poller stopped");
    }
}

async fn fetch_quote_with_timeout(
    provider: Arc<dyn QuoteProvider>,
    unauthorized: Arc<AtomicBool>,
    symbol: Symbol,
    timeout: Duration,
) -> Result<Quote, ProviderError> {
    if unauthorized.load(Ordering::Relaxed) {
        return Err(ProviderError::Unauthorized);
    }

    tokio::time::timeout(timeout, provider.fetch_quote(&symbol))
        .await
        .unwrap_or(Err(ProviderError::Timeout))
}

async fn run_notifier(
    sink: Arc<dyn NotificationSink>,
    mut triggers: mpsc::UnboundedReceiver<AlertTrigger>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            trigger = triggers.recv() => match trigger {
                Some(trigger) => sink.notify(trigger).await,
                None => return,
            },
        }
    }

    while let Ok(trigger) = triggers.try_recv() {
        sink.notify(trigger).await;
    }
}
