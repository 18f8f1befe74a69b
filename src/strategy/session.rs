//! Market-hours session driver
//!
//! ```text
//! WaitingOpen ──clock.is_open──▶ Active ──close < wind_down──▶ WindingDown
//!      ▲                                                          │
//!      └──────────────────── sleep resume_after ◀─────────────────┘
//! ```

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{info, instrument, warn};

use super::batch::{cancel_open_orders, close_positions};
use super::telemetry::TelemetrySink;
use super::traits::SessionStrategy;
use crate::common::errors::Result;
use crate::common::traits::BrokerGateway;
use crate::common::types::{CalendarDay, Clock, OrderQuery};
use crate::config::types::{LongShortConfig, MeanReversionConfig};

/// Where the session is in the trading day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    WaitingOpen,
    Active,
    WindingDown,
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The strategy ran its per-tick logic
    Rebalanced,
    /// Positions were liquidated; sleep before the next session
    WindDown { resume_after: Duration },
    /// The clock could not be read; nothing was done
    ClockUnavailable,
}

/// Timing parameters of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Interval between ticks while the market is open
    pub tick_interval: Duration,
    /// Interval between clock polls while waiting for the open
    pub poll_interval: Duration,
    /// Wind down once the close is nearer than this
    pub wind_down: Duration,
    /// Pause after winding down before starting the next session
    pub resume_after: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            wind_down: Duration::from_secs(15 * 60),
            resume_after: Duration::from_secs(15 * 60),
        }
    }
}

impl From<&LongShortConfig> for SessionTiming {
    fn from(config: &LongShortConfig) -> Self {
        let tick = Duration::from_secs(config.tick_interval_seconds.max(1));
        Self {
            tick_interval: tick,
            poll_interval: tick,
            wind_down: Duration::from_secs(config.wind_down_minutes.max(0) as u64 * 60),
            resume_after: Duration::from_secs(config.resume_after_minutes * 60),
        }
    }
}

impl From<&MeanReversionConfig> for SessionTiming {
    fn from(config: &MeanReversionConfig) -> Self {
        let tick = Duration::from_secs(config.tick_interval_seconds.max(1));
        Self {
            tick_interval: tick,
            poll_interval: tick,
            wind_down: Duration::from_secs(config.wind_down_minutes.max(0) as u64 * 60),
            resume_after: Duration::from_secs(config.resume_after_minutes * 60),
        }
    }
}

/// Today's regular trading hours in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub open: DateTime<Utc>,
    pub close: DateTime<Utc>,
}

impl SessionWindow {
    /// Place the calendar's exchange-local hours on the UTC timeline
    ///
    /// The open clock's `next_close` is today's close, which fixes the
    /// exchange offset without a timezone database.
    pub fn from_calendar(day: &CalendarDay, clock: &Clock) -> Option<Self> {
        let local_open = day.date.and_time(day.open_time()?);
        let local_close = day.date.and_time(day.close_time()?);
        let offset = local_close - clock.next_close.naive_utc();
        let open = Utc.from_utc_datetime(&(local_open - offset));
        (open < clock.next_close).then_some(Self {
            open,
            close: clock.next_close,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.open <= at && at <= self.close
    }
}

/// Drives a strategy through trading days until the kill switch fires
pub struct Session<G, S> {
    gateway: Arc<G>,
    strategy: S,
    telemetry: Arc<dyn TelemetrySink>,
    timing: SessionTiming,
    shutdown: watch::Receiver<bool>,
    phase: MarketPhase,
    window: Option<SessionWindow>,
}

impl<G, S> Session<G, S>
where
    G: BrokerGateway + 'static,
    S: SessionStrategy,
{
    pub fn new(
        gateway: Arc<G>,
        strategy: S,
        telemetry: Arc<dyn TelemetrySink>,
        timing: SessionTiming,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            strategy,
            telemetry,
            timing,
            shutdown,
            phase: MarketPhase::WaitingOpen,
            window: None,
        }
    }

    pub fn phase(&self) -> MarketPhase {
        self.phase
    }

    /// Trading hours of the current session, once the market has opened
    pub fn session_window(&self) -> Option<SessionWindow> {
        self.window
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Run sessions back to back until shutdown
    #[instrument(skip(self), fields(strategy = %self.strategy.name()))]
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if self.is_stopped() {
                break;
            }

            self.start_session().await;

            if !self.wait_for_open().await {
                break;
            }

            let resume_after = match self.run_ticks().await {
                Some(resume_after) => resume_after,
                None => break,
            };

            info!("Sleeping {:?} before the next session", resume_after);
            if !self.pause(resume_after).await {
                break;
            }
        }

        info!("Session stopped");
        Ok(())
    }

    /// Cancel leftovers from the previous session and reset the strategy
    pub async fn start_session(&mut self) {
        self.phase = MarketPhase::WaitingOpen;
        self.window = None;
        let gateway = self.gateway.as_ref();

        let cancelled = cancel_open_orders(gateway).await;
        if cancelled > 0 {
            info!("Cancelled {} open orders", cancelled);
        }

        if let Err(e) = self
            .strategy
            .on_session_start(gateway, self.telemetry.as_ref())
            .await
        {
            warn!(error = %e, "Session start hook failed");
        }
    }

    /// Poll the clock until the market opens; `false` on shutdown
    pub async fn wait_for_open(&mut self) -> bool {
        self.phase = MarketPhase::WaitingOpen;
        self.telemetry.record_event("Waiting for market to open...");

        loop {
            if self.is_stopped() {
                return false;
            }

            match self.gateway.get_clock().await {
                Ok(clock) if clock.is_open => {
                    self.phase = MarketPhase::Active;
                    self.telemetry.record_event("Market opened.");
                    self.load_session_window(&clock).await;
                    return true;
                }
                Ok(clock) => {
                    let minutes = clock.time_to_open().num_minutes();
                    self.telemetry
                        .record_event(&format!("{} minutes til next market open.", minutes));
                    self.record_equity().await;
                }
                Err(e) => warn!(error = %e, "Failed to read market clock"),
            }

            if !self.pause(self.timing.poll_interval).await {
                return false;
            }
        }
    }

    /// One pass of the active phase
    pub async fn tick(&mut self) -> TickOutcome {
        let gateway = self.gateway.as_ref();
        let telemetry = self.telemetry.as_ref();

        let clock = match gateway.get_clock().await {
            Ok(clock) => clock,
            Err(e) => {
                warn!(error = %e, "Failed to read market clock, skipping tick");
                return TickOutcome::ClockUnavailable;
            }
        };

        let wind_down = chrono::Duration::from_std(self.timing.wind_down)
            .unwrap_or_else(|_| chrono::Duration::zero());
        if clock.time_to_close() < wind_down {
            self.phase = MarketPhase::WindingDown;
            telemetry.record_event("Market closing soon. Closing positions.");
            if let Err(e) = self.strategy.on_wind_down(gateway, telemetry).await {
                warn!(error = %e, "Wind-down hook failed");
            }
            telemetry.record_event(&format!(
                "Sleeping until market close ({} minutes).",
                self.timing.resume_after.as_secs() / 60
            ));
            return TickOutcome::WindDown {
                resume_after: self.timing.resume_after,
            };
        }

        if let Err(e) = self.strategy.on_tick(gateway, telemetry).await {
            warn!(error = %e, "Tick failed");
        }

        self.record_equity().await;
        self.record_snapshot().await;
        TickOutcome::Rebalanced
    }

    /// Tick until wind-down; `None` on shutdown
    ///
    /// The first tick comes one full interval after the open.
    async fn run_ticks(&mut self) -> Option<Duration> {
        let period = self.timing.tick_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if !self.next_tick(&mut ticker).await {
                return None;
            }
            match self.tick().await {
                TickOutcome::WindDown { resume_after } => return Some(resume_after),
                TickOutcome::Rebalanced | TickOutcome::ClockUnavailable => {}
            }
        }
    }

    /// Look up today's hours so the equity curve can be bounded to them
    async fn load_session_window(&mut self, clock: &Clock) {
        let today = clock.timestamp.date_naive();
        let days = match self.gateway.get_calendar(today, today).await {
            Ok(days) => days,
            Err(e) => {
                warn!(error = %e, "Failed to fetch trading calendar");
                return;
            }
        };

        self.window = days
            .iter()
            .find(|day| day.date == today)
            .and_then(|day| SessionWindow::from_calendar(day, clock));
        if let Some(window) = self.window {
            info!(open = %window.open, close = %window.close, "Session hours");
            self.telemetry.record_session_window(window.open, window.close);
        }
    }

    async fn record_equity(&self) {
        match self.gateway.get_account().await {
            Ok(account) => self.telemetry.record_equity(Utc::now(), account.equity),
            Err(e) => warn!(error = %e, "Failed to fetch account for equity curve"),
        }
    }

    async fn record_snapshot(&self) {
        let query = OrderQuery::open();
        let (orders, positions) = tokio::join!(
            self.gateway.get_orders(&query),
            self.gateway.get_positions()
        );
        match (orders, positions) {
            (Ok(orders), Ok(positions)) => self.telemetry.record_snapshot(&orders, &positions),
            (Err(e), _) | (_, Err(e)) => warn!(error = %e, "Failed to refresh snapshot"),
        }
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration`; `false` if shutdown fired first
    async fn pause(&mut self, duration: Duration) -> bool {
        let timer = sleep(duration);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return !self.is_stopped(),
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait for the next tick; `false` if shutdown fired first
    async fn next_tick(&mut self, ticker: &mut Interval) -> bool {
        loop {
            tokio::select! {
                _ = ticker.tick() => return !self.is_stopped(),
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Cancel open orders, then close every position
pub async fn liquidate_all(gateway: &dyn BrokerGateway, telemetry: &dyn TelemetrySink) -> Vec<String> {
    cancel_open_orders(gateway).await;

    let positions = match gateway.get_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            warn!(error = %e, "Failed to fetch positions for liquidation");
            return Vec::new();
        }
    };

    let closed = close_positions(gateway, &positions).await;
    telemetry.record_event(&format!("Closed {} of {} positions.", closed.len(), positions.len()));
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockBrokerGateway;
    use crate::common::types::{Account, Position, PositionSide};
    use crate::strategy::telemetry::InMemoryTelemetry;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStrategy {
        ticks: Arc<AtomicUsize>,
        wind_downs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionStrategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_tick(
            &mut self,
            _gateway: &dyn BrokerGateway,
            _telemetry: &dyn TelemetrySink,
        ) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_wind_down(
            &mut self,
            _gateway: &dyn BrokerGateway,
            _telemetry: &dyn TelemetrySink,
        ) -> Result<()> {
            self.wind_downs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn clock(minutes_to_close: i64) -> Clock {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 19, 0, 0).unwrap();
        Clock {
            timestamp: now,
            is_open: true,
            next_open: now + chrono::Duration::hours(18),
            next_close: now + chrono::Duration::minutes(minutes_to_close),
        }
    }

    fn session(
        gateway: MockBrokerGateway,
    ) -> (Session<MockBrokerGateway, CountingStrategy>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let session = Session::new(
            Arc::new(gateway),
            CountingStrategy::default(),
            Arc::new(InMemoryTelemetry::new()),
            SessionTiming::default(),
            rx,
        );
        (session, tx)
    }

    #[tokio::test]
    async fn test_tick_winds_down_near_close() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_get_clock().returning(|| Ok(clock(10)));

        let (mut session, _tx) = session(gateway);
        let outcome = session.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::WindDown {
                resume_after: Duration::from_secs(15 * 60)
            }
        );
        assert_eq!(session.phase(), MarketPhase::WindingDown);
        assert_eq!(session.strategy().wind_downs.load(Ordering::SeqCst), 1);
        assert_eq!(session.strategy().ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tick_records_equity_and_snapshot() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_get_clock().returning(|| Ok(clock(120)));
        gateway.expect_get_account().times(1).returning(|| {
            Ok(Account {
                id: "acc".into(),
                status: "ACTIVE".into(),
                equity: dec!(100000),
                portfolio_value: dec!(100000),
                buying_power: dec!(200000),
                cash: dec!(100000),
            })
        });
        gateway
            .expect_get_orders()
            .withf(|query| *query == OrderQuery::open())
            .times(1)
            .returning(|_| Ok(Vec::new()));
        gateway.expect_get_positions().times(1).returning(|| {
            Ok(vec![Position {
                symbol: "AAPL".into(),
                side: PositionSide::Long,
                qty: dec!(10),
                market_value: dec!(1900),
                unrealized_pl: Decimal::ZERO,
                avg_entry_price: dec!(190),
                current_price: dec!(190),
            }])
        });

        let telemetry = Arc::new(InMemoryTelemetry::new());
        let (_tx, rx) = watch::channel(false);
        let mut session = Session::new(
            Arc::new(gateway),
            CountingStrategy::default(),
            telemetry.clone(),
            SessionTiming::default(),
            rx,
        );

        assert_eq!(session.tick().await, TickOutcome::Rebalanced);
        assert_eq!(session.strategy().ticks.load(Ordering::SeqCst), 1);
        assert_eq!(telemetry.equity_series().len(), 1);
        let snapshot = telemetry.snapshot();
        assert!(snapshot.orders.is_empty());
        assert_eq!(snapshot.positions[0].symbol, "AAPL");
    }

    #[test]
    fn test_session_window_from_calendar() {
        let day = CalendarDay {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            open: "09:30".into(),
            close: "16:00".into(),
            session_open: None,
            session_close: None,
        };
        // 19:00 UTC plus one hour puts the 16:00 local close at 20:00 UTC
        let window = SessionWindow::from_calendar(&day, &clock(60)).unwrap();
        assert_eq!(window.open, Utc.with_ymd_and_hms(2024, 3, 5, 13, 30, 0).unwrap());
        assert_eq!(window.close, Utc.with_ymd_and_hms(2024, 3, 5, 20, 0, 0).unwrap());
        assert!(window.contains(Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2024, 3, 5, 21, 0, 0).unwrap()));

        let garbled = CalendarDay {
            close: "late".into(),
            ..day
        };
        assert!(SessionWindow::from_calendar(&garbled, &clock(60)).is_none());
    }

    #[tokio::test]
    async fn test_clock_failure_skips_tick() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_get_clock().returning(|| {
            Err(crate::common::errors::ClientError::Timeout("clock".into()))
        });

        let (mut session, _tx) = session(gateway);
        assert_eq!(session.tick().await, TickOutcome::ClockUnavailable);
        assert_eq!(session.strategy().ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_for_open() {
        let mut gateway = MockBrokerGateway::new();
        gateway.expect_get_clock().never();

        let (mut session, tx) = session(gateway);
        tx.send(true).unwrap();
        assert!(!session.wait_for_open().await);
    }

    #[test]
    fn test_timing_from_config() {
        let config = LongShortConfig {
            tick_interval_seconds: 30,
            wind_down_minutes: 20,
            resume_after_minutes: 5,
            ..LongShortConfig::default()
        };
        let timing = SessionTiming::from(&config);
        assert_eq!(timing.tick_interval, Duration::from_secs(30));
        assert_eq!(timing.wind_down, Duration::from_secs(1200));
        assert_eq!(timing.resume_after, Duration::from_secs(300));
    }
}
