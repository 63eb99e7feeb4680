//! Polling loop.
//!
//! Each cycle walks the enabled instruments in registry order and, for each
//! one, runs acquisition → analysis → position tracking → notification to
//! completion before touching the next. Cycles outside trading hours are
//! skipped outright.

mod session;

pub use session::TradingCalendar;

use crate::config::{InstrumentRegistry, InstrumentSpec, MonitorConfig};
use crate::market::{DataAcquirer, IvSnapshot, Side};
use crate::notify::{Alert, Notifier, SignalContext};
use crate::risk::PositionTracker;
use crate::strategy::{ArbitrageSignal, SignalThrottle, SpreadAnalyzer, SpreadObservation};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters reported on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub signals: u64,
    pub outages: u64,
    pub store_failures: u64,
    pub delivery_failures: u64,
}

/// What one cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Outside trading hours; nothing was fetched
    pub skipped: bool,
    pub observations: Vec<SpreadObservation>,
    /// Signals that reached the notifier
    pub signals: Vec<ArbitrageSignal>,
    /// Instruments with at least one unavailable side
    pub outages: Vec<String>,
    pub store_failures: Vec<String>,
}

pub struct MonitorLoop {
    registry: Arc<InstrumentRegistry>,
    acquirer: DataAcquirer,
    analyzer: SpreadAnalyzer,
    tracker: PositionTracker,
    notifier: Arc<dyn Notifier>,
    calendar: TradingCalendar,
    config: MonitorConfig,
    signal_throttle: SignalThrottle,
    alert_throttle: SignalThrottle,
    stats: MonitorStats,
    shutdown: Arc<AtomicBool>,
}

impl MonitorLoop {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        acquirer: DataAcquirer,
        tracker: PositionTracker,
        notifier: Arc<dyn Notifier>,
        calendar: TradingCalendar,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            acquirer,
            analyzer: SpreadAnalyzer::new(),
            tracker,
            notifier,
            calendar,
            signal_throttle: SignalThrottle::from_secs(config.min_signal_interval_secs),
            alert_throttle: SignalThrottle::from_secs(config.min_signal_interval_secs),
            config,
            stats: MonitorStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a shutdown flag with a signal handler.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until the shutdown flag is set.
    pub async fn run(&mut self) -> MonitorStats {
        let instruments: Vec<String> = self
            .registry
            .enabled()
            .map(|s| format!("{} ({} {} / {} {})", s.name, s.domestic.exchange, s.domestic.symbol, s.foreign.exchange, s.foreign.symbol))
            .collect();
        self.deliver(&Alert::Started {
            instruments,
            poll_interval_secs: self.config.poll_interval_secs,
        })
        .await;

        info!("🚀 Starting monitor loop...");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        while !self.stopping() {
            let cycle_start = Utc::now();
            let report = self.run_cycle(cycle_start).await;

            if !report.skipped {
                let elapsed = (Utc::now() - cycle_start).num_milliseconds();
                debug!("⏱️  Cycle completed in {}ms", elapsed);
            }

            self.sleep_until_next_poll().await;
        }

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "🏁 Final statistics: {} cycles ({} skipped), {} signals, {} data outages, {} store failures, {} undelivered",
            self.stats.cycles,
            self.stats.skipped_cycles,
            self.stats.signals,
            self.stats.outages,
            self.stats.store_failures,
            self.stats.delivery_failures
        );
        self.deliver(&Alert::Stopped {
            cycles: self.stats.cycles,
            signals: self.stats.signals,
            outages: self.stats.outages,
        })
        .await;

        self.stats.clone()
    }

    /// One cycle, honouring trading hours.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        if !self.calendar.is_open(now) {
            self.stats.skipped_cycles += 1;
            debug!(
                local = %now.with_timezone(&self.calendar.timezone()).format("%a %H:%M"),
                "💤 Outside trading hours, skipping cycle"
            );
            return CycleReport {
                skipped: true,
                ..CycleReport::default()
            };
        }
        self.scan(now).await
    }

    /// One cycle over every enabled instrument, regardless of trading hours.
    pub async fn scan(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.stats.cycles += 1;
        let mut report = CycleReport::default();

        let registry = Arc::clone(&self.registry);
        for spec in registry.enabled() {
            if self.stopping() {
                info!("🛑 Shutdown requested, ending cycle early");
                break;
            }
            self.process_instrument(spec, now, &mut report).await;
        }

        info!(
            "📡 [SCAN] Cycle #{} done | {} instrument(s) | {} signal(s) | {} outage(s) | {} open position(s)",
            self.stats.cycles,
            report.observations.len(),
            report.signals.len(),
            report.outages.len(),
            self.tracker.open_count()
        );
        report
    }

    async fn process_instrument(
        &mut self,
        spec: &InstrumentSpec,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let (domestic, foreign) = match self.acquirer.acquire(&spec.id).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(instrument = %spec.id, error = %e, "❌ Acquisition fault");
                return;
            }
        };

        let (observation, open_signal) = self.analyzer.analyze(&domestic, &foreign, &spec.thresholds);
        log_observation(spec, &observation);

        if !observation.is_usable() {
            self.report_outage(spec, &domestic, &foreign, now, report).await;
        }

        let open_signal = open_signal.filter(|signal| {
            let allowed = self.signal_throttle.allows(&spec.id, now);
            if !allowed {
                debug!(
                    instrument = %spec.id,
                    signal = %signal.label(),
                    remaining_secs = self
                        .signal_throttle
                        .remaining(&spec.id, now)
                        .map(|d| d.num_seconds())
                        .unwrap_or_default(),
                    "🔕 [SIGNAL] Throttled"
                );
            }
            allowed
        });

        let signal = match self.tracker.on_cycle(spec, &observation, open_signal, now) {
            Ok(signal) => signal,
            Err(e) => {
                self.stats.store_failures += 1;
                error!(instrument = %spec.id, error = %e, "❌ [POSITION] Store write failed, transition not applied");
                report.store_failures.push(spec.id.clone());

                let key = format!("store:{}", spec.id);
                if self.alert_throttle.allows(&key, now) {
                    self.alert_throttle.record(&key, now);
                    self.deliver(&Alert::StoreFailure {
                        instrument_id: spec.id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                }
                report.observations.push(observation);
                return;
            }
        };

        if let Some(signal) = signal {
            self.signal_throttle.record(&spec.id, now);
            self.stats.signals += 1;
            info!(
                "🚨 [SIGNAL] {} {} | diff {} | {} | data {}",
                spec.id,
                signal.label(),
                signal
                    .diff_at_signal
                    .map(|d| format!("{:+.2}", d))
                    .unwrap_or_else(|| "n/a".to_string()),
                signal.direction,
                signal.data_quality
            );

            let alert = Alert::Signal {
                signal: signal.clone(),
                context: Box::new(SignalContext::for_signal(spec, &signal, &domestic, &foreign)),
            };
            self.deliver(&alert).await;
            report.signals.push(signal);
        }

        report.observations.push(observation);
    }

    async fn report_outage(
        &mut self,
        spec: &InstrumentSpec,
        domestic: &IvSnapshot,
        foreign: &IvSnapshot,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        self.stats.outages += 1;
        report.outages.push(spec.id.clone());

        let sides: Vec<Side> = [domestic, foreign]
            .into_iter()
            .filter(|s| !s.is_usable())
            .map(|s| s.side)
            .collect();
        warn!(instrument = %spec.id, ?sides, "⚠️  Volatility data unavailable, signalling suppressed");

        let key = format!("data:{}", spec.id);
        if self.alert_throttle.allows(&key, now) {
            self.alert_throttle.record(&key, now);
            self.deliver(&Alert::DataUnavailable {
                instrument_id: spec.id.clone(),
                instrument_name: spec.name.clone(),
                sides,
            })
            .await;
        }
    }

    async fn deliver(&mut self, alert: &Alert) {
        if !self.notifier.send(alert).await {
            self.stats.delivery_failures += 1;
            warn!(kind = alert.kind(), "📭 Alert not delivered");
        }
    }

    /// Sleep for the poll interval in one-second steps so shutdown is prompt.
    async fn sleep_until_next_poll(&self) {
        let mut remaining = self.config.poll_interval_secs;
        while remaining > 0 && !self.stopping() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }
    }
}

fn log_observation(spec: &InstrumentSpec, obs: &SpreadObservation) {
    let fmt = |v: Option<rust_decimal::Decimal>| {
        v.map(|v| format!("{:.2}%", v))
            .unwrap_or_else(|| "n/a".to_string())
    };
    info!(
        "📊 [SCAN] {} | {} {} | {} {} | diff {} | data {}",
        spec.id,
        spec.domestic.exchange,
        fmt(obs.domestic_iv),
        spec.foreign.exchange,
        fmt(obs.foreign_iv),
        obs.diff
            .map(|d| format!("{:+.2}", d))
            .unwrap_or_else(|| "n/a".to_string()),
        obs.data_quality
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_instruments, TradingWindow};
    use crate::error::SourceError;
    use crate::market::{IvQuality, VolatilitySource};
    use crate::persistence::PositionStore;
    use crate::risk::{PositionStatus, TrackerConfig};
    use crate::strategy::{CloseReason, SignalKind};
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Feed = Arc<Mutex<HashMap<(String, Side), Decimal>>>;

    /// Serves whatever value the test last put in the feed.
    struct FeedSource(Feed);

    #[async_trait]
    impl VolatilitySource for FeedSource {
        fn name(&self) -> &'static str {
            "feed"
        }

        async fn fetch(
            &self,
            spec: &InstrumentSpec,
            side: Side,
        ) -> Result<IvSnapshot, SourceError> {
            let value = self
                .0
                .lock()
                .unwrap()
                .get(&(spec.id.clone(), side))
                .copied()
                .ok_or_else(|| SourceError::unavailable("feed", "no value"))?;
            Ok(IvSnapshot::new(&spec.id, side, value, IvQuality::Web, "feed"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<Alert>>,
        /// Report every send as undelivered
        failing: bool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            Self {
                failing: true,
                ..Self::default()
            }
        }

        fn signals(&self) -> Vec<ArbitrageSignal> {
            self.alerts
                .lock()
                .unwrap()
                .iter()
                .filter_map(|a| match a {
                    Alert::Signal { signal, .. } => Some(signal.clone()),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, kind: &str) -> usize {
            self.alerts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.kind() == kind)
                .count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, alert: &Alert) -> bool {
            self.alerts.lock().unwrap().push(alert.clone());
            !self.failing
        }
    }

    struct Harness {
        monitor: MonitorLoop,
        feed: Feed,
        notifier: Arc<RecordingNotifier>,
        _dir: TempDir,
    }

    impl Harness {
        fn set_diff(&self, id: &str, diff: Decimal) {
            let mut feed = self.feed.lock().unwrap();
            feed.insert((id.to_string(), Side::Domestic), dec!(20));
            feed.insert((id.to_string(), Side::Foreign), dec!(20) + diff);
        }

        fn clear(&self, id: &str) {
            let mut feed = self.feed.lock().unwrap();
            feed.remove(&(id.to_string(), Side::Domestic));
            feed.remove(&(id.to_string(), Side::Foreign));
        }
    }

    fn harness_with(calendar: TradingCalendar, store_path: Option<std::path::PathBuf>) -> Harness {
        let mut instruments = default_instruments();
        instruments.truncate(1); // copper only
        build_harness(
            instruments,
            calendar,
            store_path,
            Arc::new(RecordingNotifier::default()),
        )
    }

    fn build_harness(
        instruments: Vec<InstrumentSpec>,
        calendar: TradingCalendar,
        store_path: Option<std::path::PathBuf>,
        notifier: Arc<RecordingNotifier>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(InstrumentRegistry::new(instruments).unwrap());

        let feed: Feed = Arc::new(Mutex::new(HashMap::new()));
        let acquirer = DataAcquirer::new(
            registry.clone(),
            vec![Box::new(FeedSource(feed.clone()))],
            Duration::from_secs(1),
        );

        let config = MonitorConfig::default();
        let path = store_path.unwrap_or_else(|| dir.path().join("positions.json"));
        let tracker =
            PositionTracker::restore(TrackerConfig::from(&config), PositionStore::new(path)).unwrap();

        let monitor = MonitorLoop::new(
            registry,
            acquirer,
            tracker,
            notifier.clone(),
            calendar,
            config,
        );

        Harness {
            monitor,
            feed,
            notifier,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(TradingCalendar::always_open(), None)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 2, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[tokio::test]
    async fn test_open_then_close_delivered() {
        let mut h = harness();

        h.set_diff("copper", dec!(12.07));
        let report = h.monitor.run_cycle(t0()).await;
        assert_eq!(report.signals.len(), 1);
        assert!(report.signals[0].is_open());

        h.set_diff("copper", dec!(10.0));
        h.monitor.run_cycle(t0() + minutes(5)).await;

        // Close inside the throttle window is still delivered
        h.set_diff("copper", dec!(2.70));
        let report = h.monitor.run_cycle(t0() + minutes(10)).await;
        assert_eq!(report.signals.len(), 1);
        assert!(matches!(
            report.signals[0].kind,
            SignalKind::Close {
                reason: CloseReason::Convergence,
                ..
            }
        ));

        let delivered = h.notifier.signals();
        assert_eq!(delivered.len(), 2);
        assert_eq!(h.monitor.stats().signals, 2);
        assert_eq!(h.monitor.stats().cycles, 3);
    }

    #[tokio::test]
    async fn test_open_throttled_within_interval() {
        let mut h = harness();

        h.set_diff("copper", dec!(12.0));
        h.monitor.run_cycle(t0()).await;
        h.set_diff("copper", dec!(19.0));
        h.monitor.run_cycle(t0() + minutes(5)).await; // stop-loss close

        // Position is gone, but a fresh OPEN inside the interval is dropped
        h.set_diff("copper", dec!(12.0));
        let report = h.monitor.run_cycle(t0() + minutes(10)).await;
        assert!(report.signals.is_empty());
        assert!(h.monitor.tracker().position("copper").is_none());

        let report = h.monitor.run_cycle(t0() + minutes(20)).await;
        assert!(report.signals.is_empty());

        // Interval elapsed since the last dispatched signal
        let report = h.monitor.run_cycle(t0() + minutes(36)).await;
        assert_eq!(report.signals.len(), 1);
        assert!(report.signals[0].is_open());

        let opens = h.notifier.signals().iter().filter(|s| s.is_open()).count();
        assert_eq!(opens, 2);
    }

    #[tokio::test]
    async fn test_data_outage_alerts_once_per_interval() {
        let mut h = harness();

        h.clear("copper");
        let report = h.monitor.run_cycle(t0()).await;
        assert_eq!(report.outages, vec!["copper".to_string()]);
        assert!(report.signals.is_empty());
        h.monitor.run_cycle(t0() + minutes(5)).await;

        assert_eq!(h.notifier.count("data_unavailable"), 1);
        assert_eq!(h.monitor.stats().outages, 2);

        h.monitor.run_cycle(t0() + minutes(31)).await;
        assert_eq!(h.notifier.count("data_unavailable"), 2);
    }

    #[tokio::test]
    async fn test_outside_trading_hours_skips_everything() {
        let tz: chrono_tz::Tz = "Asia/Shanghai".parse().unwrap();
        let windows = vec![TradingWindow {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        }];
        let mut h = harness_with(TradingCalendar::new(tz, windows, true), None);
        h.set_diff("copper", dec!(15.0));

        // 20:00 Beijing
        let report = h.monitor.run_cycle(Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()).await;
        assert!(report.skipped);
        assert!(report.observations.is_empty());
        assert!(h.notifier.alerts.lock().unwrap().is_empty());
        assert_eq!(h.monitor.stats().skipped_cycles, 1);

        // scan() ignores the calendar
        let report = h.monitor.scan(Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()).await;
        assert_eq!(report.signals.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_reported_and_retried() {
        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("state");
        let mut h = harness_with(TradingCalendar::always_open(), Some(store_dir.join("positions.json")));
        std::fs::write(&store_dir, "blocks the store directory").unwrap();

        h.set_diff("copper", dec!(12.0));
        let report = h.monitor.run_cycle(t0()).await;
        assert_eq!(report.store_failures, vec!["copper".to_string()]);
        assert!(report.signals.is_empty());
        assert_eq!(h.notifier.count("store_failure"), 1);
        assert!(h.monitor.tracker().position("copper").is_none());

        // Storage recovers; the next cycle opens normally
        std::fs::remove_file(&store_dir).unwrap();
        let report = h.monitor.run_cycle(t0() + minutes(5)).await;
        assert_eq!(report.signals.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut monitor = h.monitor.with_shutdown(shutdown);

        let stats = monitor.run().await;
        assert_eq!(stats.cycles, 0);
        assert_eq!(h.notifier.count("started"), 1);
        assert_eq!(h.notifier.count("stopped"), 1);
    }

    #[tokio::test]
    async fn test_undelivered_signal_keeps_state() {
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("positions.json");
        let mut instruments = default_instruments();
        instruments.truncate(2); // copper, gold
        let mut h = build_harness(
            instruments,
            TradingCalendar::always_open(),
            Some(store_path.clone()),
            Arc::new(RecordingNotifier::failing()),
        );

        h.set_diff("copper", dec!(12.0));
        h.set_diff("gold", dec!(9.0));
        let report = h.monitor.run_cycle(t0()).await;

        // Both instruments were processed despite the first delivery failing
        assert_eq!(report.signals.len(), 2);
        assert_eq!(report.observations.len(), 2);
        assert_eq!(h.monitor.stats().delivery_failures, 2);
        assert_eq!(h.monitor.stats().signals, 2);

        // The OPEN stands in memory and on disk
        let position = h.monitor.tracker().position("copper").unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        let stored = PositionStore::new(&store_path).load().unwrap();
        assert_eq!(stored["copper"].status, PositionStatus::Open);
        assert_eq!(stored["gold"].status, PositionStatus::Open);

        // The next cycle still runs and closes against the stored position
        h.set_diff("copper", dec!(2.0));
        let report = h.monitor.run_cycle(t0() + minutes(5)).await;
        assert_eq!(report.signals.len(), 1);
        assert!(!report.signals[0].is_open());
        assert_eq!(h.monitor.stats().cycles, 2);
        assert_eq!(h.monitor.stats().delivery_failures, 3);
        assert_eq!(h.notifier.signals().len(), 3);
    }
}
