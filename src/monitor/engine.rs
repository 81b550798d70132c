// =============================================================================
// Monitor Engine — poll scheduler, stats, and update fan-out
// =============================================================================
//
// One logical loop ticks at the configured interval. Every tick refreshes
// details and positions for each monitored account; closed trades refresh
// on every fifth tick only, since history churns far slower than equity.
// Tick t+1 starts only after tick t completes, which is what makes the
// cadence well-defined.
//
// Completed ticks are fanned out through a tokio broadcast channel. A slow
// or dead subscriber lags and is skipped by the channel; the tick latency
// never depends on subscriber health.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::account::{AccountSnapshot, AccountUpdate, ClosedTrade, Position};
use super::aggregate::{self, FleetSummary, SymbolExposure, SymbolPosition};
use super::registry::Registry;
use crate::broker::BrokerApi;
use crate::config::RmsConfig;
use crate::types::AccountStatus;

/// Closed trades are refetched every Nth tick.
const TRADES_REFRESH_EVERY: u64 = 5;
/// Bound on buffered tick updates per subscriber before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 64;
/// How long `stop()` waits for the in-flight tick to finish.
const SHUTDOWN_JOIN: Duration = Duration::from_secs(10);

/// The per-account list broadcast after each completed tick.
pub type TickUpdate = Arc<Vec<AccountUpdate>>;

/// Lifecycle of the poll scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Monotonic engine counters exposed over the control protocol.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_updates: u64,
    pub errors: u64,
    pub monitored_count: usize,
    pub running: bool,
    pub update_interval: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// The monitoring engine. Constructed once at process start and shared via
/// `Arc` with the push-channel server and any control caller.
pub struct MonitorEngine {
    broker: Arc<dyn BrokerApi>,
    config: RmsConfig,
    registry: Registry,

    state: Mutex<EngineState>,
    running: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,

    tick_index: AtomicU64,
    total_updates: AtomicU64,
    errors: AtomicU64,
    last_update: RwLock<Option<DateTime<Utc>>>,

    updates_tx: broadcast::Sender<TickUpdate>,
}

impl MonitorEngine {
    pub fn new(broker: Arc<dyn BrokerApi>, config: RmsConfig) -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            broker,
            config,
            registry: Registry::new(),
            state: Mutex::new(EngineState::Idle),
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            tick_index: AtomicU64::new(0),
            total_updates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_update: RwLock::new(None),
            updates_tx,
        }
    }

    pub fn config(&self) -> &RmsConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Subscribe to completed-tick updates.
    pub fn subscribe(&self) -> broadcast::Receiver<TickUpdate> {
        self.updates_tx.subscribe()
    }

    // -------------------------------------------------------------------------
    // Registry mutations
    // -------------------------------------------------------------------------

    pub fn add_account(&self, login_id: u64) {
        // The cap is advisory: warn, but keep monitoring.
        if self.registry.count() >= self.config.max_monitored_accounts {
            warn!(
                login_id,
                cap = self.config.max_monitored_accounts,
                "monitored-account cap exceeded"
            );
        }
        self.registry.add(login_id);
    }

    pub fn remove_account(&self, login_id: u64) {
        self.registry.remove(login_id);
    }

    pub fn contains_account(&self, login_id: u64) -> bool {
        self.registry.contains(login_id)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Handshake with the broker manager and launch the poll loop.
    ///
    /// Fails without launching anything when the handshake fails or the
    /// engine is already running. Takes an `Arc` receiver because the
    /// spawned loop needs shared ownership; call as `engine.clone().start()`.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Idle | EngineState::Stopped => *state = EngineState::Initializing,
                _ => bail!("monitor already running"),
            }
        }

        if let Err(e) = self.broker.ping().await {
            *self.state.lock() = EngineState::Stopped;
            return Err(e.context("broker manager handshake failed"));
        }

        self.running.store(true, Ordering::SeqCst);
        *self.state.lock() = EngineState::Running;

        let engine = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            info!(
                interval_secs = engine.config.update_interval,
                "monitor loop started"
            );
            let mut ticker = interval(Duration::from_secs(engine.config.update_interval));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // The running flag is only checked between ticks; an in-flight
            // tick always completes.
            while engine.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !engine.running.load(Ordering::SeqCst) {
                    break;
                }
                engine.tick().await;
            }

            *engine.state.lock() = EngineState::Stopped;
            info!("monitor loop stopped");
        });

        *self.loop_handle.lock() = Some(handle);
        info!("monitor started");
        Ok(())
    }

    /// Signal the loop to stop and wait (bounded) for it to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("monitor not running");
            return;
        }
        *self.state.lock() = EngineState::Stopping;

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_JOIN, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "monitor loop panicked"),
                Err(_) => warn!("monitor loop did not finish within the join timeout"),
            }
        }

        *self.state.lock() = EngineState::Stopped;
        info!("monitor stopped");
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Execute one full polling pass over the registry and broadcast the
    /// resulting update list.
    pub async fn tick(&self) {
        let t = self.tick_index.fetch_add(1, Ordering::SeqCst);
        let refresh_trades = t % TRADES_REFRESH_EVERY == 0;
        let ids = self.registry.snapshot_ids();

        debug!(tick = t, accounts = ids.len(), refresh_trades, "tick started");

        let mut updates = Vec::with_capacity(ids.len());
        for login_id in ids {
            if let Some(update) = self.refresh_account(login_id, refresh_trades).await {
                updates.push(update);
            }
        }

        *self.last_update.write() = Some(Utc::now());
        self.total_updates.fetch_add(1, Ordering::SeqCst);

        // A send error only means nobody is subscribed right now.
        let _ = self.updates_tx.send(Arc::new(updates));
    }

    /// Refresh one account: details, then positions, then (on cadence)
    /// closed trades. RPCs run with the registry guard released; results
    /// are applied under it afterwards. Sub-operation failures are
    /// independent and never abort the rest of the refresh.
    ///
    /// Returns the account's update-frame entry, or `None` when the
    /// details fetch did not succeed or the account vanished mid-tick.
    async fn refresh_account(&self, login_id: u64, refresh_trades: bool) -> Option<AccountUpdate> {
        let details = self.broker.get_account_details(login_id).await;
        let positions = self.broker.get_open_positions(login_id).await;
        let trades = if refresh_trades {
            let since = Utc::now() - chrono::Duration::days(self.config.trade_history_days);
            Some(self.broker.get_closed_trades(login_id, since).await)
        } else {
            None
        };

        let now = Utc::now();
        let mut failures: Vec<String> = Vec::new();

        let update = self.registry.with_record(login_id, |record| {
            match details {
                Ok(Some(raw)) => record.apply_details(&raw, now),
                Ok(None) => {
                    record.mark_unavailable();
                    failures.push(format!("manager returned no details for {login_id}"));
                }
                Err(e) => {
                    record.mark_error();
                    failures.push(format!("details fetch failed for {login_id}: {e:#}"));
                }
            }

            match positions {
                Ok(raw) => {
                    let parsed: Vec<Position> =
                        raw.iter().filter_map(Position::from_raw).collect();
                    record.apply_positions(parsed, now);
                }
                Err(e) => failures.push(format!("positions fetch failed for {login_id}: {e:#}")),
            }

            if let Some(result) = trades {
                match result {
                    Ok(raw) => {
                        let parsed: Vec<ClosedTrade> =
                            raw.iter().filter_map(ClosedTrade::from_raw).collect();
                        record.apply_trades(parsed, now);
                    }
                    Err(e) => {
                        failures.push(format!("closed-trades fetch failed for {login_id}: {e:#}"))
                    }
                }
            }

            if record.details.status == AccountStatus::Active {
                Some(record.update_frame())
            } else {
                None
            }
        });

        self.errors.fetch_add(failures.len() as u64, Ordering::SeqCst);
        if let Some(first) = failures.first() {
            // One log line per account per tick; the counter carries the rest.
            warn!(login_id, error = %first, "account refresh failure");
        }

        let update = update.flatten();

        // Threshold alerts are evaluation-only; a log line is all the
        // delivery this engine does. Accounts with no margin in use report
        // level 0 and are skipped.
        if let Some(frame) = &update {
            if frame.account.margin_level > 0.0 {
                let health = crate::alerts::account_health(&frame.account, &self.config);
                if health != crate::alerts::Health::Healthy {
                    if let Some(alert) = crate::alerts::alert_message(&frame.account, &self.config)
                    {
                        warn!(login_id, health = ?health, alert = %alert, "account threshold alert");
                    }
                }
            }
        }

        update
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn account_snapshot(&self, login_id: u64) -> Option<AccountSnapshot> {
        self.registry.with_record(login_id, |record| record.snapshot())
    }

    pub fn all_accounts_snapshot(&self) -> BTreeMap<u64, AccountSnapshot> {
        self.registry
            .snapshot_records()
            .iter()
            .map(|record| (record.login_id(), record.snapshot()))
            .collect()
    }

    pub fn positions_by_symbol(&self, symbol: &str) -> Vec<SymbolPosition> {
        aggregate::positions_by_symbol(&self.registry.snapshot_records(), symbol)
    }

    pub fn exposure_by_symbol(&self) -> BTreeMap<String, SymbolExposure> {
        aggregate::exposure_by_symbol(&self.registry.snapshot_records())
    }

    pub fn fleet_summary(&self) -> FleetSummary {
        aggregate::fleet_summary(&self.registry.snapshot_records())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_updates: self.total_updates.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            monitored_count: self.registry.count(),
            running: self.running.load(Ordering::SeqCst),
            update_interval: self.config.update_interval,
            last_update: *self.last_update.read(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::broker::AccountDetailsRaw;
    use serde_json::json;

    fn engine_with(mock: MockBroker) -> (Arc<MonitorEngine>, Arc<MockBroker>) {
        let broker = Arc::new(mock);
        let config = RmsConfig {
            update_interval: 1,
            ..RmsConfig::default()
        };
        (
            Arc::new(MonitorEngine::new(broker.clone(), config)),
            broker,
        )
    }

    fn scripted_account(mock: &MockBroker, login_id: u64) {
        mock.set_details(
            login_id,
            AccountDetailsRaw {
                balance: 500.0,
                equity: 520.0,
                margin: 100.0,
                ..AccountDetailsRaw::default()
            },
        );
        mock.set_positions(
            login_id,
            vec![
                json!({"symbol": "EURUSD", "Vol": 1.0, "Type": 0}),
                json!({"symbol": "EURUSD", "Vol": 0.4, "Type": 1}),
            ],
        );
    }

    #[tokio::test]
    async fn add_then_tick_builds_exposure() {
        let (engine, mock) = engine_with(MockBroker::new());
        scripted_account(&mock, 1001);
        engine.add_account(1001);

        engine.tick().await;

        let exposure = engine.exposure_by_symbol();
        let eurusd = &exposure["EURUSD"];
        assert!((eurusd.volume - 0.6).abs() < 1e-9);
        assert_eq!(eurusd.accounts, 1);
        assert_eq!(eurusd.positions, 2);

        let snapshot = engine.account_snapshot(1001).unwrap();
        assert!((snapshot.account.margin_level - 520.0).abs() < 1e-9);

        let stats = engine.stats();
        assert_eq!(stats.total_updates, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.monitored_count, 1);
    }

    #[tokio::test]
    async fn closed_trades_follow_the_cadence() {
        let (engine, mock) = engine_with(MockBroker::new());
        scripted_account(&mock, 1001);
        engine.add_account(1001);

        for _ in 0..11 {
            engine.tick().await;
        }

        // Ticks 0, 5 and 10 refresh closed trades.
        assert_eq!(mock.trades_call_count(), 3);
        assert_eq!(engine.stats().total_updates, 11);
    }

    #[tokio::test]
    async fn one_account_failing_leaves_the_other_updated() {
        let (engine, mock) = engine_with(MockBroker::new());
        scripted_account(&mock, 1);
        scripted_account(&mock, 2);
        engine.add_account(1);
        engine.add_account(2);

        engine.tick().await;
        let errors_before = engine.stats().errors;

        // Account 1 disappears from the manager; account 2 stays healthy.
        mock.details.write().remove(&1);
        engine.tick().await;

        let a = engine.account_snapshot(1).unwrap();
        assert_eq!(a.account.status, AccountStatus::Unavailable);
        assert_eq!(a.account.balance, 500.0); // prior values retained

        let b = engine.account_snapshot(2).unwrap();
        assert_eq!(b.account.status, AccountStatus::Active);

        assert_eq!(engine.stats().errors, errors_before + 1);
    }

    #[tokio::test]
    async fn every_failed_sub_fetch_is_counted() {
        let (engine, mock) = engine_with(MockBroker::new());
        mock.fail_details(9);
        engine.add_account(9);

        // Tick 0 attempts details, positions, and trades; all three fail.
        engine.tick().await;

        assert_eq!(engine.stats().errors, 3);
        let snapshot = engine.account_snapshot(9).unwrap();
        assert_eq!(snapshot.account.status, AccountStatus::Error);
    }

    #[tokio::test]
    async fn empty_registry_tick_still_counts_and_broadcasts() {
        let (engine, _mock) = engine_with(MockBroker::new());
        let mut updates = engine.subscribe();

        engine.tick().await;

        let frame = updates.recv().await.unwrap();
        assert!(frame.is_empty());
        assert_eq!(engine.stats().total_updates, 1);
    }

    #[tokio::test]
    async fn removed_account_emits_no_further_frames() {
        let (engine, mock) = engine_with(MockBroker::new());
        scripted_account(&mock, 1);
        scripted_account(&mock, 2);
        engine.add_account(1);
        engine.add_account(2);
        let mut updates = engine.subscribe();

        engine.tick().await;
        let first = updates.recv().await.unwrap();
        assert_eq!(first.len(), 2);

        engine.remove_account(2);
        engine.tick().await;
        let second = updates.recv().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].account.login_id, 1);
    }

    #[tokio::test]
    async fn total_updates_is_monotone() {
        let (engine, _mock) = engine_with(MockBroker::new());
        let mut last = 0;
        for _ in 0..5 {
            engine.tick().await;
            let current = engine.stats().total_updates;
            assert!(current > last);
            last = current;
        }
    }

    #[tokio::test]
    async fn handshake_failure_keeps_engine_stopped() {
        let (engine, mock) = engine_with(MockBroker::new());
        *mock.refuse_ping.write() = true;

        assert!(engine.clone().start().await.is_err());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.stats().running);
    }

    #[tokio::test]
    async fn double_start_fails_and_stop_joins() {
        let (engine, _mock) = engine_with(MockBroker::new());

        engine.clone().start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.clone().start().await.is_err());

        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.stats().running);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let (engine, _mock) = engine_with(MockBroker::new());
        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Idle);
    }
}
