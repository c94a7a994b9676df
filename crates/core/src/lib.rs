pub mod clock;
pub mod errors;
pub mod import;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use uuid::Uuid;

use clock::{Clock, SystemClock};
use errors::CoreError;
use import::aggregate::{aggregate_files, ImportOutcome};
use models::alert::{AlertType, PriceAlert};
use models::market::SymbolProfile;
use models::position::Position;
use models::settings::PortfolioSettings;
use models::watchlist::{FollowUpTask, ImportRecord, Screen, ScreenRun, Tag, WatchlistEntry};
use providers::traits::{EmailSender, MarketDataProvider};
use services::alert_service::{AlertRunSummary, AlertService};
use services::market_data_service::MarketDataService;
use services::portfolio_service::{AccountRemoval, PortfolioService, PositionGoal, RebalancePlan};
use services::screen_service::{ScreenRunReport, ScreenService};
use services::settings_service::SettingsService;
use storage::store::RecordStore;

/// Main entry point for the Invest Tracker core library.
///
/// Stateless over the record store: every method takes the acting user and
/// loads what it needs. One instance serves all users of a process; the
/// market-data caches it owns are shared across them (cache keys are
/// symbols, not users).
#[must_use]
pub struct InvestTracker {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    settings_service: SettingsService,
    portfolio_service: PortfolioService,
    alert_service: AlertService,
    screen_service: ScreenService,
    market_data: Arc<MarketDataService>,
}

impl InvestTracker {
    /// Wire the services against a store and the real system clock.
    pub fn new(
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn MarketDataProvider>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        Self::with_clock(store, provider, mailer, Arc::new(SystemClock))
    }

    /// Like [`InvestTracker::new`] but with an injected clock, so tests
    /// control cache expiry and trigger timestamps.
    pub fn with_clock(
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn MarketDataProvider>,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let market_data = Arc::new(MarketDataService::new(provider, clock.clone()));
        Self {
            settings_service: SettingsService::new(store.clone()),
            portfolio_service: PortfolioService::new(store.clone()),
            alert_service: AlertService::new(
                store.clone(),
                market_data.clone(),
                mailer,
                clock.clone(),
            ),
            screen_service: ScreenService::new(store.clone(), clock.clone()),
            market_data,
            store,
            clock,
        }
    }

    // ── Import ──────────────────────────────────────────────────────

    /// Parse and merge a batch of broker CSV exports, persist the
    /// aggregated positions (preserving existing category/tier
    /// assignments), and append an import record. Per-file parse failures
    /// are recorded on the returned record, never batch-fatal.
    pub async fn import_positions(
        &self,
        user_id: &str,
        files: &[(String, String)],
    ) -> Result<ImportRecord, CoreError> {
        let outcome: ImportOutcome = aggregate_files(files);
        self.portfolio_service
            .apply_import(user_id, &outcome, self.clock.now())
            .await
    }

    /// All import records, oldest first.
    pub async fn import_history(&self, user_id: &str) -> Result<Vec<ImportRecord>, CoreError> {
        self.store.list_imports(user_id).await
    }

    // ── Portfolio & Goals ───────────────────────────────────────────

    /// Current position rows.
    pub async fn positions(&self, user_id: &str) -> Result<Vec<Position>, CoreError> {
        self.store.list_positions(user_id).await
    }

    /// Assign (or clear) a position's allocation category/tier.
    pub async fn assign_position(
        &self,
        user_id: &str,
        symbol: &str,
        category: Option<String>,
        tier: Option<String>,
    ) -> Result<(), CoreError> {
        let settings = self.settings_service.load(user_id).await?;
        self.portfolio_service
            .assign_position(user_id, symbol, category, tier, &settings)
            .await
    }

    /// Every position's deviation from its allocation target, ordered by
    /// allocation bucket then value.
    pub async fn position_goals(&self, user_id: &str) -> Result<Vec<PositionGoal>, CoreError> {
        let settings = self.settings_service.load(user_id).await?;
        let positions = self.store.list_positions(user_id).await?;
        Ok(PortfolioService::evaluate_goals(&settings, &positions))
    }

    /// Advisory buy/trim guidance. `available_cash` overrides the cash
    /// balance recorded by the latest import (0 when neither exists).
    pub async fn rebalance_plan(
        &self,
        user_id: &str,
        available_cash: Option<f64>,
    ) -> Result<RebalancePlan, CoreError> {
        let goals = self.position_goals(user_id).await?;
        let cash = match available_cash {
            Some(cash) => cash,
            None => self
                .store
                .latest_import(user_id)
                .await?
                .map(|record| record.cash_balance)
                .unwrap_or(0.0),
        };
        Ok(PortfolioService::rebalance_plan(&goals, cash))
    }

    /// Remove one brokerage account from every position holding it.
    pub async fn remove_account(
        &self,
        user_id: &str,
        account: &str,
    ) -> Result<AccountRemoval, CoreError> {
        self.portfolio_service.remove_account(user_id, account).await
    }

    /// Irreversibly delete all positions and import history. Callers are
    /// expected to gate this behind an explicit confirmation.
    pub async fn clear_positions(&self, user_id: &str) -> Result<usize, CoreError> {
        self.portfolio_service.clear_all(user_id).await
    }

    // ── Settings ────────────────────────────────────────────────────

    /// Load settings, applying the persisted-shape migration if needed.
    pub async fn settings(&self, user_id: &str) -> Result<PortfolioSettings, CoreError> {
        self.settings_service.load(user_id).await
    }

    pub async fn update_settings(
        &self,
        user_id: &str,
        settings: &PortfolioSettings,
    ) -> Result<(), CoreError> {
        self.settings_service.update(user_id, settings).await
    }

    // ── Watchlist ───────────────────────────────────────────────────

    /// Add a symbol to the watchlist. Returns the entry plus the
    /// enrichment follow-up for the caller to run after commit — profile
    /// data is never fetched inside the primary operation.
    pub async fn add_watchlist_entry(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> Result<(WatchlistEntry, Vec<FollowUpTask>), CoreError> {
        let entry = WatchlistEntry::new(symbol, self.clock.now());
        self.store.insert_watchlist_entry(user_id, &entry).await?;

        let follow_ups = vec![FollowUpTask::EnrichWatchlistEntry {
            user_id: user_id.to_string(),
            entry_id: entry.id,
            symbol: entry.symbol.clone(),
        }];
        Ok((entry, follow_ups))
    }

    pub async fn watchlist(&self, user_id: &str) -> Result<Vec<WatchlistEntry>, CoreError> {
        self.store.list_watchlist(user_id).await
    }

    pub async fn remove_watchlist_entry(
        &self,
        user_id: &str,
        entry_id: Uuid,
    ) -> Result<(), CoreError> {
        self.store.delete_watchlist_entry(user_id, entry_id).await
    }

    /// Tags attached to a watchlist entry.
    pub async fn entry_tags(&self, user_id: &str, entry_id: Uuid) -> Result<Vec<Tag>, CoreError> {
        self.store.entry_tags(user_id, entry_id).await
    }

    // ── Alerts ──────────────────────────────────────────────────────

    /// Create a price alert on a watchlist entry. A duplicate
    /// (entry, alert type) pair is a recoverable conflict.
    pub async fn create_alert(
        &self,
        user_id: &str,
        entry_id: Uuid,
        alert_type: AlertType,
        target_value: f64,
        reference_price: Option<f64>,
        notify_time: Option<String>,
    ) -> Result<PriceAlert, CoreError> {
        self.alert_service
            .create_alert(
                user_id,
                entry_id,
                alert_type,
                target_value,
                reference_price,
                notify_time,
            )
            .await
    }

    pub async fn alerts(&self, user_id: &str) -> Result<Vec<PriceAlert>, CoreError> {
        self.store.list_alerts(user_id).await
    }

    /// Dismiss a triggered alert.
    pub async fn acknowledge_alert(&self, user_id: &str, alert_id: Uuid) -> Result<(), CoreError> {
        self.alert_service.acknowledge(user_id, alert_id).await
    }

    /// One pass of the periodic alert evaluation job. Invoked by an
    /// external scheduler; safe to call with nothing to do.
    pub async fn run_alert_evaluation(&self) -> Result<AlertRunSummary, CoreError> {
        self.alert_service.run_evaluation().await
    }

    // ── Screens ─────────────────────────────────────────────────────

    /// Record one upload of a screen's symbol list, cross-referenced
    /// against the watchlist and portfolio. Run the returned follow-ups
    /// to auto-tag matched watchlist entries.
    pub async fn record_screen_run(
        &self,
        user_id: &str,
        screen_name: &str,
        symbols: &[String],
    ) -> Result<ScreenRunReport, CoreError> {
        self.screen_service
            .record_run(user_id, screen_name, symbols)
            .await
    }

    /// Symbol → number of distinct screens whose latest run contains it.
    pub async fn cross_screen_heat(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, usize>, CoreError> {
        self.screen_service.cross_screen_heat(user_id).await
    }

    pub async fn screens(&self, user_id: &str) -> Result<Vec<Screen>, CoreError> {
        self.store.list_screens(user_id).await
    }

    /// Runs recorded for one screen, oldest first.
    pub async fn screen_runs(
        &self,
        user_id: &str,
        screen_id: Uuid,
    ) -> Result<Vec<ScreenRun>, CoreError> {
        self.store.list_screen_runs(user_id, screen_id).await
    }

    /// All tags the user has accumulated (manual and screen-generated).
    pub async fn tags(&self, user_id: &str) -> Result<Vec<Tag>, CoreError> {
        self.store.list_tags(user_id).await
    }

    // ── Market data ─────────────────────────────────────────────────

    /// Company profile for a symbol via the user's API key, cache-first.
    /// `Ok(None)` when the user has no key configured or the lookup
    /// failed — enrichment is never fatal.
    pub async fn lookup_symbol(
        &self,
        user_id: &str,
        symbol: &str,
    ) -> Result<Option<SymbolProfile>, CoreError> {
        let settings = self.settings_service.load(user_id).await?;
        let api_key = match settings.fmp_api_key {
            Some(key) => key,
            None => {
                debug!("market data: user {user_id} has no API key configured");
                return Ok(None);
            }
        };
        Ok(self.market_data.lookup_symbol(&api_key, symbol).await)
    }

    /// Profiles for many symbols with incremental progress reporting;
    /// degrades to paced single lookups when the batch endpoint fails.
    pub async fn fetch_profiles(
        &self,
        user_id: &str,
        symbols: &[String],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Vec<SymbolProfile>, CoreError> {
        let settings = self.settings_service.load(user_id).await?;
        let api_key = match settings.fmp_api_key {
            Some(key) => key,
            None => return Ok(Vec::new()),
        };
        Ok(self
            .market_data
            .fetch_profiles_batched(&api_key, symbols, progress)
            .await)
    }

    // ── Follow-up tasks ─────────────────────────────────────────────

    /// Execute deferred side effects returned by a primary operation.
    /// Each task runs independently: a failure is logged and the rest
    /// proceed. Returns how many tasks completed.
    pub async fn run_follow_ups(&self, tasks: Vec<FollowUpTask>) -> usize {
        let mut completed = 0;
        for task in tasks {
            let label = format!("{task:?}");
            match self.run_follow_up(task).await {
                Ok(()) => completed += 1,
                Err(e) => warn!("follow-up {label} failed: {e}"),
            }
        }
        completed
    }

    async fn run_follow_up(&self, task: FollowUpTask) -> Result<(), CoreError> {
        match task {
            FollowUpTask::EnrichWatchlistEntry {
                user_id,
                entry_id,
                symbol,
            } => {
                let profile = match self.lookup_symbol(&user_id, &symbol).await? {
                    Some(profile) => profile,
                    None => {
                        debug!("follow-up: no profile available for {symbol}");
                        return Ok(());
                    }
                };
                let mut entry = self
                    .store
                    .get_watchlist_entry(&user_id, entry_id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("watchlist entry {entry_id}")))?;

                entry.company_name = profile.company_name;
                entry.sector = profile.sector;
                entry.industry = profile.industry;
                if entry.added_price.is_none() && profile.price > 0.0 {
                    entry.added_price = Some(profile.price);
                }
                self.store.update_watchlist_entry(&user_id, &entry).await
            }
            FollowUpTask::TagWatchlistEntry {
                user_id,
                entry_id,
                tag,
            } => {
                let tag = self.store.ensure_tag(&user_id, &tag).await?;
                self.store.tag_entry(&user_id, entry_id, tag.id).await
            }
        }
    }
}
