use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::CoreError;
use crate::models::watchlist::{FollowUpTask, Screen, ScreenRun};
use crate::storage::store::RecordStore;

/// The persisted run plus what it matched and the deferred work it wants.
#[derive(Debug, Clone)]
pub struct ScreenRunReport {
    pub screen: Screen,
    pub run: ScreenRun,

    /// Screen symbols present on the user's watchlist.
    pub watchlist_matches: Vec<String>,

    /// Screen symbols the user already holds.
    pub portfolio_matches: Vec<String>,

    /// Post-commit tasks (auto-tagging matched watchlist entries); the
    /// caller executes these with per-task error isolation.
    pub follow_ups: Vec<FollowUpTask>,
}

/// Records screen uploads and cross-references them against the
/// watchlist and portfolio.
pub struct ScreenService {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl ScreenService {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record one upload of a screen's symbol list and cross-reference it.
    ///
    /// The run is persisted first; matching and tagging are reported back
    /// as data so the caller decides when (and whether) to run the
    /// follow-ups.
    pub async fn record_run(
        &self,
        user_id: &str,
        screen_name: &str,
        symbols: &[String],
    ) -> Result<ScreenRunReport, CoreError> {
        let now = self.clock.now();
        let screen = self.store.ensure_screen(user_id, screen_name, now).await?;

        let mut normalized: Vec<String> = Vec::new();
        for symbol in symbols {
            let key = symbol.trim().to_uppercase();
            if !key.is_empty() && !normalized.contains(&key) {
                normalized.push(key);
            }
        }

        let run = ScreenRun {
            id: Uuid::new_v4(),
            screen_id: screen.id,
            run_at: now,
            symbols: normalized.clone(),
        };
        self.store.insert_screen_run(user_id, &run).await?;

        let watchlist = self.store.list_watchlist(user_id).await?;
        let positions = self.store.list_positions(user_id).await?;
        let held: HashSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();

        let mut watchlist_matches = Vec::new();
        let mut portfolio_matches = Vec::new();
        let mut follow_ups = Vec::new();

        for symbol in &normalized {
            if let Some(entry) = watchlist.iter().find(|e| &e.symbol == symbol) {
                watchlist_matches.push(symbol.clone());
                follow_ups.push(FollowUpTask::TagWatchlistEntry {
                    user_id: user_id.to_string(),
                    entry_id: entry.id,
                    tag: screen.name.clone(),
                });
            }
            if held.contains(symbol.as_str()) {
                portfolio_matches.push(symbol.clone());
            }
        }

        Ok(ScreenRunReport {
            screen,
            run,
            watchlist_matches,
            portfolio_matches,
            follow_ups,
        })
    }

    /// Cross-screen heat: symbol → number of distinct screens whose
    /// latest run contains it. A qualitative ranking signal.
    pub async fn cross_screen_heat(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, usize>, CoreError> {
        let latest = self.store.latest_screen_runs(user_id).await?;

        let mut heat: HashMap<String, usize> = HashMap::new();
        for (_, run) in latest {
            let distinct: HashSet<String> = run.symbols.into_iter().collect();
            for symbol in distinct {
                *heat.entry(symbol).or_insert(0) += 1;
            }
        }
        Ok(heat)
    }
}
