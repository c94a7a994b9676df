use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::store::RecordStore;
use crate::errors::CoreError;
use crate::models::alert::PriceAlert;
use crate::models::position::Position;
use crate::models::watchlist::{ImportRecord, Screen, ScreenRun, Tag, WatchlistEntry};

/// Everything the store holds for one user, one field per collection.
#[derive(Debug, Default)]
struct UserRecords {
    positions: BTreeMap<String, Position>,
    settings: Option<Value>,
    alerts: Vec<PriceAlert>,
    watchlist: Vec<WatchlistEntry>,
    tags: Vec<Tag>,
    entry_tags: Vec<(Uuid, Uuid)>,
    screens: Vec<Screen>,
    screen_runs: Vec<ScreenRun>,
    imports: Vec<ImportRecord>,
}

/// In-process [`RecordStore`]: a per-user record map behind a mutex.
///
/// Backs every test and works for single-process deployments. Enforces
/// the same uniqueness rules a real backend would: one alert per
/// (entry, alert type), one watchlist entry per symbol.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserRecords>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the user map, recovering from a poisoned mutex — the data is
    /// plain records, safe to keep serving after a panicked writer.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserRecords>> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_user<R>(&self, user_id: &str, f: impl FnOnce(&mut UserRecords) -> R) -> R {
        let mut users = self.lock();
        f(users.entry(user_id.to_string()).or_default())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    // ── positions ───────────────────────────────────────────────────

    async fn list_positions(&self, user_id: &str) -> Result<Vec<Position>, CoreError> {
        Ok(self.with_user(user_id, |u| u.positions.values().cloned().collect()))
    }

    async fn upsert_position(&self, user_id: &str, position: &Position) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            u.positions
                .insert(position.symbol.clone(), position.clone());
        });
        Ok(())
    }

    async fn delete_position(&self, user_id: &str, symbol: &str) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            u.positions.remove(&symbol.to_uppercase());
        });
        Ok(())
    }

    async fn clear_positions(&self, user_id: &str) -> Result<usize, CoreError> {
        Ok(self.with_user(user_id, |u| {
            let count = u.positions.len();
            u.positions.clear();
            count
        }))
    }

    // ── portfolio_settings ──────────────────────────────────────────

    async fn load_settings(&self, user_id: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.with_user(user_id, |u| u.settings.clone()))
    }

    async fn save_settings(&self, user_id: &str, document: &Value) -> Result<(), CoreError> {
        self.with_user(user_id, |u| u.settings = Some(document.clone()));
        Ok(())
    }

    // ── price_alerts ────────────────────────────────────────────────

    async fn list_active_alerts(&self) -> Result<Vec<PriceAlert>, CoreError> {
        let users = self.lock();
        let mut alerts: Vec<PriceAlert> = users
            .values()
            .flat_map(|u| u.alerts.iter().filter(|a| a.is_active).cloned())
            .collect();
        // HashMap iteration order is arbitrary; the batch job wants a
        // deterministic working set.
        alerts.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(alerts)
    }

    async fn list_alerts(&self, user_id: &str) -> Result<Vec<PriceAlert>, CoreError> {
        Ok(self.with_user(user_id, |u| u.alerts.clone()))
    }

    async fn insert_alert(&self, alert: &PriceAlert) -> Result<(), CoreError> {
        self.with_user(&alert.user_id, |u| {
            let duplicate = u
                .alerts
                .iter()
                .any(|a| a.entry_id == alert.entry_id && a.alert_type == alert.alert_type);
            if duplicate {
                return Err(CoreError::Conflict(format!(
                    "a {} alert already exists for {}",
                    alert.alert_type, alert.symbol
                )));
            }
            u.alerts.push(alert.clone());
            Ok(())
        })
    }

    async fn update_alert(&self, alert: &PriceAlert) -> Result<(), CoreError> {
        self.with_user(&alert.user_id, |u| {
            match u.alerts.iter_mut().find(|a| a.id == alert.id) {
                Some(existing) => {
                    *existing = alert.clone();
                    Ok(())
                }
                None => Err(CoreError::NotFound(format!("alert {}", alert.id))),
            }
        })
    }

    // ── watchlist_entries ───────────────────────────────────────────

    async fn list_watchlist(&self, user_id: &str) -> Result<Vec<WatchlistEntry>, CoreError> {
        Ok(self.with_user(user_id, |u| u.watchlist.clone()))
    }

    async fn get_watchlist_entry(
        &self,
        user_id: &str,
        entry_id: Uuid,
    ) -> Result<Option<WatchlistEntry>, CoreError> {
        Ok(self.with_user(user_id, |u| {
            u.watchlist.iter().find(|e| e.id == entry_id).cloned()
        }))
    }

    async fn insert_watchlist_entry(
        &self,
        user_id: &str,
        entry: &WatchlistEntry,
    ) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            if u.watchlist.iter().any(|e| e.symbol == entry.symbol) {
                return Err(CoreError::Conflict(format!(
                    "{} is already on the watchlist",
                    entry.symbol
                )));
            }
            u.watchlist.push(entry.clone());
            Ok(())
        })
    }

    async fn update_watchlist_entry(
        &self,
        user_id: &str,
        entry: &WatchlistEntry,
    ) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            match u.watchlist.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => {
                    *existing = entry.clone();
                    Ok(())
                }
                None => Err(CoreError::NotFound(format!("watchlist entry {}", entry.id))),
            }
        })
    }

    async fn delete_watchlist_entry(
        &self,
        user_id: &str,
        entry_id: Uuid,
    ) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            u.watchlist.retain(|e| e.id != entry_id);
            u.entry_tags.retain(|(entry, _)| *entry != entry_id);
        });
        Ok(())
    }

    // ── tags & watchlist_entry_tags ─────────────────────────────────

    async fn list_tags(&self, user_id: &str) -> Result<Vec<Tag>, CoreError> {
        Ok(self.with_user(user_id, |u| u.tags.clone()))
    }

    async fn ensure_tag(&self, user_id: &str, name: &str) -> Result<Tag, CoreError> {
        Ok(self.with_user(user_id, |u| {
            if let Some(tag) = u.tags.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
                return tag.clone();
            }
            let tag = Tag {
                id: Uuid::new_v4(),
                name: name.to_string(),
            };
            u.tags.push(tag.clone());
            tag
        }))
    }

    async fn tag_entry(
        &self,
        user_id: &str,
        entry_id: Uuid,
        tag_id: Uuid,
    ) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            if !u.watchlist.iter().any(|e| e.id == entry_id) {
                return Err(CoreError::NotFound(format!("watchlist entry {entry_id}")));
            }
            if !u.entry_tags.contains(&(entry_id, tag_id)) {
                u.entry_tags.push((entry_id, tag_id));
            }
            Ok(())
        })
    }

    async fn entry_tags(&self, user_id: &str, entry_id: Uuid) -> Result<Vec<Tag>, CoreError> {
        Ok(self.with_user(user_id, |u| {
            u.entry_tags
                .iter()
                .filter(|(entry, _)| *entry == entry_id)
                .filter_map(|(_, tag_id)| u.tags.iter().find(|t| t.id == *tag_id).cloned())
                .collect()
        }))
    }

    // ── screens & screen_runs ───────────────────────────────────────

    async fn list_screens(&self, user_id: &str) -> Result<Vec<Screen>, CoreError> {
        Ok(self.with_user(user_id, |u| u.screens.clone()))
    }

    async fn ensure_screen(
        &self,
        user_id: &str,
        name: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Screen, CoreError> {
        Ok(self.with_user(user_id, |u| {
            if let Some(screen) = u.screens.iter().find(|s| s.name.eq_ignore_ascii_case(name)) {
                return screen.clone();
            }
            let screen = Screen {
                id: Uuid::new_v4(),
                name: name.to_string(),
                created_at: now,
            };
            u.screens.push(screen.clone());
            screen
        }))
    }

    async fn insert_screen_run(&self, user_id: &str, run: &ScreenRun) -> Result<(), CoreError> {
        self.with_user(user_id, |u| {
            if !u.screens.iter().any(|s| s.id == run.screen_id) {
                return Err(CoreError::NotFound(format!("screen {}", run.screen_id)));
            }
            u.screen_runs.push(run.clone());
            Ok(())
        })
    }

    async fn list_screen_runs(
        &self,
        user_id: &str,
        screen_id: Uuid,
    ) -> Result<Vec<ScreenRun>, CoreError> {
        Ok(self.with_user(user_id, |u| {
            let mut runs: Vec<ScreenRun> = u
                .screen_runs
                .iter()
                .filter(|r| r.screen_id == screen_id)
                .cloned()
                .collect();
            runs.sort_by(|a, b| a.run_at.cmp(&b.run_at));
            runs
        }))
    }

    async fn latest_screen_runs(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Screen, ScreenRun)>, CoreError> {
        Ok(self.with_user(user_id, |u| {
            u.screens
                .iter()
                .filter_map(|screen| {
                    u.screen_runs
                        .iter()
                        .filter(|r| r.screen_id == screen.id)
                        .max_by_key(|r| r.run_at)
                        .map(|run| (screen.clone(), run.clone()))
                })
                .collect()
        }))
    }

    // ── import_history ──────────────────────────────────────────────

    async fn record_import(&self, user_id: &str, record: &ImportRecord) -> Result<(), CoreError> {
        self.with_user(user_id, |u| u.imports.push(record.clone()));
        Ok(())
    }

    async fn list_imports(&self, user_id: &str) -> Result<Vec<ImportRecord>, CoreError> {
        Ok(self.with_user(user_id, |u| {
            let mut imports = u.imports.clone();
            imports.sort_by(|a, b| a.imported_at.cmp(&b.imported_at));
            imports
        }))
    }

    async fn latest_import(&self, user_id: &str) -> Result<Option<ImportRecord>, CoreError> {
        Ok(self.with_user(user_id, |u| {
            u.imports.iter().max_by_key(|r| r.imported_at).cloned()
        }))
    }

    async fn clear_imports(&self, user_id: &str) -> Result<usize, CoreError> {
        Ok(self.with_user(user_id, |u| {
            let count = u.imports.len();
            u.imports.clear();
            count
        }))
    }
}
