use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::alert::PriceAlert;
use crate::models::position::Position;
use crate::models::watchlist::{ImportRecord, Screen, ScreenRun, Tag, WatchlistEntry};

/// Trait abstraction over the persistence backend.
///
/// The backend is an external collaborator: a record store with per-user
/// row isolation, addressed through the typed operations below (one group
/// per logical collection). The store is trusted to enforce user scoping;
/// this library never mixes users except where a method is explicitly
/// cross-user (`list_active_alerts`, for the evaluation batch job).
///
/// Failure mapping expected from implementations:
/// - uniqueness violations → [`CoreError::Conflict`] (recoverable, named)
/// - missing rows on update → [`CoreError::NotFound`]
/// - anything else → [`CoreError::Storage`] with the underlying message
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── positions ───────────────────────────────────────────────────

    async fn list_positions(&self, user_id: &str) -> Result<Vec<Position>, CoreError>;

    /// Insert or replace the row for `position.symbol`.
    async fn upsert_position(&self, user_id: &str, position: &Position) -> Result<(), CoreError>;

    async fn delete_position(&self, user_id: &str, symbol: &str) -> Result<(), CoreError>;

    /// Delete every position row for the user. Returns how many went away.
    async fn clear_positions(&self, user_id: &str) -> Result<usize, CoreError>;

    // ── portfolio_settings (one JSON document per user) ─────────────

    async fn load_settings(&self, user_id: &str) -> Result<Option<Value>, CoreError>;

    async fn save_settings(&self, user_id: &str, document: &Value) -> Result<(), CoreError>;

    // ── price_alerts ────────────────────────────────────────────────

    /// All alerts with `is_active = true`, across every user. The alert
    /// evaluation job's working set; deterministic order.
    async fn list_active_alerts(&self) -> Result<Vec<PriceAlert>, CoreError>;

    async fn list_alerts(&self, user_id: &str) -> Result<Vec<PriceAlert>, CoreError>;

    /// Rejects a second alert for the same (watchlist entry, alert type)
    /// with [`CoreError::Conflict`].
    async fn insert_alert(&self, alert: &PriceAlert) -> Result<(), CoreError>;

    async fn update_alert(&self, alert: &PriceAlert) -> Result<(), CoreError>;

    // ── watchlist_entries ───────────────────────────────────────────

    async fn list_watchlist(&self, user_id: &str) -> Result<Vec<WatchlistEntry>, CoreError>;

    async fn get_watchlist_entry(
        &self,
        user_id: &str,
        entry_id: Uuid,
    ) -> Result<Option<WatchlistEntry>, CoreError>;

    /// Rejects a second entry for the same symbol with
    /// [`CoreError::Conflict`].
    async fn insert_watchlist_entry(
        &self,
        user_id: &str,
        entry: &WatchlistEntry,
    ) -> Result<(), CoreError>;

    async fn update_watchlist_entry(
        &self,
        user_id: &str,
        entry: &WatchlistEntry,
    ) -> Result<(), CoreError>;

    async fn delete_watchlist_entry(&self, user_id: &str, entry_id: Uuid)
        -> Result<(), CoreError>;

    // ── tags & watchlist_entry_tags ─────────────────────────────────

    async fn list_tags(&self, user_id: &str) -> Result<Vec<Tag>, CoreError>;

    /// Find-or-create a tag by name (case-insensitive match).
    async fn ensure_tag(&self, user_id: &str, name: &str) -> Result<Tag, CoreError>;

    /// Attach a tag to a watchlist entry. Attaching twice is a no-op.
    async fn tag_entry(&self, user_id: &str, entry_id: Uuid, tag_id: Uuid)
        -> Result<(), CoreError>;

    async fn entry_tags(&self, user_id: &str, entry_id: Uuid) -> Result<Vec<Tag>, CoreError>;

    // ── screens & screen_runs ───────────────────────────────────────

    async fn list_screens(&self, user_id: &str) -> Result<Vec<Screen>, CoreError>;

    /// Find-or-create a screen by name (case-insensitive match). `now`
    /// stamps `created_at` when the screen is new.
    async fn ensure_screen(
        &self,
        user_id: &str,
        name: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Screen, CoreError>;

    async fn insert_screen_run(&self, user_id: &str, run: &ScreenRun) -> Result<(), CoreError>;

    async fn list_screen_runs(
        &self,
        user_id: &str,
        screen_id: Uuid,
    ) -> Result<Vec<ScreenRun>, CoreError>;

    /// The most recent run of each screen, paired with its screen.
    async fn latest_screen_runs(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Screen, ScreenRun)>, CoreError>;

    // ── import_history ──────────────────────────────────────────────

    async fn record_import(&self, user_id: &str, record: &ImportRecord) -> Result<(), CoreError>;

    async fn list_imports(&self, user_id: &str) -> Result<Vec<ImportRecord>, CoreError>;

    /// The newest import record — the current portfolio summary row.
    async fn latest_import(&self, user_id: &str) -> Result<Option<ImportRecord>, CoreError>;

    /// Delete all import history (the portfolio summary rows) for the user.
    async fn clear_imports(&self, user_id: &str) -> Result<usize, CoreError>;
}
