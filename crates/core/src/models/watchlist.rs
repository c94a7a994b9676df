use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::AccountBreakdown;

/// A symbol the user is tracking but not necessarily holding.
/// Unique per (user, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    /// Unique identifier.
    pub id: Uuid,

    /// Ticker symbol, uppercased.
    pub symbol: String,

    /// Company name, filled by profile enrichment.
    #[serde(default)]
    pub company_name: String,

    /// Sector, filled by profile enrichment.
    #[serde(default)]
    pub sector: String,

    /// Industry, filled by profile enrichment.
    #[serde(default)]
    pub industry: String,

    /// Price when the entry was added (captured at first enrichment);
    /// baseline for "percent change since added" in alert notifications.
    #[serde(default)]
    pub added_price: Option<f64>,

    pub added_at: DateTime<Utc>,
}

impl WatchlistEntry {
    pub fn new(symbol: impl Into<String>, added_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into().trim().to_uppercase(),
            company_name: String::new(),
            sector: String::new(),
            industry: String::new(),
            added_price: None,
            added_at,
        }
    }
}

/// A user-defined label attachable to watchlist entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// An externally sourced stock-picking list, tracked over repeated runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One upload of a screen's symbol list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenRun {
    pub id: Uuid,

    /// The screen this run belongs to.
    pub screen_id: Uuid,

    pub run_at: DateTime<Utc>,

    /// Symbols in the list, uppercased.
    pub symbols: Vec<String>,
}

/// One recorded CSV import. The latest record doubles as the portfolio
/// summary row: it carries the cash balance produced by that import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: Uuid,

    pub imported_at: DateTime<Utc>,

    /// Number of files in the batch (including failed ones).
    pub file_count: usize,

    /// Positions present after aggregation.
    pub position_count: usize,

    /// Cash-equivalent balance detected across the batch.
    pub cash_balance: f64,

    /// Per-account cash breakdown.
    #[serde(default)]
    pub cash_accounts: Vec<AccountBreakdown>,

    /// Per-file error messages for files that failed to parse.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Deferred side effect returned by a primary operation.
///
/// Mutations that want best-effort enrichment or cross-referencing return
/// these instead of firing background calls; the caller executes them with
/// independent error isolation per task (`InvestTracker::run_follow_ups`).
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUpTask {
    /// Fill company/sector/industry (and the added-price baseline, when
    /// unset) on a watchlist entry from a market-data profile lookup.
    EnrichWatchlistEntry {
        user_id: String,
        entry_id: Uuid,
        symbol: String,
    },

    /// Attach a named tag to a watchlist entry, creating the tag if needed.
    TagWatchlistEntry {
        user_id: String,
        entry_id: Uuid,
        tag: String,
    },
}
