use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::import::aggregate::ImportOutcome;
use crate::models::position::Position;
use crate::models::settings::PortfolioSettings;
use crate::models::watchlist::ImportRecord;
use crate::storage::store::RecordStore;

/// Band around the goal value (as a fraction of it) within which a
/// position counts as "at goal".
pub const GOAL_TOLERANCE: f64 = 0.02;

/// How a position's value compares to its allocation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalStatus {
    /// Within the tolerance band of the goal value.
    AtGoal,
    /// Below the band: `diff` dollars should be bought.
    Underweight,
    /// Above the band: `|diff|` dollars should be trimmed.
    Overweight,
    /// No tier or tier-less category resolved — excluded from rebalance
    /// suggestions.
    Unassigned,
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoalStatus::AtGoal => write!(f, "at goal"),
            GoalStatus::Underweight => write!(f, "underweight"),
            GoalStatus::Overweight => write!(f, "overweight"),
            GoalStatus::Unassigned => write!(f, "unassigned"),
        }
    }
}

/// One position's deviation from its allocation target.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionGoal {
    pub symbol: String,
    pub category: Option<String>,
    pub tier: Option<String>,
    pub current_value: f64,

    /// Target portfolio weight in percent; `None` when unassigned.
    pub goal_pct: Option<f64>,

    /// Dollar value the position should hold (0 when unassigned).
    pub goal_value: f64,

    /// `goal_value - current_value`: positive means buy, negative trim.
    pub diff: f64,

    pub status: GoalStatus,
}

/// Advisory dollars to move for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceAction {
    pub symbol: String,
    pub amount: f64,
}

/// Advisory rebalancing guidance — never an automated trade.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalancePlan {
    /// Underweight positions and the dollars to buy, largest gap first.
    pub buys: Vec<RebalanceAction>,

    /// Overweight positions and the dollars to trim, largest excess first.
    pub trims: Vec<RebalanceAction>,

    /// Cash the user has available, shown alongside the suggestions.
    pub available_cash: f64,
}

/// Outcome of removing an account from the portfolio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountRemoval {
    /// Positions deleted because the removed account was their sole holder.
    pub deleted: usize,

    /// Positions rescaled to their remaining accounts.
    pub updated: usize,
}

/// The reconciliation engine: combines positions with allocation settings
/// to compute per-position targets and deviations, and owns the position
/// mutations (import apply, account removal, clear-all).
pub struct PortfolioService {
    store: Arc<dyn RecordStore>,
}

impl PortfolioService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    // ── Pure goal math ──────────────────────────────────────────────

    /// Compute every position's goal against the portfolio grand total
    /// (the sum of position values). Output is ordered by allocation
    /// bucket (settings order), then by value descending; unassigned
    /// positions sort last.
    pub fn evaluate_goals(
        settings: &PortfolioSettings,
        positions: &[Position],
    ) -> Vec<PositionGoal> {
        let grand_total: f64 = positions.iter().map(|p| p.current_value).sum();
        let order = settings.tier_order();

        let mut goals: Vec<PositionGoal> = positions
            .iter()
            .map(|position| Self::position_goal(settings, position, grand_total))
            .collect();

        goals.sort_by(|a, b| {
            bucket_index(&order, a).cmp(&bucket_index(&order, b)).then(
                b.current_value
                    .partial_cmp(&a.current_value)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        goals
    }

    fn position_goal(
        settings: &PortfolioSettings,
        position: &Position,
        grand_total: f64,
    ) -> PositionGoal {
        let goal_pct = Self::goal_pct(settings, position);
        let (goal_value, diff, status) = match goal_pct {
            None => (0.0, 0.0, GoalStatus::Unassigned),
            Some(pct) => {
                let goal_value = pct / 100.0 * grand_total;
                let diff = goal_value - position.current_value;
                let tolerance = goal_value * GOAL_TOLERANCE;
                let status = if diff.abs() <= tolerance {
                    GoalStatus::AtGoal
                } else if diff > 0.0 {
                    GoalStatus::Underweight
                } else {
                    GoalStatus::Overweight
                };
                (goal_value, diff, status)
            }
        };

        PositionGoal {
            symbol: position.symbol.clone(),
            category: position.category.clone(),
            tier: position.tier.clone(),
            current_value: position.current_value,
            goal_pct,
            goal_value,
            diff,
            status,
        }
    }

    /// Target weight resolution: the position's tier wins; a tier-less
    /// category falls back to its own per-position target; anything else
    /// (no assignment, stale keys, tiered category without a tier) is
    /// unassigned.
    fn goal_pct(settings: &PortfolioSettings, position: &Position) -> Option<f64> {
        if let Some(tier_key) = &position.tier {
            return settings
                .find_tier(tier_key)
                .map(|(_, tier)| tier.per_position_target());
        }
        let category = settings.find_category(position.category.as_deref()?)?;
        if category.tiers.is_empty() {
            Some(category.per_position_target())
        } else {
            None
        }
    }

    /// Turn evaluated goals into buy/trim suggestions.
    pub fn rebalance_plan(goals: &[PositionGoal], available_cash: f64) -> RebalancePlan {
        let mut buys: Vec<RebalanceAction> = goals
            .iter()
            .filter(|g| g.status == GoalStatus::Underweight)
            .map(|g| RebalanceAction {
                symbol: g.symbol.clone(),
                amount: g.diff,
            })
            .collect();
        let mut trims: Vec<RebalanceAction> = goals
            .iter()
            .filter(|g| g.status == GoalStatus::Overweight)
            .map(|g| RebalanceAction {
                symbol: g.symbol.clone(),
                amount: g.diff.abs(),
            })
            .collect();

        buys.sort_by(|a, b| {
            b.amount
                .partial_cmp(&a.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        trims.sort_by(|a, b| {
            b.amount
                .partial_cmp(&a.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        RebalancePlan {
            buys,
            trims,
            available_cash,
        }
    }

    // ── Position mutations ──────────────────────────────────────────

    /// Persist an aggregated import: upsert each position by symbol,
    /// preserving any category/tier assignment already on the stored row
    /// (bucketing must survive refreshes), then append the import record.
    pub async fn apply_import(
        &self,
        user_id: &str,
        outcome: &ImportOutcome,
        now: DateTime<Utc>,
    ) -> Result<ImportRecord, CoreError> {
        let existing = self.store.list_positions(user_id).await?;

        for position in &outcome.positions {
            let mut row = position.clone();
            if let Some(prior) = existing.iter().find(|p| p.symbol == row.symbol) {
                row.category = prior.category.clone();
                row.tier = prior.tier.clone();
            }
            self.store.upsert_position(user_id, &row).await?;
        }

        let record = ImportRecord {
            id: Uuid::new_v4(),
            imported_at: now,
            file_count: outcome.file_count,
            position_count: outcome.positions.len(),
            cash_balance: outcome.cash_balance,
            cash_accounts: outcome.cash_accounts.clone(),
            errors: outcome
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.file, e.message))
                .collect(),
        };
        self.store.record_import(user_id, &record).await?;
        Ok(record)
    }

    /// Assign (or clear) a position's allocation bucket. A tier must
    /// belong to the named category; keys are validated against `settings`.
    pub async fn assign_position(
        &self,
        user_id: &str,
        symbol: &str,
        category: Option<String>,
        tier: Option<String>,
        settings: &PortfolioSettings,
    ) -> Result<(), CoreError> {
        if let Some(tier_key) = &tier {
            let category_key = category.as_deref().ok_or_else(|| {
                CoreError::ValidationError("a tier assignment requires a category".into())
            })?;
            let (owner, _) = settings.find_tier(tier_key).ok_or_else(|| {
                CoreError::ValidationError(format!("unknown tier '{tier_key}'"))
            })?;
            if owner.key != category_key {
                return Err(CoreError::ValidationError(format!(
                    "tier '{tier_key}' does not belong to category '{category_key}'"
                )));
            }
        } else if let Some(category_key) = &category {
            if settings.find_category(category_key).is_none() {
                return Err(CoreError::ValidationError(format!(
                    "unknown category '{category_key}'"
                )));
            }
        }

        let symbol = symbol.trim().to_uppercase();
        let positions = self.store.list_positions(user_id).await?;
        let mut position = positions
            .into_iter()
            .find(|p| p.symbol == symbol)
            .ok_or_else(|| CoreError::NotFound(format!("position {symbol}")))?;
        position.category = category;
        position.tier = tier;
        self.store.upsert_position(user_id, &position).await
    }

    /// Remove one brokerage account from every position holding it.
    ///
    /// Sole-holder positions are deleted. Otherwise shares and value are
    /// recomputed from the remaining breakdowns and the price re-derived
    /// (kept as-is when no shares remain). Cost basis is scaled by the
    /// removed account's share of the old value — per-account cost basis
    /// is not tracked, so this is a proportional estimate, not an exact
    /// figure.
    pub async fn remove_account(
        &self,
        user_id: &str,
        account: &str,
    ) -> Result<AccountRemoval, CoreError> {
        let positions = self.store.list_positions(user_id).await?;
        let mut removal = AccountRemoval::default();

        for mut position in positions {
            let idx = match position.accounts.iter().position(|a| a.account == account) {
                Some(idx) => idx,
                None => continue,
            };

            if position.accounts.len() == 1 {
                self.store.delete_position(user_id, &position.symbol).await?;
                removal.deleted += 1;
                continue;
            }

            let removed = position.accounts.remove(idx);
            let old_value = position.current_value;
            let new_shares: f64 = position.accounts.iter().map(|a| a.shares).sum();
            let new_value: f64 = position.accounts.iter().map(|a| a.value).sum();

            if new_shares > 0.0 {
                position.current_price = new_value / new_shares;
            }
            let ratio = if old_value != 0.0 {
                (old_value - removed.value) / old_value
            } else {
                1.0
            };
            position.cost_basis *= ratio;
            position.shares = new_shares;
            position.current_value = new_value;

            self.store.upsert_position(user_id, &position).await?;
            removal.updated += 1;
        }

        debug!(
            "portfolio: removed account '{account}' for user {user_id}: {} deleted, {} updated",
            removal.deleted, removal.updated
        );
        Ok(removal)
    }

    /// Irreversible bulk delete of all positions and portfolio summary
    /// rows (import history). The "type DELETE" confirmation lives at the
    /// UI boundary, not here. Returns the number of positions removed.
    pub async fn clear_all(&self, user_id: &str) -> Result<usize, CoreError> {
        let removed = self.store.clear_positions(user_id).await?;
        self.store.clear_imports(user_id).await?;
        Ok(removed)
    }
}

/// Sort key for a goal's allocation bucket: the tier key (or the category
/// key for tier-less categories) looked up in the settings ordering map;
/// unknown buckets and unassigned positions sort last.
fn bucket_index(order: &HashMap<String, usize>, goal: &PositionGoal) -> usize {
    goal.tier
        .as_deref()
        .or(goal.category.as_deref())
        .and_then(|key| order.get(key).copied())
        .unwrap_or(usize::MAX)
}
