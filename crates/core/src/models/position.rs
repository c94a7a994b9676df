use serde::{Deserialize, Serialize};

/// Per-brokerage-account slice of a position.
///
/// A single position (one symbol) may be held across several accounts;
/// the position's top-level `shares`/`current_value` always equal the sum
/// of its breakdowns. That invariant is maintained by the import
/// aggregation and the account-removal routine, not by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBreakdown {
    /// Account name as it appeared in the broker export (may be empty).
    pub account: String,

    /// Shares held in this account.
    pub shares: f64,

    /// Market value of the shares held in this account.
    pub value: f64,
}

impl AccountBreakdown {
    pub fn new(account: impl Into<String>, shares: f64, value: f64) -> Self {
        Self {
            account: account.into(),
            shares,
            value,
        }
    }
}

/// One holding row, keyed by (user, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Ticker symbol, uppercased (e.g., "AAPL", "BRK.B").
    pub symbol: String,

    /// Total shares held across all accounts.
    pub shares: f64,

    /// Latest known price per share.
    pub current_price: f64,

    /// Total market value. Tracks the broker-reported value where available,
    /// so it may diverge slightly from `shares × current_price`.
    pub current_value: f64,

    /// Total cost basis across all accounts.
    pub cost_basis: f64,

    /// Allocation category key this position is assigned to, if any.
    #[serde(default)]
    pub category: Option<String>,

    /// Allocation tier key within the category, if any.
    #[serde(default)]
    pub tier: Option<String>,

    /// Per-account breakdown; sums to the top-level shares/value.
    #[serde(default)]
    pub accounts: Vec<AccountBreakdown>,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            shares: 0.0,
            current_price: 0.0,
            current_value: 0.0,
            cost_basis: 0.0,
            category: None,
            tier: None,
            accounts: Vec::new(),
        }
    }

    /// Merge another slice of the same symbol into this position:
    /// quantities and values add up, the higher of the two prices wins
    /// (accounts should agree; max is the defensive tie-break), and
    /// account breakdowns are folded together by account name.
    pub fn merge(&mut self, other: &Position) {
        self.shares += other.shares;
        self.current_value += other.current_value;
        self.cost_basis += other.cost_basis;
        if other.current_price > self.current_price {
            self.current_price = other.current_price;
        }
        for breakdown in &other.accounts {
            merge_breakdown(&mut self.accounts, breakdown);
        }
    }
}

/// Fold one account breakdown into a list, summing shares/value when the
/// account name is already present and appending it otherwise.
pub fn merge_breakdown(accounts: &mut Vec<AccountBreakdown>, incoming: &AccountBreakdown) {
    match accounts.iter_mut().find(|a| a.account == incoming.account) {
        Some(existing) => {
            existing.shares += incoming.shares;
            existing.value += incoming.value;
        }
        None => accounts.push(incoming.clone()),
    }
}
