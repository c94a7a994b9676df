use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trigger condition of a price alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Current price at or above an absolute target (dollars).
    PriceAbove,
    /// Current price at or below an absolute target (dollars).
    PriceBelow,
    /// Price risen by at least `target_value` percent from the reference price.
    PctChangeUp,
    /// Price fallen by at least `target_value` percent from the reference price.
    PctChangeDown,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertType::PriceAbove => write!(f, "price above"),
            AlertType::PriceBelow => write!(f, "price below"),
            AlertType::PctChangeUp => write!(f, "% change up"),
            AlertType::PctChangeDown => write!(f, "% change down"),
        }
    }
}

/// A price alert attached to a watchlist entry.
///
/// At most one alert per (user, watchlist entry, alert type) — the store
/// rejects duplicates with a recoverable conflict. An alert deactivates
/// exactly once on trigger and is never re-activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    /// Unique identifier.
    pub id: Uuid,

    /// Owning user.
    pub user_id: String,

    /// The watchlist entry this alert watches.
    pub entry_id: Uuid,

    /// Ticker symbol, uppercased.
    pub symbol: String,

    /// Trigger condition.
    pub alert_type: AlertType,

    /// Dollars for the PRICE_* types, percent for the PCT_* types.
    pub target_value: f64,

    /// Baseline for percent computation. Required (and must be positive)
    /// for the PCT_* types; a missing or non-positive baseline means the
    /// alert never triggers.
    #[serde(default)]
    pub reference_price: Option<f64>,

    /// False once the alert has triggered; triggered alerts stay inactive.
    pub is_active: bool,

    /// Set exactly once, at trigger time.
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,

    /// Set when the user dismisses the triggered alert.
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,

    /// True once a notification email was delivered for the trigger.
    #[serde(default)]
    pub notification_sent: bool,

    /// Preferred local delivery time ("HH:MM"). Carried as configuration;
    /// evaluation does not currently defer on it.
    #[serde(default)]
    pub notify_time: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl PriceAlert {
    /// Whether `price` satisfies this alert's trigger condition.
    ///
    /// Pure predicate — activation state and deduplication are the
    /// evaluation pipeline's concern.
    pub fn should_trigger(&self, price: f64) -> bool {
        match self.alert_type {
            AlertType::PriceAbove => price >= self.target_value,
            AlertType::PriceBelow => price <= self.target_value,
            AlertType::PctChangeUp => match self.reference_price {
                Some(reference) if reference > 0.0 => {
                    price >= reference * (1.0 + self.target_value / 100.0)
                }
                _ => false,
            },
            AlertType::PctChangeDown => match self.reference_price {
                Some(reference) if reference > 0.0 => {
                    price <= reference * (1.0 - self.target_value / 100.0)
                }
                _ => false,
            },
        }
    }
}
