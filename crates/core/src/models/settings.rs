use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CoreError;

/// Palette cycled by category index when a persisted category has no color.
pub const CATEGORY_COLORS: [&str; 10] = [
    "#4f46e5", "#0ea5e9", "#10b981", "#f59e0b", "#ef4444", "#8b5cf6", "#ec4899", "#14b8a6",
    "#f97316", "#64748b",
];

/// Default allocation structure: (category key, display name, tiers), where
/// each tier is (key, name, allocation %, max positions). Legacy documents
/// are migrated onto this skeleton, overriding percentages from whatever
/// flat `tier_goals` keys they carry.
const DEFAULT_STRUCTURE: [(&str, &str, &[(&str, &str, f64, u32)]); 3] = [
    (
        "core",
        "Core",
        &[
            ("C1", "Tier 1", 24.0, 4),
            ("C2", "Tier 2", 20.0, 5),
            ("C3", "Tier 3", 16.0, 8),
        ],
    ),
    ("titan", "Titan", &[("TT", "Top Titan", 10.0, 2)]),
    ("consensus", "Consensus", &[("CON_MIN", "Consensus Min", 5.0, 5)]),
];

/// The finest allocation bucket beneath a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Stable identifier (e.g., "C1", "TT").
    pub key: String,

    /// Display name.
    pub name: String,

    /// Share of the whole portfolio, in percent, allocated to this tier.
    pub allocation_pct: f64,

    /// Maximum number of positions the tier should hold.
    pub max_positions: u32,
}

impl TierConfig {
    /// The ideal portfolio weight (%) of a single position in this tier.
    pub fn per_position_target(&self) -> f64 {
        if self.max_positions == 0 {
            0.0
        } else {
            self.allocation_pct / f64::from(self.max_positions)
        }
    }
}

/// A top-level allocation grouping, optionally subdivided into tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Stable identifier (e.g., "core").
    pub key: String,

    /// Display name.
    pub display_name: String,

    /// Display color (hex).
    pub color: String,

    /// Total number of positions the category should hold.
    pub target_positions: u32,

    /// Portfolio share in percent. Only meaningful when the category has
    /// no tiers; tiered categories derive their target from the tier sum.
    #[serde(default)]
    pub target_pct: Option<f64>,

    /// Tiers within this category, in display/priority order.
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

impl CategoryConfig {
    /// Portfolio share (%) targeted by the whole category: the sum of tier
    /// allocations when tiered, else the category's own `target_pct`.
    pub fn target_allocation(&self) -> f64 {
        if self.tiers.is_empty() {
            self.target_pct.unwrap_or(0.0)
        } else {
            self.tiers.iter().map(|t| t.allocation_pct).sum()
        }
    }

    /// Per-position target weight (%) for a tier-less category.
    /// Returns 0 when the category has tiers (those carry their own targets)
    /// or when no position count is configured.
    pub fn per_position_target(&self) -> f64 {
        if !self.tiers.is_empty() || self.target_positions == 0 {
            return 0.0;
        }
        self.target_pct.unwrap_or(0.0) / f64::from(self.target_positions)
    }
}

/// Per-user allocation targets plus integration settings.
///
/// Persisted as one JSON document per user. Older document shapes are
/// upgraded on load — see [`decode_settings_document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSettings {
    /// Allocation categories in display/priority order.
    pub categories: Vec<CategoryConfig>,

    /// API key for the market-data provider.
    #[serde(default)]
    pub fmp_api_key: Option<String>,

    /// Address price-alert notifications are delivered to.
    #[serde(default)]
    pub notification_email: Option<String>,

    /// API key for the email provider.
    #[serde(default)]
    pub resend_api_key: Option<String>,

    /// Preferred local delivery time for notifications ("HH:MM").
    /// Carried as configuration; evaluation does not currently defer on it.
    #[serde(default)]
    pub default_notify_time: Option<String>,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        let categories = DEFAULT_STRUCTURE
            .iter()
            .enumerate()
            .map(|(idx, (key, display_name, tiers))| {
                let tiers: Vec<TierConfig> = tiers
                    .iter()
                    .map(|(key, name, allocation_pct, max_positions)| TierConfig {
                        key: (*key).to_string(),
                        name: (*name).to_string(),
                        allocation_pct: *allocation_pct,
                        max_positions: *max_positions,
                    })
                    .collect();
                CategoryConfig {
                    key: (*key).to_string(),
                    display_name: (*display_name).to_string(),
                    color: CATEGORY_COLORS[idx % CATEGORY_COLORS.len()].to_string(),
                    target_positions: tiers.iter().map(|t| t.max_positions).sum(),
                    target_pct: None,
                    tiers,
                }
            })
            .collect();

        Self {
            categories,
            fmp_api_key: None,
            notification_email: None,
            resend_api_key: None,
            default_notify_time: None,
        }
    }
}

impl PortfolioSettings {
    /// Look up a tier by key, with its owning category.
    pub fn find_tier(&self, key: &str) -> Option<(&CategoryConfig, &TierConfig)> {
        self.categories.iter().find_map(|category| {
            category
                .tiers
                .iter()
                .find(|tier| tier.key == key)
                .map(|tier| (category, tier))
        })
    }

    /// Look up a category by key.
    pub fn find_category(&self, key: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.key == key)
    }

    /// Stable ordering map for allocation buckets: categories in array
    /// order, each tier given an increasing index; a tier-less category
    /// gets one index under its own key. Used for the deterministic sort
    /// of positions grouped by allocation bucket.
    pub fn tier_order(&self) -> HashMap<String, usize> {
        let mut order = HashMap::new();
        let mut index = 0;
        for category in &self.categories {
            if category.tiers.is_empty() {
                order.insert(category.key.clone(), index);
                index += 1;
            } else {
                for tier in &category.tiers {
                    order.insert(tier.key.clone(), index);
                    index += 1;
                }
            }
        }
        order
    }
}

// ── Persisted-shape decoding & migration ────────────────────────────
//
// Two shapes exist in the wild:
//  * Legacy V1: no `categories` array — flat `tier_goals` /
//    `category_targets` maps keyed by tier/category identifiers.
//  * V2: `categories` array, possibly missing per-field data written by
//    older builds (`target_pct` on tiers instead of `allocation_pct`,
//    categories without `color` or `target_positions`).
// The probe is explicit: shape is decided once, here, never inferred
// field-by-field in business logic.

/// Legacy flat-map settings document (pre-category schema).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacySettings {
    /// Tier key → allocation percent (keys C1/C2/C3/TT/CON_MIN).
    #[serde(default)]
    pub tier_goals: HashMap<String, f64>,

    /// Category key → target percent (tier-less categories only).
    #[serde(default)]
    pub category_targets: HashMap<String, f64>,

    #[serde(default)]
    pub fmp_api_key: Option<String>,
    #[serde(default)]
    pub notification_email: Option<String>,
    #[serde(default)]
    pub resend_api_key: Option<String>,
    #[serde(default)]
    pub default_notify_time: Option<String>,
}

/// V2 document as persisted, before per-field upgrades.
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    categories: Vec<RawCategory>,
    #[serde(default)]
    fmp_api_key: Option<String>,
    #[serde(default)]
    notification_email: Option<String>,
    #[serde(default)]
    resend_api_key: Option<String>,
    #[serde(default)]
    default_notify_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    key: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    target_positions: Option<u32>,
    #[serde(default)]
    target_pct: Option<f64>,
    #[serde(default)]
    tiers: Vec<RawTier>,
}

#[derive(Debug, Deserialize)]
struct RawTier {
    key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    allocation_pct: Option<f64>,
    #[serde(default)]
    target_pct: Option<f64>,
    #[serde(default)]
    max_positions: Option<u32>,
}

/// Shape probe + decode. Returns the upgraded settings and whether the
/// document differed from the canonical current shape — `true` means the
/// caller must persist the upgraded document (exactly one write-back).
/// Decoding an already-current document reports `false`.
pub fn decode_settings_document(value: &Value) -> Result<(PortfolioSettings, bool), CoreError> {
    let has_category_array = value
        .get("categories")
        .map(Value::is_array)
        .unwrap_or(false);

    if !has_category_array {
        let legacy: LegacySettings = serde_json::from_value(value.clone())?;
        return Ok((migrate_legacy(&legacy), true));
    }

    let raw: RawSettings = serde_json::from_value(value.clone())?;
    let mut changed = false;
    let categories = raw
        .categories
        .into_iter()
        .enumerate()
        .map(|(index, category)| upgrade_category(index, category, &mut changed))
        .collect();

    Ok((
        PortfolioSettings {
            categories,
            fmp_api_key: raw.fmp_api_key,
            notification_email: raw.notification_email,
            resend_api_key: raw.resend_api_key,
            default_notify_time: raw.default_notify_time,
        },
        changed,
    ))
}

/// Pure migration of a legacy flat-map document onto the fixed default
/// category/tier skeleton. Percentages come from whatever legacy keys
/// exist; everything else takes the hardcoded defaults.
pub fn migrate_legacy(legacy: &LegacySettings) -> PortfolioSettings {
    let mut settings = PortfolioSettings::default();

    for category in &mut settings.categories {
        if let Some(pct) = legacy.category_targets.get(&category.key) {
            category.target_pct = Some(*pct);
        }
        for tier in &mut category.tiers {
            if let Some(goal) = legacy.tier_goals.get(&tier.key) {
                tier.allocation_pct = *goal;
            }
        }
    }

    settings.fmp_api_key = legacy.fmp_api_key.clone();
    settings.notification_email = legacy.notification_email.clone();
    settings.resend_api_key = legacy.resend_api_key.clone();
    settings.default_notify_time = legacy.default_notify_time.clone();
    settings
}

fn upgrade_category(index: usize, raw: RawCategory, changed: &mut bool) -> CategoryConfig {
    let tiers: Vec<TierConfig> = raw
        .tiers
        .into_iter()
        .map(|tier| upgrade_tier(tier, changed))
        .collect();

    let display_name = match raw.display_name {
        Some(name) => name,
        None => {
            *changed = true;
            raw.key.clone()
        }
    };
    let color = match raw.color {
        Some(color) => color,
        None => {
            *changed = true;
            CATEGORY_COLORS[index % CATEGORY_COLORS.len()].to_string()
        }
    };
    let target_positions = match raw.target_positions {
        Some(count) => count,
        None => {
            *changed = true;
            tiers.iter().map(|t| t.max_positions).sum()
        }
    };

    CategoryConfig {
        key: raw.key,
        display_name,
        color,
        target_positions,
        target_pct: raw.target_pct,
        tiers,
    }
}

fn upgrade_tier(raw: RawTier, changed: &mut bool) -> TierConfig {
    let allocation_pct = match raw.allocation_pct {
        Some(pct) => pct,
        None => {
            // Older builds wrote the tier share as `target_pct`.
            *changed = true;
            raw.target_pct.unwrap_or(0.0)
        }
    };
    let max_positions = match raw.max_positions {
        Some(count) => count,
        None => {
            *changed = true;
            1
        }
    };
    let name = match raw.name {
        Some(name) => name,
        None => {
            *changed = true;
            raw.key.clone()
        }
    };

    TierConfig {
        key: raw.key,
        name,
        allocation_pct,
        max_positions,
    }
}
