// ═══════════════════════════════════════════════════════════════════
// Settings Tests — derived target math, tier ordering, persisted-shape
// migration, load/update via the service
// ═══════════════════════════════════════════════════════════════════

use std::sync::Arc;

use serde_json::json;

use invest_tracker_core::models::settings::{
    decode_settings_document, CategoryConfig, PortfolioSettings, TierConfig, CATEGORY_COLORS,
};
use invest_tracker_core::services::settings_service::SettingsService;
use invest_tracker_core::storage::memory::MemoryStore;
use invest_tracker_core::storage::store::RecordStore;

fn tier(key: &str, allocation_pct: f64, max_positions: u32) -> TierConfig {
    TierConfig {
        key: key.to_string(),
        name: key.to_string(),
        allocation_pct,
        max_positions,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Derived computations
// ═══════════════════════════════════════════════════════════════════

mod derived {
    use super::*;

    #[test]
    fn per_position_target_divides_allocation() {
        assert_eq!(tier("C1", 24.0, 4).per_position_target(), 6.0);
    }

    #[test]
    fn per_position_target_zero_positions() {
        assert_eq!(tier("C1", 24.0, 0).per_position_target(), 0.0);
    }

    #[test]
    fn tiered_category_target_is_tier_sum() {
        let category = CategoryConfig {
            key: "core".into(),
            display_name: "Core".into(),
            color: "#111111".into(),
            target_positions: 9,
            target_pct: Some(99.0), // ignored while tiers exist
            tiers: vec![tier("C1", 24.0, 4), tier("C2", 20.0, 5)],
        };
        assert_eq!(category.target_allocation(), 44.0);
        assert_eq!(category.per_position_target(), 0.0);
    }

    #[test]
    fn tierless_category_uses_target_pct() {
        let category = CategoryConfig {
            key: "income".into(),
            display_name: "Income".into(),
            color: "#222222".into(),
            target_positions: 4,
            target_pct: Some(12.0),
            tiers: vec![],
        };
        assert_eq!(category.target_allocation(), 12.0);
        assert_eq!(category.per_position_target(), 3.0);
    }

    #[test]
    fn tierless_category_without_targets() {
        let category = CategoryConfig {
            key: "misc".into(),
            display_name: "Misc".into(),
            color: "#333333".into(),
            target_positions: 0,
            target_pct: None,
            tiers: vec![],
        };
        assert_eq!(category.target_allocation(), 0.0);
        assert_eq!(category.per_position_target(), 0.0);
    }

    #[test]
    fn default_structure() {
        let settings = PortfolioSettings::default();
        assert_eq!(settings.categories.len(), 3);
        let tier_count: usize = settings.categories.iter().map(|c| c.tiers.len()).sum();
        assert_eq!(tier_count, 5);

        // Each category's position target is the sum of its tier caps.
        for category in &settings.categories {
            let cap_sum: u32 = category.tiers.iter().map(|t| t.max_positions).sum();
            assert_eq!(category.target_positions, cap_sum);
        }
    }

    #[test]
    fn find_tier_returns_owner() {
        let settings = PortfolioSettings::default();
        let (category, tier) = settings.find_tier("TT").unwrap();
        assert_eq!(category.key, "titan");
        assert_eq!(tier.key, "TT");
        assert!(settings.find_tier("NOPE").is_none());
    }

    #[test]
    fn tier_order_walks_categories_then_tiers() {
        let mut settings = PortfolioSettings::default();
        // Append a tier-less category: it gets one slot under its own key.
        settings.categories.push(CategoryConfig {
            key: "income".into(),
            display_name: "Income".into(),
            color: "#444444".into(),
            target_positions: 2,
            target_pct: Some(5.0),
            tiers: vec![],
        });

        let order = settings.tier_order();
        assert_eq!(order["C1"], 0);
        assert_eq!(order["C2"], 1);
        assert_eq!(order["C3"], 2);
        assert_eq!(order["TT"], 3);
        assert_eq!(order["CON_MIN"], 4);
        assert_eq!(order["income"], 5);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Shape migration
// ═══════════════════════════════════════════════════════════════════

mod migration {
    use super::*;

    #[test]
    fn legacy_flat_map_is_migrated() {
        let document = json!({
            "tier_goals": { "C1": 30.0, "TT": 12.5 },
            "fmp_api_key": "key-123",
            "notification_email": "me@example.com"
        });

        let (settings, migrated) = decode_settings_document(&document).unwrap();
        assert!(migrated);
        assert_eq!(settings.categories.len(), 3);

        // Legacy goals override the defaults; untouched tiers keep theirs.
        assert_eq!(settings.find_tier("C1").unwrap().1.allocation_pct, 30.0);
        assert_eq!(settings.find_tier("TT").unwrap().1.allocation_pct, 12.5);
        assert_eq!(settings.find_tier("C2").unwrap().1.allocation_pct, 20.0);

        assert_eq!(settings.fmp_api_key.as_deref(), Some("key-123"));
        assert_eq!(
            settings.notification_email.as_deref(),
            Some("me@example.com")
        );
    }

    #[test]
    fn empty_document_gets_full_defaults() {
        let (settings, migrated) = decode_settings_document(&json!({})).unwrap();
        assert!(migrated);
        assert_eq!(settings, PortfolioSettings::default());
    }

    #[test]
    fn tier_target_pct_upgraded_to_allocation_pct() {
        let document = json!({
            "categories": [{
                "key": "core",
                "display_name": "Core",
                "color": "#123456",
                "target_positions": 4,
                "tiers": [
                    { "key": "C1", "name": "Tier 1", "target_pct": 24.0, "max_positions": 4 }
                ]
            }]
        });

        let (settings, migrated) = decode_settings_document(&document).unwrap();
        assert!(migrated);
        assert_eq!(settings.find_tier("C1").unwrap().1.allocation_pct, 24.0);
    }

    #[test]
    fn category_color_assigned_from_palette() {
        let document = json!({
            "categories": [
                {
                    "key": "core", "display_name": "Core", "target_positions": 1,
                    "tiers": [{ "key": "C1", "name": "T1", "allocation_pct": 10.0, "max_positions": 1 }]
                },
                {
                    "key": "titan", "display_name": "Titan", "target_positions": 1,
                    "tiers": [{ "key": "TT", "name": "TT", "allocation_pct": 5.0, "max_positions": 1 }]
                }
            ]
        });

        let (settings, migrated) = decode_settings_document(&document).unwrap();
        assert!(migrated);
        assert_eq!(settings.categories[0].color, CATEGORY_COLORS[0]);
        assert_eq!(settings.categories[1].color, CATEGORY_COLORS[1]);
    }

    #[test]
    fn target_positions_computed_from_tier_caps() {
        let document = json!({
            "categories": [{
                "key": "core", "display_name": "Core", "color": "#123456",
                "tiers": [
                    { "key": "C1", "name": "T1", "allocation_pct": 10.0, "max_positions": 4 },
                    { "key": "C2", "name": "T2", "allocation_pct": 8.0 }
                ]
            }]
        });

        let (settings, migrated) = decode_settings_document(&document).unwrap();
        assert!(migrated);
        // Missing max_positions defaults to 1, so 4 + 1.
        assert_eq!(settings.categories[0].target_positions, 5);
        assert_eq!(settings.find_tier("C2").unwrap().1.max_positions, 1);
    }

    #[test]
    fn current_document_reports_no_change() {
        let settings = PortfolioSettings::default();
        let document = serde_json::to_value(&settings).unwrap();

        let (decoded, migrated) = decode_settings_document(&document).unwrap();
        assert!(!migrated);
        assert_eq!(decoded, settings);
    }

    #[test]
    fn migration_is_idempotent() {
        let legacy = json!({ "tier_goals": { "C1": 42.0 } });
        let (first, migrated_first) = decode_settings_document(&legacy).unwrap();
        assert!(migrated_first);

        let upgraded = serde_json::to_value(&first).unwrap();
        let (second, migrated_second) = decode_settings_document(&upgraded).unwrap();
        assert!(!migrated_second);
        assert_eq!(first, second);
    }
}

// ═══════════════════════════════════════════════════════════════════
// SettingsService (load / write-back / update)
// ═══════════════════════════════════════════════════════════════════

mod service {
    use super::*;

    #[tokio::test]
    async fn missing_document_falls_back_to_defaults_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let service = SettingsService::new(store.clone());

        let settings = service.load("user-1").await.unwrap();
        assert_eq!(settings, PortfolioSettings::default());
        assert!(store.load_settings("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_document_is_upgraded_and_persisted_once() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_settings("user-1", &json!({ "tier_goals": { "C1": 33.0 } }))
            .await
            .unwrap();

        let service = SettingsService::new(store.clone());
        let settings = service.load("user-1").await.unwrap();
        assert_eq!(settings.find_tier("C1").unwrap().1.allocation_pct, 33.0);

        // The write-back leaves a current-shape document behind...
        let persisted = store.load_settings("user-1").await.unwrap().unwrap();
        assert!(persisted.get("categories").unwrap().is_array());

        // ...so the second load decodes it unchanged and writes nothing.
        let again = service.load("user-1").await.unwrap();
        assert_eq!(again, settings);
        let persisted_again = store.load_settings("user-1").await.unwrap().unwrap();
        assert_eq!(persisted, persisted_again);
    }

    #[tokio::test]
    async fn update_then_load_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let service = SettingsService::new(store);

        let mut settings = PortfolioSettings::default();
        settings.fmp_api_key = Some("key-xyz".into());
        settings.categories[0].tiers[0].allocation_pct = 31.0;

        service.update("user-1", &settings).await.unwrap();
        let loaded = service.load("user-1").await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let service = SettingsService::new(store);

        let mut settings = PortfolioSettings::default();
        settings.fmp_api_key = Some("only-user-1".into());
        service.update("user-1", &settings).await.unwrap();

        let other = service.load("user-2").await.unwrap();
        assert!(other.fmp_api_key.is_none());
    }
}
