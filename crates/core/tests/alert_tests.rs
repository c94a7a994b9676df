// ═══════════════════════════════════════════════════════════════════
// Alert Tests — trigger predicates, creation validation, the
// evaluation batch (exactly-once, isolation, notification posture)
// ═══════════════════════════════════════════════════════════════════

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use invest_tracker_core::clock::{Clock, ManualClock};
use invest_tracker_core::errors::CoreError;
use invest_tracker_core::models::alert::{AlertType, PriceAlert};
use invest_tracker_core::models::market::{Quote, SymbolProfile};
use invest_tracker_core::models::settings::PortfolioSettings;
use invest_tracker_core::providers::traits::{EmailMessage, EmailSender, MarketDataProvider};
use invest_tracker_core::storage::memory::MemoryStore;
use invest_tracker_core::InvestTracker;

const USER: &str = "user-1";

// ═══════════════════════════════════════════════════════════════════
// Mocks
// ═══════════════════════════════════════════════════════════════════

/// Pops one symbol→price map per quote request. An empty queue answers
/// with no quotes; `fail_quotes` makes every request error.
#[derive(Default)]
struct ScriptedProvider {
    batches: Mutex<VecDeque<HashMap<String, f64>>>,
    fail_quotes: bool,
    quote_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn with_batches(batches: Vec<HashMap<String, f64>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail_quotes: true,
            ..Self::default()
        }
    }
}

fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn fetch_profile(
        &self,
        _api_key: &str,
        _symbol: &str,
    ) -> Result<Option<SymbolProfile>, CoreError> {
        Ok(None)
    }

    async fn fetch_profiles(
        &self,
        _api_key: &str,
        _symbols: &[String],
    ) -> Result<Vec<SymbolProfile>, CoreError> {
        Ok(Vec::new())
    }

    async fn fetch_quotes(
        &self,
        _api_key: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, CoreError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_quotes {
            return Err(CoreError::Api {
                provider: "Scripted".into(),
                message: "quote endpoint down".into(),
            });
        }
        let map = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        Ok(symbols
            .iter()
            .filter_map(|symbol| {
                map.get(symbol).map(|price| Quote {
                    symbol: symbol.clone(),
                    price: *price,
                    previous_close: 0.0,
                    changes_percentage: 0.0,
                })
            })
            .collect())
    }
}

/// Records every message; optionally refuses them all.
#[derive(Default)]
struct MockMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

#[async_trait]
impl EmailSender for MockMailer {
    fn name(&self) -> &str {
        "MockMailer"
    }

    async fn send(&self, _api_key: &str, message: &EmailMessage) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::Api {
                provider: "MockMailer".into(),
                message: "delivery refused".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════

struct Harness {
    tracker: InvestTracker,
    clock: Arc<ManualClock>,
    mailer: Arc<MockMailer>,
    provider: Arc<ScriptedProvider>,
}

fn harness(provider: ScriptedProvider, mailer: MockMailer) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
    ));
    let provider = Arc::new(provider);
    let mailer = Arc::new(mailer);
    let tracker = InvestTracker::with_clock(
        store,
        provider.clone(),
        mailer.clone(),
        clock.clone(),
    );
    Harness {
        tracker,
        clock,
        mailer,
        provider,
    }
}

async fn configure(tracker: &InvestTracker, user: &str, with_email: bool) {
    let mut settings = PortfolioSettings::default();
    settings.fmp_api_key = Some("fmp-key".into());
    if with_email {
        settings.notification_email = Some("me@example.com".into());
        settings.resend_api_key = Some("resend-key".into());
    }
    tracker.update_settings(user, &settings).await.unwrap();
}

async fn watch_and_alert(
    tracker: &InvestTracker,
    user: &str,
    symbol: &str,
    alert_type: AlertType,
    target: f64,
    reference: Option<f64>,
) -> PriceAlert {
    let (entry, _) = tracker.add_watchlist_entry(user, symbol).await.unwrap();
    tracker
        .create_alert(user, entry.id, alert_type, target, reference, None)
        .await
        .unwrap()
}

async fn alert_by_id(tracker: &InvestTracker, user: &str, id: Uuid) -> PriceAlert {
    tracker
        .alerts(user)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.id == id)
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════════
// Trigger predicates
// ═══════════════════════════════════════════════════════════════════

mod predicates {
    use super::*;

    fn alert(alert_type: AlertType, target: f64, reference: Option<f64>) -> PriceAlert {
        PriceAlert {
            id: Uuid::new_v4(),
            user_id: USER.into(),
            entry_id: Uuid::new_v4(),
            symbol: "AAPL".into(),
            alert_type,
            target_value: target,
            reference_price: reference,
            is_active: true,
            triggered_at: None,
            acknowledged_at: None,
            notification_sent: false,
            notify_time: None,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn price_above_inclusive() {
        let a = alert(AlertType::PriceAbove, 150.0, None);
        assert!(!a.should_trigger(149.99));
        assert!(a.should_trigger(150.0));
        assert!(a.should_trigger(151.0));
    }

    #[test]
    fn price_below_inclusive() {
        let a = alert(AlertType::PriceBelow, 150.0, None);
        assert!(a.should_trigger(149.0));
        assert!(a.should_trigger(150.0));
        assert!(!a.should_trigger(150.01));
    }

    #[test]
    fn pct_change_up() {
        let a = alert(AlertType::PctChangeUp, 5.0, Some(200.0));
        assert!(!a.should_trigger(209.99));
        assert!(a.should_trigger(210.0));
    }

    #[test]
    fn pct_change_down_boundary() {
        // Reference 100, target 10% → trigger at or below 90.00.
        let a = alert(AlertType::PctChangeDown, 10.0, Some(100.0));
        assert!(!a.should_trigger(90.01));
        assert!(a.should_trigger(90.0));
        assert!(a.should_trigger(89.99));
    }

    #[test]
    fn pct_types_never_trigger_without_reference() {
        let a = alert(AlertType::PctChangeDown, 10.0, None);
        assert!(!a.should_trigger(1.0));

        let b = alert(AlertType::PctChangeUp, 10.0, Some(0.0));
        assert!(!b.should_trigger(1_000_000.0));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Creation & acknowledgement
// ═══════════════════════════════════════════════════════════════════

mod creation {
    use super::*;

    #[tokio::test]
    async fn symbol_comes_from_the_watchlist_entry() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let alert =
            watch_and_alert(&h.tracker, USER, "aapl", AlertType::PriceAbove, 150.0, None).await;
        assert_eq!(alert.symbol, "AAPL");
        assert!(alert.is_active);
        assert!(alert.triggered_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_alert_is_a_conflict() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let (entry, _) = h.tracker.add_watchlist_entry(USER, "AAPL").await.unwrap();
        h.tracker
            .create_alert(USER, entry.id, AlertType::PriceAbove, 150.0, None, None)
            .await
            .unwrap();

        let result = h
            .tracker
            .create_alert(USER, entry.id, AlertType::PriceAbove, 175.0, None, None)
            .await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));

        // A different alert type on the same entry is fine.
        h.tracker
            .create_alert(USER, entry.id, AlertType::PriceBelow, 100.0, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pct_alert_requires_positive_reference() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let (entry, _) = h.tracker.add_watchlist_entry(USER, "AAPL").await.unwrap();

        let missing = h
            .tracker
            .create_alert(USER, entry.id, AlertType::PctChangeDown, 10.0, None, None)
            .await;
        assert!(matches!(missing, Err(CoreError::ValidationError(_))));

        let zero = h
            .tracker
            .create_alert(USER, entry.id, AlertType::PctChangeDown, 10.0, Some(0.0), None)
            .await;
        assert!(matches!(zero, Err(CoreError::ValidationError(_))));
    }

    #[tokio::test]
    async fn target_must_be_positive() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let (entry, _) = h.tracker.add_watchlist_entry(USER, "AAPL").await.unwrap();

        let result = h
            .tracker
            .create_alert(USER, entry.id, AlertType::PriceAbove, 0.0, None, None)
            .await;
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[tokio::test]
    async fn unknown_entry_not_found() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let result = h
            .tracker
            .create_alert(USER, Uuid::new_v4(), AlertType::PriceAbove, 150.0, None, None)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn acknowledge_sets_timestamp_once() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let alert =
            watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceAbove, 150.0, None).await;

        h.tracker.acknowledge_alert(USER, alert.id).await.unwrap();
        let first = alert_by_id(&h.tracker, USER, alert.id).await.acknowledged_at;
        assert!(first.is_some());

        h.clock.advance_secs(3600);
        h.tracker.acknowledge_alert(USER, alert.id).await.unwrap();
        let second = alert_by_id(&h.tracker, USER, alert.id).await.acknowledged_at;
        assert_eq!(first, second);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Evaluation batch
// ═══════════════════════════════════════════════════════════════════

mod evaluation {
    use super::*;

    #[tokio::test]
    async fn empty_working_set_is_a_normal_run() {
        let h = harness(ScriptedProvider::default(), MockMailer::default());
        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(summary.triggered, 0);
        assert_eq!(h.provider.quote_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn triggers_exactly_once_across_runs() {
        let h = harness(
            ScriptedProvider::with_batches(vec![
                prices(&[("AAPL", 140.0)]),
                prices(&[("AAPL", 160.0)]),
                prices(&[("AAPL", 170.0)]),
            ]),
            MockMailer::default(),
        );
        configure(&h.tracker, USER, false).await;
        let alert =
            watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceAbove, 150.0, None).await;

        // Run 1: price 140 — below target, stays active.
        let run1 = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(run1.checked, 1);
        assert_eq!(run1.triggered, 0);
        assert!(alert_by_id(&h.tracker, USER, alert.id).await.is_active);

        // Run 2: price 160 — triggers and deactivates.
        h.clock.advance_secs(120); // step past the quote TTL
        let triggered_instant = h.clock.now();
        let run2 = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(run2.triggered, 1);

        let after_run2 = alert_by_id(&h.tracker, USER, alert.id).await;
        assert!(!after_run2.is_active);
        assert_eq!(after_run2.triggered_at, Some(triggered_instant));

        // Run 3: nothing active — no re-trigger, timestamp untouched.
        h.clock.advance_secs(120);
        let run3 = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(run3.checked, 0);
        assert_eq!(run3.triggered, 0);

        let after_run3 = alert_by_id(&h.tracker, USER, alert.id).await;
        assert!(!after_run3.is_active);
        assert_eq!(after_run3.triggered_at, Some(triggered_instant));
    }

    #[tokio::test]
    async fn user_without_api_key_is_skipped() {
        let h = harness(
            ScriptedProvider::with_batches(vec![prices(&[("MSFT", 500.0)])]),
            MockMailer::default(),
        );
        // user-a has alerts but never configured a key.
        let a = watch_and_alert(&h.tracker, "user-a", "AAPL", AlertType::PriceAbove, 1.0, None)
            .await;
        // user-b is fully configured and should still be processed.
        configure(&h.tracker, "user-b", false).await;
        let b = watch_and_alert(&h.tracker, "user-b", "MSFT", AlertType::PriceAbove, 400.0, None)
            .await;

        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.users_skipped, 1);
        assert_eq!(summary.triggered, 1);
        assert!(alert_by_id(&h.tracker, "user-a", a.id).await.is_active);
        assert!(!alert_by_id(&h.tracker, "user-b", b.id).await.is_active);
    }

    #[tokio::test]
    async fn quote_failure_means_skip_not_trigger() {
        let h = harness(ScriptedProvider::failing(), MockMailer::default());
        configure(&h.tracker, USER, false).await;
        let alert =
            watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceAbove, 1.0, None).await;

        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.triggered, 0);
        assert!(alert_by_id(&h.tracker, USER, alert.id).await.is_active);
    }

    #[tokio::test]
    async fn zero_price_is_ignored() {
        let h = harness(
            ScriptedProvider::with_batches(vec![prices(&[("AAPL", 0.0)])]),
            MockMailer::default(),
        );
        configure(&h.tracker, USER, false).await;
        let alert =
            watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceBelow, 500.0, None).await;

        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.triggered, 0);
        assert!(alert_by_id(&h.tracker, USER, alert.id).await.is_active);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Notification
// ═══════════════════════════════════════════════════════════════════

mod notification {
    use super::*;

    #[tokio::test]
    async fn delivery_marks_notification_sent() {
        let h = harness(
            ScriptedProvider::with_batches(vec![prices(&[("AAPL", 160.0)])]),
            MockMailer::default(),
        );
        configure(&h.tracker, USER, true).await;
        let alert =
            watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceAbove, 150.0, None).await;

        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.notified, 1);
        assert!(alert_by_id(&h.tracker, USER, alert.id).await.notification_sent);

        let sent = h.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["me@example.com".to_string()]);
        assert!(sent[0].subject.contains("AAPL"));
        assert!(sent[0].html.contains("$160.00"));
    }

    #[tokio::test]
    async fn delivery_failure_never_reverts_the_trigger() {
        let h = harness(
            ScriptedProvider::with_batches(vec![prices(&[("AAPL", 160.0)])]),
            MockMailer {
                fail: true,
                ..MockMailer::default()
            },
        );
        configure(&h.tracker, USER, true).await;
        let alert =
            watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceAbove, 150.0, None).await;

        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.notified, 0);

        let after = alert_by_id(&h.tracker, USER, alert.id).await;
        assert!(!after.is_active);
        assert!(!after.notification_sent);
        assert!(after.triggered_at.is_some());
    }

    #[tokio::test]
    async fn no_email_settings_means_no_delivery_attempt() {
        let h = harness(
            ScriptedProvider::with_batches(vec![prices(&[("AAPL", 160.0)])]),
            MockMailer::default(),
        );
        configure(&h.tracker, USER, false).await;
        watch_and_alert(&h.tracker, USER, "AAPL", AlertType::PriceAbove, 150.0, None).await;

        let summary = h.tracker.run_alert_evaluation().await.unwrap();
        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.notified, 0);
        assert!(h.mailer.sent.lock().unwrap().is_empty());
    }
}
