use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use super::market_data_service::MarketDataService;
use super::settings_service::SettingsService;
use crate::clock::Clock;
use crate::errors::CoreError;
use crate::models::alert::{AlertType, PriceAlert};
use crate::providers::traits::{EmailMessage, EmailSender};
use crate::storage::store::RecordStore;

/// Sender address for alert notifications.
const ALERT_EMAIL_FROM: &str = "Invest Tracker <onboarding@resend.dev>";

/// What one evaluation run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertRunSummary {
    /// Alerts whose trigger condition was evaluated (or skipped for lack
    /// of a price).
    pub checked: usize,

    /// Alerts deactivated this run.
    pub triggered: usize,

    /// Notifications delivered.
    pub notified: usize,

    /// Users skipped entirely (no market-data key, or settings failed to
    /// load).
    pub users_skipped: usize,
}

/// Creates, acknowledges, and periodically evaluates price alerts.
///
/// `run_evaluation` is the stateless batch job: an external scheduler
/// invokes it; everything it needs is loaded fresh from the store.
pub struct AlertService {
    store: Arc<dyn RecordStore>,
    settings: SettingsService,
    market_data: Arc<MarketDataService>,
    mailer: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
}

impl AlertService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        market_data: Arc<MarketDataService>,
        mailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings: SettingsService::new(store.clone()),
            store,
            market_data,
            mailer,
            clock,
        }
    }

    // ── User operations ─────────────────────────────────────────────

    /// Create an alert on a watchlist entry. The symbol comes from the
    /// entry; a second alert of the same type on the same entry is a
    /// recoverable conflict reported by the store.
    pub async fn create_alert(
        &self,
        user_id: &str,
        entry_id: Uuid,
        alert_type: AlertType,
        target_value: f64,
        reference_price: Option<f64>,
        notify_time: Option<String>,
    ) -> Result<PriceAlert, CoreError> {
        let entry = self
            .store
            .get_watchlist_entry(user_id, entry_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("watchlist entry {entry_id}")))?;

        if !target_value.is_finite() || target_value <= 0.0 {
            return Err(CoreError::ValidationError(
                "alert target value must be positive".into(),
            ));
        }
        if matches!(alert_type, AlertType::PctChangeUp | AlertType::PctChangeDown) {
            match reference_price {
                Some(reference) if reference > 0.0 => {}
                _ => {
                    return Err(CoreError::ValidationError(
                        "percent-change alerts require a positive reference price".into(),
                    ))
                }
            }
        }

        let alert = PriceAlert {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            entry_id,
            symbol: entry.symbol.clone(),
            alert_type,
            target_value,
            reference_price,
            is_active: true,
            triggered_at: None,
            acknowledged_at: None,
            notification_sent: false,
            notify_time,
            created_at: self.clock.now(),
        };
        self.store.insert_alert(&alert).await?;
        Ok(alert)
    }

    /// Dismiss a triggered alert. Acknowledging twice is a no-op.
    pub async fn acknowledge(&self, user_id: &str, alert_id: Uuid) -> Result<(), CoreError> {
        let alerts = self.store.list_alerts(user_id).await?;
        let mut alert = alerts
            .into_iter()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))?;

        if alert.acknowledged_at.is_none() {
            alert.acknowledged_at = Some(self.clock.now());
            self.store.update_alert(&alert).await?;
        }
        Ok(())
    }

    // ── Evaluation batch ────────────────────────────────────────────

    /// One evaluation pass over every active alert, batched by user to
    /// bound external-call fan-out.
    ///
    /// Failure posture: an error for one user (settings, quotes) never
    /// blocks the others, and alerts deactivated earlier in the run stay
    /// deactivated no matter what fails later. An empty working set is a
    /// normal terminal state.
    pub async fn run_evaluation(&self) -> Result<AlertRunSummary, CoreError> {
        let mut summary = AlertRunSummary::default();

        let active = self.store.list_active_alerts().await?;
        if active.is_empty() {
            return Ok(summary);
        }

        let mut by_user: BTreeMap<String, Vec<PriceAlert>> = BTreeMap::new();
        for alert in active {
            by_user.entry(alert.user_id.clone()).or_default().push(alert);
        }

        for (user_id, alerts) in by_user {
            if let Err(e) = self.evaluate_user(&user_id, alerts, &mut summary).await {
                error!("alerts: evaluation failed for user {user_id}: {e}");
                summary.users_skipped += 1;
            }
        }

        info!(
            "alerts: run complete — {} checked, {} triggered, {} notified, {} users skipped",
            summary.checked, summary.triggered, summary.notified, summary.users_skipped
        );
        Ok(summary)
    }

    async fn evaluate_user(
        &self,
        user_id: &str,
        alerts: Vec<PriceAlert>,
        summary: &mut AlertRunSummary,
    ) -> Result<(), CoreError> {
        let settings = self.settings.load(user_id).await?;
        let api_key = match settings.fmp_api_key.clone() {
            Some(key) => key,
            None => {
                debug!(
                    "alerts: user {user_id} has no market-data key; {} alerts stay pending",
                    alerts.len()
                );
                summary.users_skipped += 1;
                return Ok(());
            }
        };

        let mut symbols: Vec<String> = alerts.iter().map(|a| a.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        let quotes = self.market_data.fetch_quotes(&api_key, &symbols).await;

        for mut alert in alerts {
            summary.checked += 1;

            // No price this cycle: skip, don't trigger.
            let price = match quotes.get(&alert.symbol) {
                Some(quote) if quote.price != 0.0 => quote.price,
                _ => continue,
            };
            if !alert.should_trigger(price) {
                continue;
            }

            // Flip before any notification attempt: combined with the
            // is_active filter at load time, this makes the trigger
            // exactly-once across runs.
            alert.is_active = false;
            alert.triggered_at = Some(self.clock.now());
            if let Err(e) = self.store.update_alert(&alert).await {
                error!(
                    "alerts: failed to deactivate {} alert for {}: {e}",
                    alert.alert_type, alert.symbol
                );
                continue;
            }
            summary.triggered += 1;
            info!(
                "alerts: {} {} triggered at price {price}",
                alert.symbol, alert.alert_type
            );

            if let (Some(to), Some(resend_key)) = (
                settings.notification_email.as_deref(),
                settings.resend_api_key.as_deref(),
            ) {
                let message = self.compose_notification(user_id, &alert, price, to).await;
                match self.mailer.send(resend_key, &message).await {
                    Ok(()) => {
                        alert.notification_sent = true;
                        if let Err(e) = self.store.update_alert(&alert).await {
                            warn!(
                                "alerts: could not record notification for {}: {e}",
                                alert.symbol
                            );
                        }
                        summary.notified += 1;
                    }
                    Err(e) => {
                        // Delivery failure never reverts the trigger.
                        warn!("alerts: notification for {} failed: {e}", alert.symbol);
                    }
                }
            }
        }
        Ok(())
    }

    async fn compose_notification(
        &self,
        user_id: &str,
        alert: &PriceAlert,
        price: f64,
        to: &str,
    ) -> EmailMessage {
        let target = match alert.alert_type {
            AlertType::PriceAbove | AlertType::PriceBelow => {
                format!("${:.2}", alert.target_value)
            }
            AlertType::PctChangeUp | AlertType::PctChangeDown => {
                format!("{}%", alert.target_value)
            }
        };

        // Percent change since the entry was added, when a baseline exists.
        let change_since_added = match self.store.get_watchlist_entry(user_id, alert.entry_id).await
        {
            Ok(Some(entry)) => entry
                .added_price
                .filter(|added| *added > 0.0)
                .map(|added| (price - added) / added * 100.0),
            _ => None,
        };

        let triggered_at = alert.triggered_at.unwrap_or_else(|| self.clock.now());
        let subject = format!("Price alert: {} {} {target}", alert.symbol, alert.alert_type);

        let mut html = format!(
            "<h2>{} alert triggered</h2>\
             <p>Condition: {} {target}</p>\
             <p>Current price: ${price:.2}</p>",
            alert.symbol, alert.alert_type
        );
        if let Some(change) = change_since_added {
            html.push_str(&format!("<p>Change since added: {change:+.2}%</p>"));
        }
        html.push_str(&format!(
            "<p>Triggered at {}</p>",
            triggered_at.format("%Y-%m-%d %H:%M UTC")
        ));

        EmailMessage {
            from: ALERT_EMAIL_FROM.to_string(),
            to: vec![to.to_string()],
            subject,
            html,
        }
    }
}
