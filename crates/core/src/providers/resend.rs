use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::traits::{EmailMessage, EmailSender};
use crate::errors::CoreError;

const API_URL: &str = "https://api.resend.com/emails";

/// Resend email client. Delivery succeeds iff the API answers 2xx;
/// everything else surfaces as an API error for the caller to log and
/// move past.
pub struct ResendMailer {
    client: Client,
}

impl ResendMailer {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

impl Default for ResendMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailSender for ResendMailer {
    fn name(&self) -> &str {
        "Resend"
    }

    async fn send(&self, api_key: &str, message: &EmailMessage) -> Result<(), CoreError> {
        let body = json!({
            "from": message.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
        });

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Api {
                provider: "Resend".into(),
                message: format!("delivery to {:?} returned {status}", message.to),
            });
        }
        Ok(())
    }
}
