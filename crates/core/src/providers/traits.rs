use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::market::{Quote, SymbolProfile};

/// Trait abstraction for the market-data API.
///
/// One implementation talks to the real provider; tests substitute mocks
/// with scripted prices and failure modes. The API key is passed per call
/// because each user configures their own key.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Company profile for a single symbol. `Ok(None)` when the provider
    /// has no data for the symbol.
    async fn fetch_profile(
        &self,
        api_key: &str,
        symbol: &str,
    ) -> Result<Option<SymbolProfile>, CoreError>;

    /// Company profiles for multiple symbols in one request. Providers may
    /// not support this shape for every plan; callers must be prepared to
    /// fall back to single-symbol lookups on failure or empty response.
    async fn fetch_profiles(
        &self,
        api_key: &str,
        symbols: &[String],
    ) -> Result<Vec<SymbolProfile>, CoreError>;

    /// Current quotes for up to the provider's batch limit of symbols.
    async fn fetch_quotes(
        &self,
        api_key: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, CoreError>;
}

/// An outbound email, already composed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Trait abstraction for the email provider: attempt delivery, report
/// success or failure. Delivery is always best-effort at call sites.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Human-readable name of this sender (for logs/errors).
    fn name(&self) -> &str;

    /// Attempt delivery of `message` using the given provider API key.
    async fn send(&self, api_key: &str, message: &EmailMessage) -> Result<(), CoreError>;
}
