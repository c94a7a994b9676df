use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::traits::MarketDataProvider;
use crate::errors::CoreError;
use crate::models::market::{Quote, SymbolProfile};

const BASE_URL: &str = "https://financialmodelingprep.com/api/v3";

/// Financial Modeling Prep client for company profiles and batch quotes.
///
/// - **Requires**: per-user API key (stored in portfolio settings).
/// - **Batch limit**: 50 symbols per request on the free tier.
/// - **Response shape**: JSON array of objects; any field may be absent,
///   so every wire field is defaulted.
pub struct FmpProvider {
    client: Client,
}

impl FmpProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

impl Default for FmpProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ── FMP API response types ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FmpProfile {
    #[serde(default)]
    symbol: String,
    #[serde(rename = "companyName", default)]
    company_name: String,
    #[serde(default)]
    price: f64,
    #[serde(rename = "previousClose", default)]
    previous_close: f64,
    #[serde(default)]
    industry: String,
    #[serde(default)]
    sector: String,
    #[serde(rename = "marketCap", alias = "mktCap", default)]
    market_cap: f64,
    #[serde(rename = "changesPercentage", default)]
    changes_percentage: f64,
}

impl From<FmpProfile> for SymbolProfile {
    fn from(p: FmpProfile) -> Self {
        SymbolProfile {
            symbol: p.symbol.to_uppercase(),
            company_name: p.company_name,
            price: p.price,
            previous_close: p.previous_close,
            industry: p.industry,
            sector: p.sector,
            market_cap: p.market_cap,
            changes_percentage: p.changes_percentage,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FmpQuote {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    price: f64,
    #[serde(rename = "previousClose", default)]
    previous_close: f64,
    #[serde(rename = "changesPercentage", default)]
    changes_percentage: f64,
}

impl From<FmpQuote> for Quote {
    fn from(q: FmpQuote) -> Self {
        Quote {
            symbol: q.symbol.to_uppercase(),
            price: q.price,
            previous_close: q.previous_close,
            changes_percentage: q.changes_percentage,
        }
    }
}

impl FmpProvider {
    async fn get_array<T: serde::de::DeserializeOwned>(
        &self,
        api_key: &str,
        endpoint: &str,
        symbols: &str,
    ) -> Result<Vec<T>, CoreError> {
        let url = format!("{BASE_URL}/{endpoint}/{symbols}");
        let response = self
            .client
            .get(&url)
            .query(&[("apikey", api_key)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Api {
                provider: "FMP".into(),
                message: format!("{endpoint} request for {symbols} returned {status}"),
            });
        }

        response.json().await.map_err(|e| CoreError::Api {
            provider: "FMP".into(),
            message: format!("failed to parse {endpoint} response for {symbols}: {e}"),
        })
    }
}

#[async_trait]
impl MarketDataProvider for FmpProvider {
    fn name(&self) -> &str {
        "FMP"
    }

    async fn fetch_profile(
        &self,
        api_key: &str,
        symbol: &str,
    ) -> Result<Option<SymbolProfile>, CoreError> {
        let profiles: Vec<FmpProfile> = self
            .get_array(api_key, "profile", &symbol.to_uppercase())
            .await?;
        Ok(profiles.into_iter().next().map(SymbolProfile::from))
    }

    async fn fetch_profiles(
        &self,
        api_key: &str,
        symbols: &[String],
    ) -> Result<Vec<SymbolProfile>, CoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let joined = join_symbols(symbols);
        let profiles: Vec<FmpProfile> = self.get_array(api_key, "profile", &joined).await?;
        Ok(profiles.into_iter().map(SymbolProfile::from).collect())
    }

    async fn fetch_quotes(
        &self,
        api_key: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, CoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let joined = join_symbols(symbols);
        let quotes: Vec<FmpQuote> = self.get_array(api_key, "quote", &joined).await?;
        Ok(quotes.into_iter().map(Quote::from).collect())
    }
}

fn join_symbols(symbols: &[String]) -> String {
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .collect::<Vec<_>>()
        .join(",")
}
