use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use log::{debug, warn};

use crate::clock::Clock;
use crate::models::market::{Quote, SymbolProfile, TtlCache};
use crate::providers::traits::MarketDataProvider;

/// Quotes go stale fast; company metadata barely changes.
pub const QUOTE_TTL_SECS: i64 = 60;
pub const PROFILE_TTL_SECS: i64 = 24 * 60 * 60;

/// Documented provider batch limit.
pub const MAX_SYMBOLS_PER_REQUEST: usize = 50;

/// Pacing between single-symbol requests after a batch downgrade.
pub const PROFILE_FALLBACK_DELAY_MS: u64 = 200;

/// Caching client for symbol profile and quote lookups.
///
/// Owns two independent caches (profile: long TTL, quote: short TTL) and an
/// injected clock — never a process-wide singleton, so tests control time
/// and isolate cache state per instance. Every lookup is best-effort: a
/// provider failure yields `None` / partial results, never an error to the
/// caller. Caches grow without bound beyond lazy expiry-on-read (known
/// limitation for long-lived processes).
pub struct MarketDataService {
    provider: Arc<dyn MarketDataProvider>,
    clock: Arc<dyn Clock>,
    profiles: Mutex<TtlCache<SymbolProfile>>,
    quotes: Mutex<TtlCache<Quote>>,
}

impl MarketDataService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            profiles: Mutex::new(TtlCache::new(Duration::seconds(PROFILE_TTL_SECS))),
            quotes: Mutex::new(TtlCache::new(Duration::seconds(QUOTE_TTL_SECS))),
        }
    }

    /// Company profile for one symbol: cache-first, then the provider.
    ///
    /// `None` means "enrichment unavailable this call" (no data, non-2xx,
    /// network failure) — callers must never treat it as fatal.
    pub async fn lookup_symbol(&self, api_key: &str, symbol: &str) -> Option<SymbolProfile> {
        let key = symbol.trim().to_uppercase();
        if key.is_empty() {
            return None;
        }

        if let Some(profile) = lock(&self.profiles).get(&key, self.clock.now()) {
            return Some(profile);
        }

        match self.provider.fetch_profile(api_key, &key).await {
            Ok(Some(profile)) => {
                lock(&self.profiles).insert(&key, profile.clone(), self.clock.now());
                Some(profile)
            }
            Ok(None) => {
                debug!("market data: no profile for {key}");
                None
            }
            Err(e) => {
                warn!("market data: profile lookup for {key} failed: {e}");
                None
            }
        }
    }

    /// Current quotes for `symbols`: cache-first, cache misses fetched in
    /// batches of at most [`MAX_SYMBOLS_PER_REQUEST`]. A failed batch is
    /// skipped silently — its symbols simply have no quote this call, and
    /// the partial map is returned.
    pub async fn fetch_quotes(&self, api_key: &str, symbols: &[String]) -> HashMap<String, Quote> {
        let mut results = HashMap::new();
        let mut misses: Vec<String> = Vec::new();

        {
            let now = self.clock.now();
            let mut cache = lock(&self.quotes);
            for symbol in symbols {
                let key = symbol.trim().to_uppercase();
                if key.is_empty() || results.contains_key(&key) || misses.contains(&key) {
                    continue;
                }
                match cache.get(&key, now) {
                    Some(quote) => {
                        results.insert(key, quote);
                    }
                    None => misses.push(key),
                }
            }
        }

        for batch in misses.chunks(MAX_SYMBOLS_PER_REQUEST) {
            match self.provider.fetch_quotes(api_key, batch).await {
                Ok(quotes) => {
                    let now = self.clock.now();
                    let mut cache = lock(&self.quotes);
                    for quote in quotes {
                        cache.insert(&quote.symbol, quote.clone(), now);
                        results.insert(quote.symbol.clone(), quote);
                    }
                }
                Err(e) => {
                    warn!(
                        "market data: quote batch of {} symbols failed: {e}",
                        batch.len()
                    );
                }
            }
        }

        results
    }

    /// Profiles for many symbols with incremental progress reporting.
    ///
    /// Optimistically uses the multi-symbol endpoint; the first failed or
    /// empty batch permanently downgrades the rest of the call to
    /// one-symbol-at-a-time, paced [`PROFILE_FALLBACK_DELAY_MS`] apart to
    /// respect provider rate limits. `progress` receives
    /// (symbols handled, total) after each cache hit, batch, or single
    /// lookup. Symbols the provider has no data for are counted as handled
    /// and omitted from the result.
    pub async fn fetch_profiles_batched(
        &self,
        api_key: &str,
        symbols: &[String],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Vec<SymbolProfile> {
        let mut remaining: Vec<String> = Vec::new();
        for symbol in symbols {
            let key = symbol.trim().to_uppercase();
            if !key.is_empty() && !remaining.contains(&key) {
                remaining.push(key);
            }
        }
        let total = remaining.len();

        let mut results: Vec<SymbolProfile> = Vec::new();
        let mut handled = 0;

        {
            let now = self.clock.now();
            let mut cache = lock(&self.profiles);
            remaining.retain(|key| match cache.get(key, now) {
                Some(profile) => {
                    results.push(profile);
                    handled += 1;
                    false
                }
                None => true,
            });
        }
        if handled > 0 {
            progress(handled, total);
        }

        let mut batched = true;
        let mut index = 0;
        while index < remaining.len() {
            if batched {
                let end = (index + MAX_SYMBOLS_PER_REQUEST).min(remaining.len());
                let batch = &remaining[index..end];
                match self.provider.fetch_profiles(api_key, batch).await {
                    Ok(profiles) if !profiles.is_empty() => {
                        let now = self.clock.now();
                        let mut cache = lock(&self.profiles);
                        for profile in profiles {
                            cache.insert(&profile.symbol, profile.clone(), now);
                            results.push(profile);
                        }
                        handled += batch.len();
                        progress(handled, total);
                        index = end;
                    }
                    Ok(_) => {
                        debug!("market data: empty profile batch; switching to single lookups");
                        batched = false;
                    }
                    Err(e) => {
                        warn!("market data: profile batch failed ({e}); switching to single lookups");
                        batched = false;
                    }
                }
            } else {
                tokio::time::sleep(std::time::Duration::from_millis(PROFILE_FALLBACK_DELAY_MS))
                    .await;
                let key = &remaining[index];
                match self.provider.fetch_profile(api_key, key).await {
                    Ok(Some(profile)) => {
                        lock(&self.profiles).insert(key, profile.clone(), self.clock.now());
                        results.push(profile);
                    }
                    Ok(None) => debug!("market data: no profile for {key}"),
                    Err(e) => warn!("market data: profile lookup for {key} failed: {e}"),
                }
                handled += 1;
                progress(handled, total);
                index += 1;
            }
        }

        results
    }
}

/// Lock a cache, recovering from poisoning — cached market data is safe to
/// keep serving after a panicked writer.
fn lock<T>(cache: &Mutex<TtlCache<T>>) -> MutexGuard<'_, TtlCache<T>> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}
