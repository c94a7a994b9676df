use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Company profile for a symbol, as returned by the market-data provider.
/// Every field may be absent on the wire; absent fields default to empty
/// string / zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolProfile {
    pub symbol: String,
    pub company_name: String,
    pub price: f64,
    pub previous_close: f64,
    pub industry: String,
    pub sector: String,
    pub market_cap: f64,
    pub changes_percentage: f64,
}

/// Point-in-time quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub previous_close: f64,
    pub changes_percentage: f64,
}

/// A cached value with its expiry instant.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub expires_at: DateTime<Utc>,
}

/// Expiring symbol-keyed cache.
///
/// Keys are uppercased symbols. `get` returns data only while the entry is
/// fresh and evicts expired entries on read; there is no other eviction, so
/// a long-lived cache grows with the distinct-symbol set (known limitation).
/// Time is always passed in, never read from the system clock, so tests
/// control expiry deterministically.
#[derive(Debug)]
pub struct TtlCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Fresh data for `symbol`, or `None`. Expired entries are removed.
    pub fn get(&mut self, symbol: &str, now: DateTime<Utc>) -> Option<T> {
        let key = symbol.to_uppercase();
        match self.entries.get(&key) {
            Some(entry) if now < entry.expires_at => Some(entry.data.clone()),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Cache `data` for `symbol`, expiring one TTL after `now`.
    pub fn insert(&mut self, symbol: &str, data: T, now: DateTime<Utc>) {
        self.entries.insert(
            symbol.to_uppercase(),
            CacheEntry {
                data,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Number of entries currently held (fresh or not yet evicted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
