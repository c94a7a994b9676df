use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::warn;

use super::parser::parse_broker_csv;
use crate::models::position::{merge_breakdown, AccountBreakdown, Position};

/// A file that failed to parse. Non-fatal: the rest of the batch proceeds.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportError {
    /// Name of the file as supplied by the caller.
    pub file: String,
    pub message: String,
}

/// Result of aggregating a batch of broker exports.
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    /// Merged positions, sorted by current value descending.
    pub positions: Vec<Position>,

    /// Total cash-equivalent balance across the batch.
    pub cash_balance: f64,

    /// Cash attributed per account.
    pub cash_accounts: Vec<AccountBreakdown>,

    /// Per-file parse failures.
    pub errors: Vec<ImportError>,

    /// Number of files in the batch, including failed ones.
    pub file_count: usize,
}

/// Parse and merge a batch of broker exports, one `(name, contents)` pair
/// per file.
///
/// Positions are merged by symbol: shares, value, and cost basis add up;
/// the highest price across duplicates wins; account breakdowns fold
/// together by account name. The merge is order-independent — importing
/// `[A, B]` and `[B, A]` produces identical output.
pub fn aggregate_files(files: &[(String, String)]) -> ImportOutcome {
    let mut merged: HashMap<String, Position> = HashMap::new();
    let mut outcome = ImportOutcome {
        file_count: files.len(),
        ..ImportOutcome::default()
    };

    for (name, contents) in files {
        match parse_broker_csv(contents) {
            Ok(parsed) => {
                for position in parsed.positions {
                    match merged.entry(position.symbol.clone()) {
                        Entry::Occupied(mut existing) => existing.get_mut().merge(&position),
                        Entry::Vacant(slot) => {
                            slot.insert(position);
                        }
                    }
                }
                outcome.cash_balance += parsed.cash_balance;
                for cash in &parsed.cash_accounts {
                    merge_breakdown(&mut outcome.cash_accounts, cash);
                }
            }
            Err(e) => {
                warn!("import: skipping file '{name}': {e}");
                outcome.errors.push(ImportError {
                    file: name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    let mut positions: Vec<Position> = merged.into_values().collect();
    for position in &mut positions {
        position.accounts.sort_by(|a, b| a.account.cmp(&b.account));
    }
    positions.sort_by(|a, b| {
        b.current_value
            .partial_cmp(&a.current_value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    outcome.positions = positions;

    outcome
        .cash_accounts
        .sort_by(|a, b| a.account.cmp(&b.account));
    outcome
}
