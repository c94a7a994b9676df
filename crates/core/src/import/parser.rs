use crate::errors::CoreError;
use crate::models::position::{merge_breakdown, AccountBreakdown, Position};

/// Money-market / sweep symbols treated as cash rather than holdings.
pub const CASH_EQUIVALENT_SYMBOLS: [&str; 3] = ["SPAXX", "FDRXX", "FCASH"];

/// How many leading lines to scan for the header row. Broker exports
/// often start with preamble (export date, account notices).
const HEADER_SCAN_LINES: usize = 10;

// Column-name candidates, matched by substring against lowercased headers.
// Order matters: more specific names first ("last price" before "price").
const SYMBOL_COLUMNS: &[&str] = &["symbol"];
const SHARES_COLUMNS: &[&str] = &["quantity", "shares"];
const PRICE_COLUMNS: &[&str] = &["last price", "current price", "price"];
const VALUE_COLUMNS: &[&str] = &["current value", "market value", "value"];
const COST_COLUMNS: &[&str] = &["cost basis", "total cost", "cost"];
const ACCOUNT_COLUMNS: &[&str] = &["account name", "account number", "account"];

/// One broker export file, parsed and normalized.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    /// Holding rows, each with a single-element account breakdown.
    pub positions: Vec<Position>,

    /// Cash-equivalent balance detected in this file.
    pub cash_balance: f64,

    /// Cash attributed per account.
    pub cash_accounts: Vec<AccountBreakdown>,
}

/// Parse one broker CSV export.
///
/// The header row is located heuristically within the first
/// [`HEADER_SCAN_LINES`] lines; columns are matched by substring. Rows are
/// skipped (empty/TOTAL/PENDING symbols, zero shares) or diverted to the
/// cash accumulator (sweep symbols, `**` suffixes) per the rules below.
/// Returns a file-level error when no header row or no symbol column can
/// be identified — callers treat that as per-file, not batch-fatal.
pub fn parse_broker_csv(text: &str) -> Result<ParsedFile, CoreError> {
    let lines: Vec<&str> = text.lines().collect();

    let header_idx = lines
        .iter()
        .take(HEADER_SCAN_LINES)
        .position(|line| is_header_line(&line.to_lowercase()))
        .ok_or_else(|| {
            CoreError::Csv(format!(
                "no recognizable header row in the first {HEADER_SCAN_LINES} lines"
            ))
        })?;

    let headers: Vec<String> = split_csv_line(lines[header_idx])
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let symbol_idx = column_index(&headers, SYMBOL_COLUMNS)
        .ok_or_else(|| CoreError::Csv("no symbol column in header row".into()))?;
    let shares_idx = column_index(&headers, SHARES_COLUMNS);
    let price_idx = column_index(&headers, PRICE_COLUMNS);
    let value_idx = column_index(&headers, VALUE_COLUMNS);
    let cost_idx = column_index(&headers, COST_COLUMNS);
    let account_idx = column_index(&headers, ACCOUNT_COLUMNS);

    let mut parsed = ParsedFile::default();

    for line in &lines[header_idx + 1..] {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);

        let symbol = match fields.get(symbol_idx) {
            Some(raw) => raw.trim().to_uppercase(),
            None => continue,
        };
        if symbol.is_empty() || symbol.starts_with("TOTAL") || symbol.contains("PENDING") {
            continue;
        }

        let shares = numeric_field(&fields, shares_idx);
        let price = numeric_field(&fields, price_idx);
        let value = numeric_field(&fields, value_idx);
        let cost = numeric_field(&fields, cost_idx);
        let account = account_idx
            .and_then(|idx| fields.get(idx))
            .map(|a| a.trim().to_string())
            .unwrap_or_default();

        // Cash sweeps are checked before the zero-share skip: some brokers
        // report them with a value but no share count.
        if is_cash_equivalent(&symbol) {
            let amount = if value != 0.0 { value } else { shares };
            parsed.cash_balance += amount;
            merge_breakdown(
                &mut parsed.cash_accounts,
                &AccountBreakdown::new(account, shares, amount),
            );
            continue;
        }

        if shares == 0.0 {
            continue;
        }

        let current_value = if value != 0.0 { value } else { shares * price };
        parsed.positions.push(Position {
            symbol,
            shares,
            current_price: price,
            current_value,
            cost_basis: cost,
            category: None,
            tier: None,
            accounts: vec![AccountBreakdown::new(account, shares, current_value)],
        });
    }

    Ok(parsed)
}

/// Split one CSV line with the broker-export grammar: comma-separated,
/// double quote toggles field-literal mode (quotes stripped, embedded
/// commas preserved). Escaped quotes are not supported by the format.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Parse a broker-formatted number: `$`, thousands separators, and
/// whitespace are stripped; anything that still fails to parse
/// (`n/a`, `--`, empty) is 0. Trailing junk after a valid numeric prefix
/// is tolerated.
pub fn clean_number(field: &str) -> f64 {
    let cleaned: String = field
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if let Ok(value) = cleaned.parse::<f64>() {
        return value;
    }

    // Longest numeric prefix, e.g. "19.99*" → 19.99.
    for end in (1..cleaned.len()).rev() {
        if !cleaned.is_char_boundary(end) {
            continue;
        }
        if let Ok(value) = cleaned[..end].parse::<f64>() {
            return value;
        }
    }
    0.0
}

fn numeric_field(fields: &[String], idx: Option<usize>) -> f64 {
    idx.and_then(|i| fields.get(i))
        .map(|f| clean_number(f))
        .unwrap_or(0.0)
}

fn is_header_line(lower: &str) -> bool {
    (lower.contains("symbol") && (lower.contains("quantity") || lower.contains("shares")))
        || (lower.contains("account") && (lower.contains("symbol") || lower.contains("description")))
}

fn is_cash_equivalent(symbol: &str) -> bool {
    CASH_EQUIVALENT_SYMBOLS.contains(&symbol) || symbol.contains("**")
}

/// First header whose text contains one of `candidates`, tried in
/// candidate order so specific names win over generic ones.
fn column_index(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|candidate| headers.iter().position(|h| h.contains(candidate)))
}
