//! Parsing of the short free-text formats users type: product captions,
//! prices and stock command arguments.
use crate::model::StockReason;
use once_cell::sync::Lazy;
use regex::Regex;

static SKU_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2,8}\d{1,6}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCaption {
    pub sku: String,
    pub name: String,
    pub price: f64,
}

pub fn is_sku(token: &str) -> bool {
    SKU_RE.is_match(token.trim())
}

/// `"LCST08 Lacoste Polo 450"` or `"LCST08 | Lacoste Polo | 450"`.
pub fn parse_caption(text: &str) -> Option<ParsedCaption> {
    let text = text.trim();
    let (sku, name, price) = if text.contains('|') {
        let parts: Vec<&str> = text.split('|').map(str::trim).collect();
        let [sku, name, price] = parts.as_slice() else {
            return None;
        };
        (sku.to_string(), name.to_string(), parse_price(price)?)
    } else {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < 3 {
            return None;
        }
        let price = parse_price(tokens[tokens.len() - 1])?;
        let name = tokens[1..tokens.len() - 1].join(" ");
        (tokens[0].to_string(), name, price)
    };

    if !is_sku(&sku) || name.is_empty() {
        return None;
    }
    Some(ParsedCaption {
        sku: sku.to_uppercase(),
        name,
        price,
    })
}

/// Decimal separators are guessed: with both `.` and `,` present the last one
/// is decimal; a lone separator followed by exactly three digits groups thousands.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('₺')
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    if !cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) => {
            let (decimal, group) = if dot > comma { ('.', ',') } else { (',', '.') };
            cleaned.replace(group, "").replace(decimal, ".")
        }
        (Some(pos), None) | (None, Some(pos)) => {
            let sep = cleaned[pos..].chars().next().unwrap_or('.');
            let occurrences = cleaned.matches(sep).count();
            let decimals = cleaned.len() - pos - 1;
            if occurrences > 1 || decimals == 3 {
                cleaned.replace(sep, "")
            } else {
                cleaned.replace(sep, ".")
            }
        }
        (None, None) => cleaned,
    };

    let value: f64 = normalized.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockArgs {
    pub sku: String,
    pub delta: i64,
    pub reason: StockReason,
}

/// `/stock <SKU> <±N> [reason]`. Without a reason, negative deltas are sales
/// and positive ones restocks.
pub fn parse_stock_args(args: &str) -> Option<StockArgs> {
    let mut tokens = args.split_whitespace();
    let sku = tokens.next().filter(|t| is_sku(t))?.to_uppercase();
    let delta: i64 = tokens.next()?.trim_start_matches('+').parse().ok()?;
    if delta == 0 {
        return None;
    }
    let reason = match tokens.next() {
        Some(raw) => StockReason::parse(raw)?,
        None if delta < 0 => StockReason::Sale,
        None => StockReason::Restock,
    };
    if tokens.next().is_some() {
        return None;
    }
    Some(StockArgs { sku, delta, reason })
}
