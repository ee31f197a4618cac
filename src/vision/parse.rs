//! Turning free-form model replies into typed analyses.
//!
//! The reply is scanned for its first balanced `{...}` block. Each field is
//! then read on its own: an absent or mistyped field becomes `None` (or is
//! skipped, for list entries) without discarding the rest of the record.
use crate::caption::parse_price;
use crate::model::{
    Confidence, LedgerAnalysis, LedgerEntry, PaymentType, ProductAnalysis, ReceiptAnalysis,
    ReceiptItem, SizeType,
};
use serde_json::{Map, Value};

/// First balanced `{...}` substring, ignoring braces inside JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(extract_json_object(text)?).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(obj, keys)? {
        Value::String(s) => {
            let s = s.trim();
            let placeholder = s.is_empty()
                || s.eq_ignore_ascii_case("null")
                || s.eq_ignore_ascii_case("unknown")
                || s.eq_ignore_ascii_case("n/a");
            (!placeholder).then(|| s.to_string())
        }
        _ => None,
    }
}

fn num_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    match field(obj, keys)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "evet" => Some(true),
            "false" | "no" | "hayır" | "hayir" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn list_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Vec<&'a Map<String, Value>> {
    match field(obj, keys) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Raw product attributes; category and size rules are applied by the caller.
pub fn parse_product(reply: &str) -> Option<ProductAnalysis> {
    let obj = object(reply)?;
    Some(ProductAnalysis {
        brand: str_field(&obj, &["brand"]),
        product_type: str_field(&obj, &["productType", "product_type", "type"]),
        color: str_field(&obj, &["color", "colour"]),
        suggested_name: str_field(&obj, &["suggestedName", "suggested_name", "name"]),
        suggested_category: str_field(&obj, &["suggestedCategory", "suggested_category", "category"]),
        suggested_slug: str_field(&obj, &["suggestedSlug", "suggested_slug", "slug"]),
        auto_sku: None,
        confidence: str_field(&obj, &["confidence"])
            .and_then(|c| Confidence::parse(&c))
            .unwrap_or_default(),
        is_packaging: bool_field(&obj, &["isPackaging", "is_packaging"]).unwrap_or(false),
        size_type: str_field(&obj, &["sizeType", "size_type"]).and_then(|s| SizeType::parse(&s)),
    })
}

fn ledger_entry(obj: &Map<String, Value>) -> Option<LedgerEntry> {
    let amount = num_field(obj, &["amount", "tutar"])?;
    Some(LedgerEntry {
        description: str_field(obj, &["description", "aciklama"]).unwrap_or_default(),
        amount,
        payment_type: str_field(obj, &["paymentType", "payment_type"])
            .and_then(|p| PaymentType::parse(&p)),
    })
}

/// A ledger page with its summary recomputed from the parsed lines.
pub fn parse_ledger(reply: &str) -> Option<LedgerAnalysis> {
    let obj = object(reply)?;
    let incomes: Vec<LedgerEntry> = list_field(&obj, &["incomes", "income"])
        .into_iter()
        .filter_map(ledger_entry)
        .collect();
    let expenses: Vec<LedgerEntry> = list_field(&obj, &["expenses", "expense"])
        .into_iter()
        .filter_map(ledger_entry)
        .collect();
    if incomes.is_empty() && expenses.is_empty() {
        return None;
    }
    Some(LedgerAnalysis::new(str_field(&obj, &["date"]), incomes, expenses))
}

fn receipt_item(obj: &Map<String, Value>) -> Option<ReceiptItem> {
    let description = str_field(obj, &["description", "name"]);
    let sku = str_field(obj, &["sku", "code"]);
    if description.is_none() && sku.is_none() {
        return None;
    }
    let quantity = num_field(obj, &["quantity", "qty"])
        .map(|q| q.round() as i64)
        .filter(|q| *q > 0)
        .unwrap_or(1);
    Some(ReceiptItem {
        description: description.unwrap_or_default(),
        sku,
        quantity,
        amount: num_field(obj, &["amount", "price"]),
    })
}

pub fn parse_receipt(reply: &str) -> Option<ReceiptAnalysis> {
    let obj = object(reply)?;
    let items: Vec<ReceiptItem> = list_field(&obj, &["items"])
        .into_iter()
        .filter_map(receipt_item)
        .collect();
    if items.is_empty() {
        return None;
    }
    Some(ReceiptAnalysis {
        items,
        total: num_field(&obj, &["total"]),
    })
}
