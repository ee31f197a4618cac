//! HTML bodies of the messages the bot sends. User and model supplied text is
//! always escaped before it is embedded.
use crate::model::{LedgerAnalysis, LedgerEntry, ProductDraft, ReceiptAnalysis};
use teloxide::utils::html::escape;

pub const HELP: &str = "<b>Stock bot</b>\n\
Send a product photo (or an album) to create a product. A caption like \
<code>LCST08 Lacoste Polo 450</code> fills SKU, name and price.\n\
Send a ledger page or a receipt photo to record it.\n\n\
<b>Commands</b>\n\
/confirm - save the pending draft\n\
/cancel - discard the pending draft\n\
/set &lt;field&gt; &lt;value&gt; - edit the draft (sku, name, price, brand, color, category, stock)\n\
/stock &lt;SKU&gt; &lt;±N&gt; [sale|restock|adjustment|return] - adjust stock\n\
/addphotos &lt;SKU&gt; - add photos to an existing product\n\
/ping - health check";

pub const NOTHING_PENDING: &str = "Nothing is waiting for confirmation.";
pub const CANCELLED: &str = "Cancelled.";
pub const INTERNAL_ERROR: &str = "Something went wrong on our side. Please try again.";
pub const TEXT_HINT: &str = "Send a photo to start, or /help for the command list.";
pub const VISION_UNAVAILABLE: &str =
    "Could not analyse the photo. Fill the draft in with /set or a caption, then /confirm.";

pub fn money(amount: f64) -> String {
    format!("{:.2} TL", amount)
}

fn value(v: Option<&str>) -> String {
    match v {
        Some(v) if !v.trim().is_empty() => escape(v),
        _ => "<i>-</i>".to_string(),
    }
}

pub fn product_draft(draft: &ProductDraft) -> String {
    let mut out = String::from("<b>New product</b>\n");
    let sku = match (&draft.sku, draft.sku_minted) {
        (Some(sku), true) => format!("{} <i>(auto)</i>", escape(sku)),
        (sku, _) => value(sku.as_deref()),
    };
    out.push_str(&format!("SKU: {}\n", sku));
    out.push_str(&format!("Name: {}\n", value(draft.name.as_deref())));
    out.push_str(&format!(
        "Price: {}\n",
        draft.price.map(money).unwrap_or_else(|| value(None))
    ));
    out.push_str(&format!("Brand: {}\n", value(draft.brand.as_deref())));
    out.push_str(&format!("Color: {}\n", value(draft.color.as_deref())));
    out.push_str(&format!("Category: {}\n", value(draft.category.as_deref())));
    if let Some(size_type) = draft.size_type {
        out.push_str(&format!("Sizes: {}\n", size_type.sizes().join(", ")));
    }
    out.push_str(&format!("Stock: {}\n", draft.stock));
    out.push_str(&format!(
        "Media: {} photo(s), {} video(s)\n",
        draft.photos.len(),
        draft.videos.len()
    ));

    let missing = draft.missing_fields();
    if missing.is_empty() {
        out.push_str("\n/confirm to save, /set to edit, /cancel to discard.");
    } else {
        out.push_str(&format!(
            "\nMissing: <b>{}</b>. Use /set or send a caption.",
            missing.join(", ")
        ));
    }
    out
}

fn ledger_lines(out: &mut String, title: &str, entries: &[LedgerEntry]) {
    if entries.is_empty() {
        return;
    }
    out.push_str(&format!("\n<b>{}</b>\n", title));
    for e in entries {
        let tag = e
            .payment_type
            .map(|p| format!(" [{}]", p.label()))
            .unwrap_or_default();
        out.push_str(&format!("• {} {}{}\n", escape(&e.description), money(e.amount), tag));
    }
}

pub fn ledger(analysis: &LedgerAnalysis) -> String {
    let mut out = format!(
        "<b>Ledger</b> {}\n",
        analysis.date.as_deref().map(escape).unwrap_or_default()
    );
    ledger_lines(&mut out, "Incomes", &analysis.incomes);
    ledger_lines(&mut out, "Expenses", &analysis.expenses);
    let s = &analysis.summary;
    out.push_str(&format!(
        "\nCard: {}\nCash: {}\nTotal income: {}\nTotal expense: {}\n<b>Net: {}</b>\n",
        money(s.credit_card),
        money(s.cash),
        money(s.total_income),
        money(s.total_expense),
        money(s.net)
    ));
    out.push_str("\n/confirm to record, /cancel to discard.");
    out
}

pub fn receipt(analysis: &ReceiptAnalysis) -> String {
    let mut out = String::from("<b>Receipt</b>\n");
    for item in &analysis.items {
        let sku = item
            .sku
            .as_deref()
            .map(|s| format!(" <code>{}</code>", escape(s)))
            .unwrap_or_default();
        let amount = item.amount.map(|a| format!(" {}", money(a))).unwrap_or_default();
        out.push_str(&format!(
            "• {} x{}{}{}\n",
            escape(&item.description),
            item.quantity,
            sku,
            amount
        ));
    }
    if let Some(total) = analysis.total {
        out.push_str(&format!("Total: {}\n", money(total)));
    }
    out.push_str("\n/confirm to deduct the items from stock, /cancel to discard.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LedgerEntry, PaymentType, ReceiptItem, SizeType};

    #[test]
    fn draft_escapes_and_lists_missing() {
        let draft = ProductDraft {
            sku: Some("GNL01".into()),
            sku_minted: true,
            brand: Some("<Acme & Co>".into()),
            size_type: Some(SizeType::Standard),
            ..ProductDraft::with_media(vec!["a".into(), "b".into()], vec![])
        };
        let text = product_draft(&draft);
        assert!(text.contains("GNL01 <i>(auto)</i>"));
        assert!(text.contains("&lt;Acme &amp; Co&gt;"));
        assert!(text.contains("Missing: <b>name, price</b>"));
        assert!(text.contains("2 photo(s)"));
        assert!(text.contains("Sizes: STD"));
    }

    #[test]
    fn complete_draft_offers_confirm() {
        let draft = ProductDraft {
            sku: Some("LCST08".into()),
            name: Some("Lacoste Polo".into()),
            price: Some(450.0),
            ..ProductDraft::with_media(vec![], vec![])
        };
        let text = product_draft(&draft);
        assert!(text.contains("450.00 TL"));
        assert!(text.contains("/confirm to save"));
        assert!(!text.contains("(auto)"));
    }

    #[test]
    fn ledger_shows_summary() {
        let analysis = LedgerAnalysis::new(
            Some("2024-05-01".into()),
            vec![LedgerEntry {
                description: "Polo".into(),
                amount: 500.0,
                payment_type: Some(PaymentType::CreditCard),
            }],
            vec![],
        );
        let text = ledger(&analysis);
        assert!(text.contains("• Polo 500.00 TL [KK]"));
        assert!(text.contains("<b>Net: 500.00 TL</b>"));
    }

    #[test]
    fn receipt_lists_items() {
        let analysis = ReceiptAnalysis {
            items: vec![ReceiptItem {
                description: "Kemer".into(),
                sku: Some("GNL03".into()),
                quantity: 2,
                amount: None,
            }],
            total: Some(300.0),
        };
        let text = receipt(&analysis);
        assert!(text.contains("• Kemer x2 <code>GNL03</code>"));
        assert!(text.contains("Total: 300.00 TL"));
    }
}
