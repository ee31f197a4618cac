//! Instructions sent alongside each image.

pub const DETECT_TYPE: &str = "Classify this photo for a clothing shop's back office. \
Answer with exactly one lowercase word and nothing else:\n\
product - a garment, accessory, shoe, bag or its packaging\n\
ledger - a handwritten or printed daily cash book page with incomes and expenses\n\
receipt - a sales receipt, invoice or POS slip listing sold items\n\
other - anything else";

pub const PRODUCT: &str = r#"You are cataloguing products for a Turkish menswear shop.
Look at the photo and reply with ONLY a JSON object, no prose, using these keys:
{
  "brand": "brand name if a logo or label is visible, otherwise null",
  "productType": "garment type in Turkish, e.g. Polo Tişört, Gömlek, Pantolon, Kemer",
  "color": "main colour in Turkish",
  "suggestedName": "short shop title: brand + colour + type, in Turkish",
  "suggestedCategory": "Üst Giyim, Alt Giyim or Aksesuar",
  "confidence": "high, medium or low",
  "isPackaging": true if the photo shows a shopping bag or box rather than a product,
  "sizeType": "letter for S/M/L sizes, numeric for waist sizes, standard for one-size items"
}
Use null for anything you cannot see."#;

pub const LEDGER: &str = r#"This is one page of a shop's daily cash book (Turkish).
Extract every line and reply with ONLY a JSON object, no prose:
{
  "date": "page date as YYYY-MM-DD, or null",
  "incomes": [ { "description": "text", "amount": 0, "paymentType": "KK, N or AH" } ],
  "expenses": [ { "description": "text", "amount": 0 } ]
}
KK means credit card, N means cash, AH means open account. Leave paymentType null when the line has no marker.
Amounts are plain numbers without currency symbols."#;

pub const RECEIPT: &str = r#"This is a sales receipt from a clothing shop.
List the sold items and reply with ONLY a JSON object, no prose:
{
  "items": [ { "description": "item text", "sku": "product code if printed, else null", "quantity": 1, "amount": 0 } ],
  "total": 0
}
Amounts are plain numbers without currency symbols."#;
