//! Receipt formatting: one receipt record in, one printable document out.
//!
//! Pure and deterministic — no I/O, no clock reads, no state. The layout
//! mirrors the paper slip the store staff already know: big copy label,
//! short order code, menu table, total, request note, timestamps, cut.
//! Two copies are printed per receipt (merchant and customer); the copy
//! label is the only difference between them.

use chrono::{DateTime, FixedOffset, Utc};

use crate::escpos::{display_width, EscPosBuilder, PaperWidth};
use crate::receipt::{FulfillmentMode, LineItem, Receipt};

/// Rendered when a timestamp cannot be represented in the store locale.
const TIMESTAMP_PLACEHOLDER: &str = "날짜 오류";

/// Fixed currency suffix appended to formatted amounts.
const CURRENCY_SUFFIX: &str = "원";

/// Seconds east of UTC for the store locale (KST, +09:00).
const KST_OFFSET_SECS: i32 = 9 * 3600;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which copy of the receipt is being printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyLabel {
    /// 매장용 — kept by the store.
    Merchant,
    /// 고객용 — handed to the customer.
    Customer,
}

impl CopyLabel {
    pub fn text(self) -> &'static str {
        match self {
            CopyLabel::Merchant => "매장용",
            CopyLabel::Customer => "고객용",
        }
    }
}

/// A self-contained printer command sequence for one receipt copy.
/// Written to the transport as a single atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintDocument {
    bytes: Vec<u8>,
}

impl PrintDocument {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Group an amount with comma thousands separators: 1234567 → "1,234,567".
fn format_thousands(amount: i64) -> String {
    let negative = amount < 0;
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Amount with the fixed currency suffix: 100000 → "100,000원".
fn format_krw(amount: i64) -> String {
    format!("{}{}", format_thousands(amount), CURRENCY_SUFFIX)
}

fn kst(ts: &DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
    FixedOffset::east_opt(KST_OFFSET_SECS).map(|tz| ts.with_timezone(&tz))
}

/// Store-locale date: "2026. 08. 07."
fn format_date(ts: &DateTime<Utc>) -> String {
    match kst(ts) {
        Some(local) => local.format("%Y. %m. %d.").to_string(),
        None => TIMESTAMP_PLACEHOLDER.to_string(),
    }
}

/// Store-locale timestamp: "2026. 08. 07. 14:05"
fn format_datetime(ts: &DateTime<Utc>) -> String {
    match kst(ts) {
        Some(local) => local.format("%Y. %m. %d. %H:%M").to_string(),
        None => TIMESTAMP_PLACEHOLDER.to_string(),
    }
}

fn fulfillment_tag(mode: FulfillmentMode) -> &'static str {
    match mode {
        FulfillmentMode::RegularTakeout => "[포장]",
        FulfillmentMode::DineIn => "[매장]",
    }
}

fn variant_names(item: &LineItem) -> String {
    item.variants
        .iter()
        .map(|v| v.name.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

fn variant_prices(item: &LineItem) -> String {
    item.variants
        .iter()
        .map(|v| format_krw(v.price))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Label/value pair while double-width text is active: each glyph takes
/// twice its normal columns, so the pad is computed against half the paper.
fn emit_wide_pair(builder: &mut EscPosBuilder, label: &str, value: &str) {
    let columns = builder.paper().chars() / 2;
    let gap = columns.saturating_sub(display_width(label) + display_width(value));
    builder.text(label);
    for _ in 0..gap {
        builder.text(" ");
    }
    builder.text(value);
    builder.lf();
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// Render one copy of a receipt as an ESC/POS document.
///
/// Total function: any structurally valid `Receipt` produces a document,
/// and identical input always yields byte-identical output.
pub fn format(receipt: &Receipt, copy: CopyLabel) -> PrintDocument {
    let mut b = EscPosBuilder::new().with_paper(PaperWidth::Mm80);

    b.init().korean_mode();

    // Copy label
    b.center().bold(true).double_size();
    b.text(copy.text()).lf();
    b.normal_size().bold(false).left();
    b.separator();

    // Order identity and fulfillment
    b.bold(true).double_size();
    b.text(&format!("주문번호: {}", receipt.short_order_code())).lf();
    b.normal_size();
    b.text(fulfillment_tag(receipt.fulfillment)).lf();
    b.bold(false);
    b.text(&format!("포장일: {}", format_date(&receipt.created_at)))
        .lf();
    b.separator();

    // Menu table
    b.line_pair("메뉴", "수량");
    b.separator();
    for item in &receipt.line_items {
        b.bold(true);
        let names = variant_names(item);
        if names.is_empty() {
            b.text(&item.product_name).lf();
        } else {
            b.text(&format!("{} ({})", item.product_name, names)).lf();
        }
        b.bold(false);
        b.line_pair(
            &format!("  └ {}", variant_prices(item)),
            &item.quantity.to_string(),
        );
    }
    b.separator();

    // Total — recomputed from line items at render time
    b.bold(true).double_size();
    emit_wide_pair(&mut b, "총결제금액", &format_krw(receipt.total()));
    b.normal_size().bold(false);
    b.separator();

    // Request note
    b.bold(true).text("[요청사항]").lf().bold(false);
    b.text(receipt.request_note.as_deref().unwrap_or("요청사항 없음"))
        .lf();
    b.separator();

    // Trailer
    b.text(&format!("거래일시: {}", format_datetime(&receipt.created_at)))
        .lf();
    b.text(&format!("매장: {}", receipt.store_name)).lf();
    b.feed(4).cut();

    PrintDocument { bytes: b.build() }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escpos::encode_euc_kr;
    use chrono::TimeZone;

    fn sample_receipt() -> Receipt {
        Receipt::from_value(serde_json::json!({
            "_id": { "$oid": "69031625a2e64607f3e221c7" },
            "inOutStatus": "regularTakeout",
            "lineItems": [
                {
                    "productName": "대방어 모둠회",
                    "quantity": 1,
                    "productVariants": [
                        { "optionName": "중", "optionPrice": 100000 }
                    ]
                }
            ],
            "orderId": { "$oid": "69031618100968283c250d72" },
            "orderRequest": "식당 이용(고객 직접 예약)",
            "storeName": "강변상회",
            "storeId": { "$oid": "68b6b64e5c3389ba39ad18b2" },
            "printStatus": "pending",
            "_createTime": { "$date": 1761809957365i64 }
        }))
        .unwrap()
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn format_is_deterministic() {
        let receipt = sample_receipt();
        let a = format(&receipt, CopyLabel::Merchant);
        let b = format(&receipt, CopyLabel::Merchant);
        assert_eq!(a, b);
    }

    #[test]
    fn copies_differ_only_in_label() {
        let receipt = sample_receipt();
        let merchant = format(&receipt, CopyLabel::Merchant);
        let customer = format(&receipt, CopyLabel::Customer);
        assert_ne!(merchant, customer);
        assert!(contains(merchant.as_bytes(), &encode_euc_kr("매장용")));
        assert!(contains(customer.as_bytes(), &encode_euc_kr("고객용")));
        assert_eq!(merchant.len(), customer.len());
    }

    #[test]
    fn total_is_recomputed_from_line_items() {
        // One line item, quantity 1, one variant priced 100000 → 100,000원
        let receipt = sample_receipt();
        let doc = format(&receipt, CopyLabel::Merchant);
        assert!(contains(doc.as_bytes(), &encode_euc_kr("100,000원")));
    }

    #[test]
    fn renders_short_order_code_uppercased() {
        let doc = format(&sample_receipt(), CopyLabel::Merchant);
        assert!(contains(doc.as_bytes(), b"250D72"));
    }

    #[test]
    fn renders_takeout_tag() {
        let doc = format(&sample_receipt(), CopyLabel::Merchant);
        assert!(contains(doc.as_bytes(), &encode_euc_kr("[포장]")));
        assert!(!contains(doc.as_bytes(), &encode_euc_kr("[매장]")));
    }

    #[test]
    fn renders_store_timestamp_in_kst() {
        // 1761809957365 ms = 2025-10-30 07:39:17 UTC = 16:39 KST
        let doc = format(&sample_receipt(), CopyLabel::Merchant);
        assert!(contains(doc.as_bytes(), b"2025. 10. 30. 16:39"));
    }

    #[test]
    fn missing_note_renders_placeholder() {
        let mut receipt = sample_receipt();
        receipt.request_note = None;
        let doc = format(&receipt, CopyLabel::Merchant);
        assert!(contains(doc.as_bytes(), &encode_euc_kr("요청사항 없음")));
    }

    #[test]
    fn document_ends_with_cut() {
        let doc = format(&sample_receipt(), CopyLabel::Merchant);
        let bytes = doc.as_bytes();
        assert_eq!(&bytes[bytes.len() - 4..], &[0x1D, 0x56, 0x41, 0x10]);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1000), "1,000");
        assert_eq!(format_thousands(1234567), "1,234,567");
        assert_eq!(format_thousands(100000), "100,000");
    }

    #[test]
    fn krw_suffix_is_fixed_literal() {
        assert_eq!(format_krw(15000), "15,000원");
    }

    #[test]
    fn date_formats_in_store_locale() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 6, 23, 30, 0).unwrap();
        // 23:30 UTC crosses midnight in KST
        assert_eq!(format_date(&ts), "2026. 08. 07.");
        assert_eq!(format_datetime(&ts), "2026. 08. 07. 08:30");
    }

    #[test]
    fn multiple_line_items_render_in_order() {
        let mut receipt = sample_receipt();
        receipt.line_items.push(LineItem {
            product_name: "물회".into(),
            quantity: 2,
            variants: vec![crate::receipt::Variant {
                name: "소".into(),
                price: 15000,
            }],
        });
        let doc = format(&receipt, CopyLabel::Merchant);
        let bytes = doc.as_bytes();
        let first = encode_euc_kr("대방어 모둠회");
        let second = encode_euc_kr("물회");
        let first_pos = bytes
            .windows(first.len())
            .position(|w| w == &first[..])
            .unwrap();
        let second_pos = bytes
            .windows(second.len())
            .position(|w| w == &second[..])
            .unwrap();
        assert!(first_pos < second_pos);
        // Total covers both lines: 100000 + 2×15000
        assert!(contains(bytes, &encode_euc_kr("130,000원")));
    }
}
