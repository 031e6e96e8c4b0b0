//! Receipt record model and store-boundary validation.
//!
//! The remote store serves MongoDB extended JSON: identity fields arrive as
//! `{"$oid": "..."}` and timestamps as `{"$date": <epoch-ms>}`. Decoding
//! accepts both the wrapped and the plain form so fixtures and future API
//! versions keep working. Records are validated once, at the fetch boundary;
//! anything that fails validation is quarantined there and never reaches the
//! formatter.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Extended-JSON field decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum OidRepr {
    Wrapped {
        #[serde(rename = "$oid")]
        oid: String,
    },
    Plain(String),
}

fn deserialize_oid<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match OidRepr::deserialize(deserializer)? {
        OidRepr::Wrapped { oid } => Ok(oid),
        OidRepr::Plain(s) => Ok(s),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DateRepr {
    Wrapped {
        #[serde(rename = "$date")]
        date: DateInner,
    },
    Millis(i64),
    Rfc3339(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DateInner {
    Millis(i64),
    Rfc3339(String),
}

fn datetime_from_millis<E: serde::de::Error>(ms: i64) -> Result<DateTime<Utc>, E> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}")))
}

fn datetime_from_rfc3339<E: serde::de::Error>(s: &str) -> Result<DateTime<Utc>, E> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| E::custom(format!("invalid timestamp {s:?}: {e}")))
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match DateRepr::deserialize(deserializer)? {
        DateRepr::Wrapped {
            date: DateInner::Millis(ms),
        }
        | DateRepr::Millis(ms) => datetime_from_millis(ms),
        DateRepr::Wrapped {
            date: DateInner::Rfc3339(s),
        }
        | DateRepr::Rfc3339(s) => datetime_from_rfc3339(&s),
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Where the order is eaten. The backend encodes takeout as the literal
/// `regularTakeout`; every other status string is an in-store order.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FulfillmentMode {
    RegularTakeout,
    DineIn,
}

impl<'de> Deserialize<'de> for FulfillmentMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "regularTakeout" => FulfillmentMode::RegularTakeout,
            _ => FulfillmentMode::DineIn,
        })
    }
}

/// Print lifecycle of a receipt. Transitions pending → done exactly once,
/// on the store side, after a successful write to the printer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrintStatus {
    #[default]
    Pending,
    Done,
}

/// One selected option on a line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variant {
    #[serde(rename = "optionName")]
    pub name: String,
    /// KRW, minor unit (the won has no subunit in practice).
    #[serde(rename = "optionPrice")]
    pub price: i64,
}

/// One ordered product with its selected variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    #[serde(rename = "productName")]
    pub product_name: String,
    pub quantity: u32,
    #[serde(rename = "productVariants", default)]
    pub variants: Vec<Variant>,
}

impl LineItem {
    /// quantity × sum of variant prices. Derived on demand, never stored.
    pub fn line_total(&self) -> i64 {
        let variant_sum: i64 = self.variants.iter().map(|v| v.price).sum();
        i64::from(self.quantity) * variant_sum
    }
}

/// A receipt record as served by the remote store. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "_id", deserialize_with = "deserialize_oid")]
    pub id: String,
    #[serde(rename = "storeId", deserialize_with = "deserialize_oid")]
    pub store_id: String,
    #[serde(rename = "orderId", deserialize_with = "deserialize_oid")]
    pub order_id: String,
    #[serde(rename = "inOutStatus")]
    pub fulfillment: FulfillmentMode,
    #[serde(rename = "lineItems")]
    pub line_items: Vec<LineItem>,
    #[serde(rename = "orderRequest", default)]
    pub request_note: Option<String>,
    #[serde(rename = "storeName")]
    pub store_name: String,
    #[serde(rename = "_createTime", deserialize_with = "deserialize_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "printStatus", default)]
    pub print_status: PrintStatus,
}

impl Receipt {
    /// Sum of line totals. Derived on demand, never stored.
    pub fn total(&self) -> i64 {
        self.line_items.iter().map(LineItem::line_total).sum()
    }

    /// Last six characters of the order id, uppercased — the short code
    /// printed on the receipt and read back to the customer.
    pub fn short_order_code(&self) -> String {
        let chars: Vec<char> = self.order_id.chars().collect();
        let start = chars.len().saturating_sub(6);
        chars[start..].iter().collect::<String>().to_uppercase()
    }

    /// Decode and validate one record from the store.
    ///
    /// This is the only entry point for remote data: malformed records are
    /// rejected here so the formatter can stay total.
    pub fn from_value(value: serde_json::Value) -> Result<Self, StoreError> {
        let receipt: Receipt = serde_json::from_value(value)
            .map_err(|e| StoreError::MalformedRecord(e.to_string()))?;
        receipt.validate()?;
        Ok(receipt)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.id.trim().is_empty() {
            return Err(StoreError::MalformedRecord("empty receipt id".into()));
        }
        if self.order_id.trim().is_empty() {
            return Err(StoreError::MalformedRecord(format!(
                "receipt {} has no order id",
                self.id
            )));
        }
        if self.line_items.is_empty() {
            return Err(StoreError::MalformedRecord(format!(
                "receipt {} has no line items",
                self.id
            )));
        }
        for item in &self.line_items {
            if item.quantity == 0 {
                return Err(StoreError::MalformedRecord(format!(
                    "receipt {}: zero quantity on {:?}",
                    self.id, item.product_name
                )));
            }
            if item.variants.iter().any(|v| v.price < 0) {
                return Err(StoreError::MalformedRecord(format!(
                    "receipt {}: negative variant price on {:?}",
                    self.id, item.product_name
                )));
            }
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
