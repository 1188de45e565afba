use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SaleError {
    #[error("invalid sale data: {0}")]
    InvalidSaleData(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProductId(pub i64);

impl Display for ProductId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sellable product as stored in the catalog document.
///
/// The catalog schema is open past the identity/price core: any further
/// display fields land in `attributes` and round-trip verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// One stock ledger entry: on-hand quantity and unit cost for a product.
///
/// `stock` may go negative; the recording policy decides whether that is
/// acceptable (see [`SalePolicy`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    pub id: ProductId,
    pub stock: i64,
    pub cost_price: f64,
}

/// One line of an incoming sale request. The unit `price` is taken as
/// supplied by the caller and is not re-validated against the catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SaleItem {
    pub id: ProductId,
    pub quantity: i64,
    pub price: f64,
}

/// A parsed sale request: the ordered line items plus every other
/// caller-supplied top-level field, preserved for the journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRequest {
    pub items: Vec<SaleItem>,
    pub extra: Map<String, Value>,
}

impl SaleRequest {
    /// Parse a raw JSON body into a sale request.
    ///
    /// # Errors
    /// Returns [`SaleError::InvalidSaleData`] when the body is not an
    /// object, when `items` is missing or not an array, or when an element
    /// of `items` is not a well-formed sale item.
    pub fn from_value(body: Value) -> Result<Self, SaleError> {
        let Value::Object(mut fields) = body else {
            return Err(SaleError::InvalidSaleData(
                "request body MUST be a JSON object".to_string(),
            ));
        };

        let Some(raw_items) = fields.shift_remove("items") else {
            return Err(SaleError::InvalidSaleData(
                "request MUST carry an `items` array".to_string(),
            ));
        };

        if !raw_items.is_array() {
            return Err(SaleError::InvalidSaleData(
                "`items` MUST be an array of sale items".to_string(),
            ));
        }

        let items: Vec<SaleItem> = serde_json::from_value(raw_items)
            .map_err(|err| SaleError::InvalidSaleData(format!("malformed sale item: {err}")))?;

        Ok(Self { items, extra: fields })
    }

    #[must_use]
    pub fn from_items(items: Vec<SaleItem>) -> Self {
        Self { items, extra: Map::new() }
    }
}

/// One sales journal entry, exactly as persisted.
///
/// Caller-supplied fields travel in `extra` and serialize ahead of the
/// computed columns; `extra` never holds a key named like a declared
/// column, or the flattened entry would serialize the key twice and no
/// longer load. The totals default to zero on load so journals seeded
/// without them still count toward the report's sale count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub items: Vec<SaleItem>,
    #[serde(default)]
    pub total_profit: f64,
    #[serde(default)]
    pub total_revenue: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Why a sale item did not touch the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    UnknownId,
}

/// Per-item disposition of a processed sale, reported in request order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The ledger entry was found and decremented; `stock` is the
    /// post-decrement level.
    Applied { id: ProductId, stock: i64 },
    /// The item contributed nothing to the totals and the ledger was not
    /// touched.
    Skipped { id: ProductId, reason: SkipReason },
}

/// Strictness switches for sale validation.
///
/// The default policy records exactly what the caller sent: unknown ids
/// are skipped, quantities and prices are taken as supplied, and stock
/// may go negative. Each switch independently turns one leniency into a
/// hard [`SaleError::InvalidSaleData`] rejection, and every switch is
/// checked before any mutation.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SalePolicy {
    /// Reject the request when an item id matches no ledger record.
    pub reject_unknown_items: bool,
    /// Reject the request when an item quantity is less than one.
    pub require_positive_quantity: bool,
    /// Reject the request when an item price is negative.
    pub require_non_negative_price: bool,
    /// Reject the request when a decrement would drive stock below zero.
    pub forbid_negative_stock: bool,
}

/// Result of a sale-processing pass: the post-decrement ledger, the
/// journal entry to append, and the per-item outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSale {
    pub ledger: Vec<StockRecord>,
    pub record: SaleRecord,
    pub outcomes: Vec<ItemOutcome>,
}

/// Validate `request` against `policy` and apply it to a ledger snapshot.
///
/// Validation runs to completion before any mutation, so an `Err` means
/// the ledger was untouched. Matched items decrement stock by the
/// requested quantity (no floor under the default policy; the decrement
/// saturates at the `i64` bounds) and contribute
/// `quantity * (price - costPrice)` to profit and `quantity * price` to
/// revenue; unmatched items are skipped with an explicit outcome.
/// Pass-through fields land in the journal entry as sent, except any
/// named like a record column, which the computed value replaces.
///
/// # Errors
/// Returns [`SaleError::InvalidSaleData`] when a policy check fails.
pub fn process_sale(
    ledger: &[StockRecord],
    request: SaleRequest,
    policy: SalePolicy,
    timestamp: OffsetDateTime,
) -> Result<ProcessedSale, SaleError> {
    validate_items(ledger, &request.items, policy)?;

    let mut ledger = ledger.to_vec();
    let mut outcomes = Vec::with_capacity(request.items.len());
    let mut total_profit = 0.0;
    let mut total_revenue = 0.0;

    for item in &request.items {
        let Some(entry) = ledger.iter_mut().find(|record| record.id == item.id) else {
            outcomes.push(ItemOutcome::Skipped { id: item.id, reason: SkipReason::UnknownId });
            continue;
        };
        entry.stock = entry.stock.saturating_sub(item.quantity);
        let quantity = quantity_as_f64(item.quantity);
        total_profit += quantity * (item.price - entry.cost_price);
        total_revenue += quantity * item.price;
        outcomes.push(ItemOutcome::Applied { id: item.id, stock: entry.stock });
    }

    // The record owns these column names. Caller copies are dropped so
    // the flattened entry serializes each key once.
    let mut extra = request.extra;
    for column in ["items", "totalProfit", "totalRevenue", "timestamp"] {
        extra.shift_remove(column);
    }

    let record = SaleRecord {
        extra,
        items: request.items,
        total_profit,
        total_revenue,
        timestamp,
    };

    Ok(ProcessedSale { ledger, record, outcomes })
}

fn validate_items(
    ledger: &[StockRecord],
    items: &[SaleItem],
    policy: SalePolicy,
) -> Result<(), SaleError> {
    for item in items {
        if policy.require_positive_quantity && item.quantity < 1 {
            return Err(SaleError::InvalidSaleData(format!(
                "item {} quantity MUST be positive, got {}",
                item.id, item.quantity
            )));
        }
        if policy.require_non_negative_price && item.price < 0.0 {
            return Err(SaleError::InvalidSaleData(format!(
                "item {} price MUST be non-negative, got {}",
                item.id, item.price
            )));
        }
        if policy.reject_unknown_items && !ledger.iter().any(|record| record.id == item.id) {
            return Err(SaleError::InvalidSaleData(format!(
                "item {} matches no stock record",
                item.id
            )));
        }
    }

    if policy.forbid_negative_stock {
        // Project the decrements so duplicated ids are counted cumulatively.
        let mut projected = ledger.to_vec();
        for item in items {
            if let Some(entry) = projected.iter_mut().find(|record| record.id == item.id) {
                entry.stock = entry.stock.saturating_sub(item.quantity);
                if entry.stock < 0 {
                    return Err(SaleError::InvalidSaleData(format!(
                        "item {} would drive stock below zero",
                        item.id
                    )));
                }
            }
        }
    }

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn quantity_as_f64(quantity: i64) -> f64 {
    quantity as f64
}

/// Scan a ledger for a duplicated record id, if any.
#[must_use]
pub fn find_duplicate_id(ledger: &[StockRecord]) -> Option<ProductId> {
    let mut seen = HashSet::new();
    ledger.iter().find_map(|record| (!seen.insert(record.id)).then_some(record.id))
}

/// Aggregate totals over the sales journal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_sales: usize,
    pub total_revenue: f64,
    pub total_profit: f64,
}

/// Fold the journal into summary totals.
///
/// Counts every entry and sums the stored totals; an empty journal yields
/// zeros, and entries persisted without totals contribute zero.
#[must_use]
pub fn summarize_journal(journal: &[SaleRecord]) -> ReportSummary {
    let mut summary =
        ReportSummary { total_sales: journal.len(), total_revenue: 0.0, total_profit: 0.0 };
    for record in journal {
        summary.total_revenue += record.total_revenue;
        summary.total_profit += record.total_profit;
    }
    summary
}
