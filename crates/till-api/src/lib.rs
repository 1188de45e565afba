use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use till_core::{
    process_sale, summarize_journal, ItemOutcome, Product, ReportSummary, SaleError, SalePolicy,
    SaleRequest, StockRecord,
};
use till_store_json::{StoreError, TillStore};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ApiError {
    #[error(transparent)]
    Sale(#[from] SaleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a recorded sale returns to the caller: the computed totals plus
/// the per-item outcomes in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleReceipt {
    pub total_profit: f64,
    pub total_revenue: f64,
    pub items: Vec<ItemOutcome>,
}

/// Embedding facade over a till store.
///
/// Every ledger/journal access funnels through one mutex, so sale
/// commits never interleave: a sale locks the store, reads its snapshot,
/// processes, and commits before the next writer enters. Clones share
/// the same store.
#[derive(Debug)]
pub struct TillApi<S> {
    store: Arc<Mutex<S>>,
    policy: SalePolicy,
}

impl<S> Clone for TillApi<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), policy: self.policy }
    }
}

impl<S: TillStore> TillApi<S> {
    #[must_use]
    pub fn new(store: S, policy: SalePolicy) -> Self {
        Self { store: Arc::new(Mutex::new(store)), policy }
    }

    #[must_use]
    pub fn policy(&self) -> SalePolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// List the product catalog.
    ///
    /// # Errors
    /// Returns [`ApiError::Store`] when the catalog cannot be read.
    pub fn list_products(&self) -> Result<Vec<Product>, ApiError> {
        let store = self.lock();
        Ok(store.load_catalog()?)
    }

    /// Current stock levels.
    ///
    /// # Errors
    /// Returns [`ApiError::Store`] when the ledger cannot be read.
    pub fn stock_levels(&self) -> Result<Vec<StockRecord>, ApiError> {
        let store = self.lock();
        Ok(store.load_ledger()?)
    }

    /// Validate and record one sale: decrement matched stock, compute
    /// the totals, append the journal entry, and commit both documents
    /// as one unit.
    ///
    /// # Errors
    /// Returns [`ApiError::Sale`] when the request fails a policy check
    /// (nothing is mutated), or [`ApiError::Store`] when the snapshot
    /// cannot be read or the commit cannot be made durable.
    pub fn record_sale(&self, request: SaleRequest) -> Result<SaleReceipt, ApiError> {
        let mut store = self.lock();
        let ledger = store.load_ledger()?;
        let mut journal = store.load_journal()?;

        // Stamped under the lock so journal order and timestamp order
        // agree.
        let timestamp = OffsetDateTime::now_utc();
        let processed = process_sale(&ledger, request, self.policy, timestamp)?;
        let receipt = SaleReceipt {
            total_profit: processed.record.total_profit,
            total_revenue: processed.record.total_revenue,
            items: processed.outcomes,
        };
        journal.push(processed.record);
        store.commit_sale(&processed.ledger, &journal)?;

        Ok(receipt)
    }

    /// Fold the sales journal into its summary totals.
    ///
    /// # Errors
    /// Returns [`ApiError::Store`] when the journal cannot be read.
    pub fn generate_report(&self) -> Result<ReportSummary, ApiError> {
        let store = self.lock();
        let journal = store.load_journal()?;
        Ok(summarize_journal(&journal))
    }
}
