use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use till_core::{find_duplicate_id, Product, SaleRecord, StockRecord};

const PRODUCTS_FILE: &str = "products.json";
const STOCK_FILE: &str = "stock.json";
const SALES_FILE: &str = "sales.json";
const PENDING_COMMIT_FILE: &str = "pending-commit.json";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    Read(String),
    #[error("store write failed: {0}")]
    Write(String),
}

/// Storage seam for the catalog, stock ledger, and sales journal.
///
/// `commit_sale` installs the post-sale ledger and journal as one unit:
/// after a successful return both documents reflect the sale, and after
/// an error neither does. Callers own the serialization of commits; an
/// implementation is not required to tolerate overlapping writers.
pub trait TillStore: Send + Sync {
    /// Read the full product catalog.
    ///
    /// # Errors
    /// Returns [`StoreError::Read`] when the catalog is unavailable or
    /// corrupt.
    fn load_catalog(&self) -> Result<Vec<Product>, StoreError>;

    /// Read the full stock ledger.
    ///
    /// # Errors
    /// Returns [`StoreError::Read`] when the ledger is unavailable,
    /// corrupt, or holds a duplicated record id.
    fn load_ledger(&self) -> Result<Vec<StockRecord>, StoreError>;

    /// Read the full sales journal, oldest entry first.
    ///
    /// # Errors
    /// Returns [`StoreError::Read`] when the journal is unavailable or
    /// corrupt.
    fn load_journal(&self) -> Result<Vec<SaleRecord>, StoreError>;

    /// Durably install the post-sale ledger and journal together.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] when the commit cannot be made
    /// durable; the previously committed state stays visible.
    fn commit_sale(
        &mut self,
        ledger: &[StockRecord],
        journal: &[SaleRecord],
    ) -> Result<(), StoreError>;
}

/// Write-ahead image of one sale commit. Present on disk only between
/// the envelope write and the per-document installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitEnvelope {
    stock: Vec<StockRecord>,
    sales: Vec<SaleRecord>,
}

/// Document-per-list JSON store: `products.json`, `stock.json`, and
/// `sales.json` in one data directory, each a top-level array.
///
/// Every write lands through a temp file, `sync_data`, and a rename.
/// A sale commit first persists a [`CommitEnvelope`] the same way, then
/// installs both documents and clears the envelope; [`JsonFileStore::open`]
/// replays a leftover envelope, so a crash between the two installs heals
/// on the next open.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    /// Open a data directory, creating it and any missing documents as
    /// empty lists, and replaying an interrupted commit first.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] when the directory or documents
    /// cannot be created, or [`StoreError::Read`] when a leftover commit
    /// envelope cannot be parsed.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { data_dir: data_dir.into() };
        fs::create_dir_all(&store.data_dir).map_err(|err| {
            StoreError::Write(format!(
                "failed to create data directory {}: {err}",
                store.data_dir.display()
            ))
        })?;
        store.replay_pending_commit()?;
        for document in [PRODUCTS_FILE, STOCK_FILE, SALES_FILE] {
            let path = store.data_dir.join(document);
            if !path.exists() {
                write_json_value::<[serde_json::Value]>(&path, &[])?;
            }
        }
        Ok(store)
    }

    /// Create the three documents in a fresh data directory.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] when any document already exists or
    /// cannot be written.
    pub fn init(
        data_dir: impl Into<PathBuf>,
        catalog: &[Product],
        ledger: &[StockRecord],
    ) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|err| {
            StoreError::Write(format!(
                "failed to create data directory {}: {err}",
                data_dir.display()
            ))
        })?;
        for document in [PRODUCTS_FILE, STOCK_FILE, SALES_FILE] {
            let path = data_dir.join(document);
            if path.exists() {
                return Err(StoreError::Write(format!("{} already exists", path.display())));
            }
        }

        let store = Self { data_dir };
        write_json_value(&store.products_path(), catalog)?;
        write_json_value(&store.stock_path(), ledger)?;
        write_json_value::<[SaleRecord]>(&store.sales_path(), &[])?;
        Ok(store)
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn products_path(&self) -> PathBuf {
        self.data_dir.join(PRODUCTS_FILE)
    }

    fn stock_path(&self) -> PathBuf {
        self.data_dir.join(STOCK_FILE)
    }

    fn sales_path(&self) -> PathBuf {
        self.data_dir.join(SALES_FILE)
    }

    fn pending_path(&self) -> PathBuf {
        self.data_dir.join(PENDING_COMMIT_FILE)
    }

    fn replay_pending_commit(&self) -> Result<(), StoreError> {
        let pending = self.pending_path();
        if !pending.exists() {
            return Ok(());
        }

        // The envelope lands via rename, so its presence means a complete
        // commit image that never finished installing.
        let file = File::open(&pending).map_err(|err| {
            StoreError::Read(format!("failed to open {}: {err}", pending.display()))
        })?;
        let envelope: CommitEnvelope =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| {
                StoreError::Read(format!("failed to parse {}: {err}", pending.display()))
            })?;
        self.install_envelope(&envelope)
    }

    fn install_envelope(&self, envelope: &CommitEnvelope) -> Result<(), StoreError> {
        write_json_value(&self.stock_path(), &envelope.stock)?;
        write_json_value(&self.sales_path(), &envelope.sales)?;
        let pending = self.pending_path();
        fs::remove_file(&pending).map_err(|err| {
            StoreError::Write(format!("failed to clear {}: {err}", pending.display()))
        })?;
        Ok(())
    }
}

impl TillStore for JsonFileStore {
    fn load_catalog(&self) -> Result<Vec<Product>, StoreError> {
        read_json_document(&self.products_path())
    }

    fn load_ledger(&self) -> Result<Vec<StockRecord>, StoreError> {
        let ledger: Vec<StockRecord> = read_json_document(&self.stock_path())?;
        if let Some(id) = find_duplicate_id(&ledger) {
            return Err(StoreError::Read(format!(
                "stock ledger {} holds duplicate id {id}",
                self.stock_path().display()
            )));
        }
        Ok(ledger)
    }

    fn load_journal(&self) -> Result<Vec<SaleRecord>, StoreError> {
        read_json_document(&self.sales_path())
    }

    fn commit_sale(
        &mut self,
        ledger: &[StockRecord],
        journal: &[SaleRecord],
    ) -> Result<(), StoreError> {
        let envelope = CommitEnvelope { stock: ledger.to_vec(), sales: journal.to_vec() };
        write_json_value(&self.pending_path(), &envelope)?;
        self.install_envelope(&envelope)
    }
}

/// In-memory store double for tests and filesystem-free embedding.
///
/// The failure switches make the next read or commit fail so callers can
/// exercise their error handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    catalog: Vec<Product>,
    ledger: Vec<StockRecord>,
    journal: Vec<SaleRecord>,
    pub fail_reads: bool,
    pub fail_commits: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new(catalog: Vec<Product>, ledger: Vec<StockRecord>) -> Self {
        Self { catalog, ledger, journal: Vec::new(), fail_reads: false, fail_commits: false }
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Vec<SaleRecord>) -> Self {
        self.journal = journal;
        self
    }
}

impl TillStore for MemoryStore {
    fn load_catalog(&self) -> Result<Vec<Product>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Read("injected read failure".to_string()));
        }
        Ok(self.catalog.clone())
    }

    fn load_ledger(&self) -> Result<Vec<StockRecord>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Read("injected read failure".to_string()));
        }
        if let Some(id) = find_duplicate_id(&self.ledger) {
            return Err(StoreError::Read(format!("stock ledger holds duplicate id {id}")));
        }
        Ok(self.ledger.clone())
    }

    fn load_journal(&self) -> Result<Vec<SaleRecord>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Read("injected read failure".to_string()));
        }
        Ok(self.journal.clone())
    }

    fn commit_sale(
        &mut self,
        ledger: &[StockRecord],
        journal: &[SaleRecord],
    ) -> Result<(), StoreError> {
        if self.fail_commits {
            return Err(StoreError::Write("injected commit failure".to_string()));
        }
        self.ledger = ledger.to_vec();
        self.journal = journal.to_vec();
        Ok(())
    }
}

fn read_json_document<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let file = File::open(path)
        .map_err(|err| StoreError::Read(format!("failed to open {}: {err}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| StoreError::Read(format!("failed to parse {}: {err}", path.display())))
}

fn write_json_value<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp_path = temp_sibling(path);
    let file = File::create(&tmp_path).map_err(|err| {
        StoreError::Write(format!("failed to create {}: {err}", tmp_path.display()))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|err| {
        StoreError::Write(format!("failed to serialize {}: {err}", path.display()))
    })?;
    let file = writer.into_inner().map_err(|err| {
        StoreError::Write(format!("failed to flush {}: {err}", tmp_path.display()))
    })?;
    file.sync_data().map_err(|err| {
        StoreError::Write(format!("failed to sync {}: {err}", tmp_path.display()))
    })?;
    fs::rename(&tmp_path, path).map_err(|err| {
        StoreError::Write(format!(
            "failed to install {} over {}: {err}",
            tmp_path.display(),
            path.display()
        ))
    })?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(|| OsString::from("document"), OsString::from);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::{json, Map};
    use till_core::ProductId;
    use ulid::Ulid;

    use super::*;

    fn unique_data_dir() -> PathBuf {
        std::env::temp_dir().join(format!("till-store-{}", Ulid::new()))
    }

    fn product(id: i64, name: &str, price: f64) -> Product {
        Product { id: ProductId(id), name: name.to_string(), price, attributes: Map::new() }
    }

    fn stock(id: i64, stock: i64, cost_price: f64) -> StockRecord {
        StockRecord { id: ProductId(id), stock, cost_price }
    }

    fn sale_record(total_profit: f64, total_revenue: f64) -> Result<SaleRecord> {
        let record = serde_json::from_value(json!({
            "items": [{ "id": 1, "quantity": 3, "price": 8.0 }],
            "totalProfit": total_profit,
            "totalRevenue": total_revenue,
            "timestamp": "2023-11-14T22:13:20Z",
        }))?;
        Ok(record)
    }

    // Test IDs: TSTOR-001
    #[test]
    fn open_creates_missing_documents_as_empty_lists() -> Result<()> {
        let dir = unique_data_dir();
        let store = JsonFileStore::open(&dir)?;

        assert!(dir.join(PRODUCTS_FILE).exists());
        assert!(dir.join(STOCK_FILE).exists());
        assert!(dir.join(SALES_FILE).exists());
        assert!(store.load_catalog()?.is_empty());
        assert!(store.load_ledger()?.is_empty());
        assert!(store.load_journal()?.is_empty());

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-002
    #[test]
    fn init_seeds_catalog_and_ledger_with_empty_journal() -> Result<()> {
        let dir = unique_data_dir();
        let store =
            JsonFileStore::init(&dir, &[product(1, "Widget", 8.0)], &[stock(1, 10, 5.0)])?;

        assert_eq!(store.load_catalog()?, vec![product(1, "Widget", 8.0)]);
        assert_eq!(store.load_ledger()?, vec![stock(1, 10, 5.0)]);
        assert!(store.load_journal()?.is_empty());

        let err = match JsonFileStore::init(&dir, &[], &[]) {
            Ok(_) => panic!("re-initializing an existing data directory should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("already exists"), "unexpected error: {err}");

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-003
    #[test]
    fn commit_installs_ledger_and_journal_together() -> Result<()> {
        let dir = unique_data_dir();
        let mut store = JsonFileStore::init(&dir, &[], &[stock(1, 10, 5.0)])?;

        let journal = vec![sale_record(9.0, 24.0)?];
        store.commit_sale(&[stock(1, 7, 5.0)], &journal)?;

        assert_eq!(store.load_ledger()?, vec![stock(1, 7, 5.0)]);
        assert_eq!(store.load_journal()?, journal);
        assert!(!dir.join(PENDING_COMMIT_FILE).exists());

        let reopened = JsonFileStore::open(&dir)?;
        assert_eq!(reopened.load_ledger()?, vec![stock(1, 7, 5.0)]);
        assert_eq!(reopened.load_journal()?, journal);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-004
    #[test]
    fn corrupt_document_surfaces_read_failure() -> Result<()> {
        let dir = unique_data_dir();
        let store = JsonFileStore::open(&dir)?;
        fs::write(dir.join(PRODUCTS_FILE), "{ not json")?;

        let err = match store.load_catalog() {
            Ok(products) => panic!("corrupt catalog should fail to load, got {products:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, StoreError::Read(_)), "unexpected error kind: {err}");
        assert!(err.to_string().contains("failed to parse"), "unexpected error: {err}");

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-005
    #[test]
    fn duplicate_ledger_ids_are_rejected_on_load() -> Result<()> {
        let dir = unique_data_dir();
        let store = JsonFileStore::open(&dir)?;
        fs::write(
            dir.join(STOCK_FILE),
            r#"[{"id":1,"stock":5,"costPrice":2.0},{"id":1,"stock":3,"costPrice":2.0}]"#,
        )?;

        let err = match store.load_ledger() {
            Ok(ledger) => panic!("duplicate ids should fail to load, got {ledger:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("duplicate id 1"), "unexpected error: {err}");

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-006
    #[test]
    fn leftover_commit_envelope_replays_on_open() -> Result<()> {
        let dir = unique_data_dir();
        JsonFileStore::init(&dir, &[], &[stock(1, 10, 5.0)])?;

        // Simulate a crash after the envelope landed but before the
        // documents were installed.
        let envelope = json!({
            "stock": [{ "id": 1, "stock": 7, "costPrice": 5.0 }],
            "sales": [{
                "items": [{ "id": 1, "quantity": 3, "price": 8.0 }],
                "totalProfit": 9.0,
                "totalRevenue": 24.0,
                "timestamp": "2023-11-14T22:13:20Z",
            }],
        });
        fs::write(dir.join(PENDING_COMMIT_FILE), serde_json::to_string(&envelope)?)?;

        let store = JsonFileStore::open(&dir)?;
        assert_eq!(store.load_ledger()?, vec![stock(1, 7, 5.0)]);
        assert_eq!(store.load_journal()?, vec![sale_record(9.0, 24.0)?]);
        assert!(!dir.join(PENDING_COMMIT_FILE).exists());

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-007
    #[test]
    fn documents_are_pretty_printed() -> Result<()> {
        let dir = unique_data_dir();
        JsonFileStore::init(&dir, &[product(1, "Widget", 8.0)], &[])?;

        let raw = fs::read_to_string(dir.join(PRODUCTS_FILE))?;
        assert!(raw.starts_with("[\n"), "catalog should be pretty-printed, got: {raw}");

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    // Test IDs: TSTOR-008
    #[test]
    fn memory_store_injects_read_and_commit_failures() {
        let mut store = MemoryStore::new(Vec::new(), vec![stock(1, 10, 5.0)]);

        store.fail_reads = true;
        assert!(matches!(store.load_catalog(), Err(StoreError::Read(_))));
        assert!(matches!(store.load_ledger(), Err(StoreError::Read(_))));
        assert!(matches!(store.load_journal(), Err(StoreError::Read(_))));

        store.fail_reads = false;
        store.fail_commits = true;
        assert!(matches!(
            store.commit_sale(&[stock(1, 7, 5.0)], &[]),
            Err(StoreError::Write(_))
        ));
        match store.load_ledger() {
            Ok(ledger) => assert_eq!(ledger, vec![stock(1, 10, 5.0)]),
            Err(err) => panic!("ledger should still load: {err}"),
        }
    }

    // Test IDs: TSTOR-009
    #[test]
    fn memory_store_rejects_duplicate_ledger_ids() {
        let store = MemoryStore::new(Vec::new(), vec![stock(1, 5, 2.0), stock(1, 3, 2.0)]);
        let err = match store.load_ledger() {
            Ok(ledger) => panic!("duplicate ids should fail to load, got {ledger:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("duplicate id 1"), "unexpected error: {err}");
    }
}
