use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use till_api::TillApi;
use till_core::{Product, ProductId, SaleItem, SalePolicy, SaleRequest, StockRecord};
use till_store_json::JsonFileStore;

#[derive(Debug, Parser)]
#[command(name = "till")]
#[command(about = "Point-of-sale CLI for till")]
struct Cli {
    /// Directory holding products.json, stock.json, and sales.json.
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the three data documents in a fresh data directory.
    Init(InitArgs),
    /// Print the product catalog.
    Products,
    /// Record a sale against the stock ledger.
    Sale(SaleArgs),
    /// Print the aggregate sales report.
    Report,
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Seed a small demo catalog and ledger instead of empty documents.
    #[arg(long, default_value_t = false)]
    sample: bool,
}

#[derive(Debug, Args)]
struct SaleArgs {
    /// Sale line formatted as id:quantity:price; repeatable.
    #[arg(long = "item", value_name = "ID:QUANTITY:PRICE", required = true)]
    items: Vec<String>,
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init(args) => run_init(&cli.data_dir, &args),
        Command::Products => run_products(&open_api(&cli.data_dir)?),
        Command::Sale(args) => run_sale(&open_api(&cli.data_dir)?, &args),
        Command::Report => run_report(&open_api(&cli.data_dir)?),
    }
}

fn open_api(data_dir: &Path) -> Result<TillApi<JsonFileStore>> {
    let store = JsonFileStore::open(data_dir)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    Ok(TillApi::new(store, SalePolicy::default()))
}

fn run_init(data_dir: &Path, args: &InitArgs) -> Result<()> {
    let (catalog, ledger) = if args.sample {
        (sample_catalog(), sample_ledger())
    } else {
        (Vec::new(), Vec::new())
    };

    let store = JsonFileStore::init(data_dir, &catalog, &ledger)
        .with_context(|| format!("failed to initialize data directory {}", data_dir.display()))?;
    emit_json(serde_json::json!({
        "data_dir": store.data_dir(),
        "products": catalog.len(),
        "stock_records": ledger.len(),
        "sales": 0,
    }))
}

fn run_products(api: &TillApi<JsonFileStore>) -> Result<()> {
    let products = api.list_products()?;
    emit_json(serde_json::to_value(&products).context("failed to serialize catalog")?)
}

fn run_sale(api: &TillApi<JsonFileStore>, args: &SaleArgs) -> Result<()> {
    let items = args.items.iter().map(|raw| parse_item(raw)).collect::<Result<Vec<_>>>()?;
    let receipt = api.record_sale(SaleRequest::from_items(items))?;
    emit_json(serde_json::json!({
        "message": "Sale recorded",
        "profit": receipt.total_profit,
        "revenue": receipt.total_revenue,
        "items": receipt.items,
    }))
}

fn run_report(api: &TillApi<JsonFileStore>) -> Result<()> {
    let report = api.generate_report()?;
    emit_json(serde_json::to_value(report).context("failed to serialize report")?)
}

fn parse_item(raw: &str) -> Result<SaleItem> {
    let mut parts = raw.splitn(3, ':');
    let (Some(id), Some(quantity), Some(price)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(anyhow!("item MUST be formatted as id:quantity:price, got `{raw}`"));
    };

    Ok(SaleItem {
        id: ProductId(id.trim().parse().with_context(|| format!("invalid item id in `{raw}`"))?),
        quantity: quantity
            .trim()
            .parse()
            .with_context(|| format!("invalid item quantity in `{raw}`"))?,
        price: price.trim().parse().with_context(|| format!("invalid item price in `{raw}`"))?,
    })
}

fn sample_catalog() -> Vec<Product> {
    [
        (1, "Americano", 3.5, "drinks"),
        (2, "Flat White", 4.2, "drinks"),
        (3, "Croissant", 3.0, "bakery"),
    ]
    .into_iter()
    .map(|(id, name, price, category)| {
        let mut attributes = Map::new();
        attributes.insert("category".to_string(), Value::String(category.to_string()));
        Product { id: ProductId(id), name: name.to_string(), price, attributes }
    })
    .collect()
}

fn sample_ledger() -> Vec<StockRecord> {
    vec![
        StockRecord { id: ProductId(1), stock: 40, cost_price: 0.8 },
        StockRecord { id: ProductId(2), stock: 40, cost_price: 1.1 },
        StockRecord { id: ProductId(3), stock: 25, cost_price: 1.2 },
    ]
}
