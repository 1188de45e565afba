use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use till_api::{ApiError, TillApi};
use till_core::{ItemOutcome, Product, ReportSummary, SaleError, SalePolicy, SaleRequest};
use till_store_json::{JsonFileStore, StoreError};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

const ADMIN_PAGE: &str = "admin.html";
const DEFAULT_ALLOW_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

#[derive(Debug, Clone)]
struct ServiceState {
    api: TillApi<JsonFileStore>,
}

/// Peripheral wiring: static mounts and the cross-origin allow-list.
#[derive(Debug, Clone)]
struct ServiceConfig {
    public_dir: PathBuf,
    assets_dir: PathBuf,
    allow_origins: Vec<HeaderValue>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct SaleResponse {
    message: &'static str,
    profit: f64,
    revenue: f64,
    items: Vec<ItemOutcome>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ServiceError(ApiError);

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<SaleError> for ServiceError {
    fn from(err: SaleError) -> Self {
        Self(ApiError::Sale(err))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::Sale(SaleError::InvalidSaleData(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::Read(_) | StoreError::Write(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[derive(Debug, Parser)]
#[command(name = "till-server")]
#[command(about = "HTTP point-of-sale service for till")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
    /// Directory holding products.json, stock.json, and sales.json.
    #[arg(long, env = "TILL_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
    /// Storefront static root; also hosts the admin page.
    #[arg(long, default_value = "./public")]
    public_dir: PathBuf,
    /// Directory mounted under /assets.
    #[arg(long, default_value = "./assets")]
    assets_dir: PathBuf,
    /// Origin allowed for cross-origin requests; repeatable.
    #[arg(long = "allow-origin", value_name = "ORIGIN")]
    allow_origins: Vec<String>,
    /// Reject sale items whose id matches no stock record.
    #[arg(long)]
    reject_unknown_items: bool,
    /// Reject sale items with a quantity below one.
    #[arg(long)]
    require_positive_quantity: bool,
    /// Reject sale items with a negative price.
    #[arg(long)]
    require_non_negative_price: bool,
    /// Reject sales that would drive stock below zero.
    #[arg(long)]
    forbid_negative_stock: bool,
}

fn app(state: ServiceState, config: &ServiceConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(config.allow_origins.clone())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/products", get(products))
        .route("/api/sale", post(record_sale))
        .route("/api/report", get(report))
        .route_service("/admin", ServeFile::new(config.public_dir.join(ADMIN_PAGE)))
        .nest_service("/assets", ServeDir::new(&config.assets_dir))
        .fallback_service(ServeDir::new(&config.public_dir))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let policy = SalePolicy {
        reject_unknown_items: args.reject_unknown_items,
        require_positive_quantity: args.require_positive_quantity,
        require_non_negative_price: args.require_non_negative_price,
        forbid_negative_stock: args.forbid_negative_stock,
    };
    let store = JsonFileStore::open(&args.data_dir)?;
    let state = ServiceState { api: TillApi::new(store, policy) };
    let config = ServiceConfig {
        public_dir: args.public_dir,
        assets_dir: args.assets_dir,
        allow_origins: parse_allow_origins(&args.allow_origins)?,
    };

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, data_dir = %args.data_dir.display(), "till server listening");
    axum::serve(listener, app(state, &config)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_allow_origins(origins: &[String]) -> Result<Vec<HeaderValue>> {
    if origins.is_empty() {
        return Ok(DEFAULT_ALLOW_ORIGINS.iter().map(|origin| HeaderValue::from_static(origin)).collect());
    }

    let mut parsed = Vec::with_capacity(origins.len());
    for origin in origins {
        let value = origin
            .parse::<HeaderValue>()
            .with_context(|| format!("invalid allow-origin value: {origin}"))?;
        parsed.push(value);
    }
    Ok(parsed)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn products(State(state): State<ServiceState>) -> Result<Json<Vec<Product>>, ServiceError> {
    let products = state.api.list_products()?;
    Ok(Json(products))
}

async fn record_sale(
    State(state): State<ServiceState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SaleResponse>, ServiceError> {
    let request = SaleRequest::from_value(body)?;
    let receipt = state.api.record_sale(request)?;
    Ok(Json(SaleResponse {
        message: "Sale recorded",
        profit: receipt.total_profit,
        revenue: receipt.total_revenue,
        items: receipt.items,
    }))
}

async fn report(State(state): State<ServiceState>) -> Result<Json<ReportSummary>, ServiceError> {
    let report = state.api.generate_report()?;
    Ok(Json(report))
}
