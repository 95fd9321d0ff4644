#![allow(unused)]
use crate::api::*;
use crate::engine::{Engine, EngineError};
use crate::oracle::{HttpOracle, DEFAULT_BLOCK_API, DEFAULT_PRICE_API};
use crate::store::SqliteStore;
use anyhow::Result;
use axum::extract::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use chrono::Utc;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, warn, LevelFilter};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

mod api;
mod client;
mod engine;
mod odds;
mod oracle;
mod store;

#[debug_handler]
async fn list_markets(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<MarketsResponse>, (StatusCode, Json<ErrorBody>)> {
    let response = engine.list_markets().await.map_err(map_engine_err)?;
    Ok(Json(response))
}
async fn get_market(
    State(engine): State<Arc<Engine>>,
    Path(market_id): Path<MarketId>,
) -> Result<Json<MarketDetailResponse>, (StatusCode, Json<ErrorBody>)> {
    let response = engine.get_market(market_id).await.map_err(map_engine_err)?;
    Ok(Json(response))
}
#[debug_handler]
async fn create_market(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    Json(request): Json<CreateMarketRequest>,
) -> Response {
    let payment = match payment_token(&headers) {
        Some(payment) => payment,
        None => {
            return (
                StatusCode::PAYMENT_REQUIRED,
                Json(PaymentRequiredResponse::new(
                    "Create prediction market",
                    CREATE_MARKET_PRICE,
                )),
            )
                .into_response()
        }
    };
    match engine.create_market(request, payment.as_str()).await {
        Ok(response) => {
            debug!(
                "Created market {}: {}",
                response.market.id, response.market.description
            );
            Json(response).into_response()
        }
        Err(e) => map_engine_err(e).into_response(),
    }
}
async fn describe_bet(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<BetRequest>,
) -> Result<Json<BetIntentResponse>, (StatusCode, Json<ErrorBody>)> {
    debug!(
        "Describing a {} sat bet on {} for market {}",
        request.amount, request.side, request.market_id
    );
    let response = engine.describe_bet(request).await.map_err(map_engine_err)?;
    Ok(Json(response))
}
async fn settle_market(
    State(engine): State<Arc<Engine>>,
    Path(market_id): Path<MarketId>,
) -> Result<Json<SettlementResponse>, (StatusCode, Json<ErrorBody>)> {
    let response = engine.settle(market_id).await.map_err(map_engine_err)?;
    debug!(
        "Settled market {}: {} won at {}",
        market_id,
        response.settlement.winning_side,
        format_usd(response.settlement.settlement_price)
    );
    Ok(Json(response))
}
async fn describe_claim(
    State(engine): State<Arc<Engine>>,
    Path(market_id): Path<MarketId>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimIntentResponse>, (StatusCode, Json<ErrorBody>)> {
    let response = engine
        .describe_claim(market_id, request)
        .await
        .map_err(map_engine_err)?;
    Ok(Json(response))
}
async fn api_info(State(engine): State<Arc<Engine>>) -> Json<ApiInfoResponse> {
    Json(engine.info().await)
}
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}
async fn create_demo_market(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<DemoMarketResponse>, (StatusCode, Json<ErrorBody>)> {
    let response = engine.seed_demo_market().await.map_err(map_engine_err)?;
    debug!("Seeded demo market {}", response.market.id);
    Ok(Json(response))
}

fn payment_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("X-Payment")?.to_str().ok()?;
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}
fn map_engine_err(e: EngineError) -> (StatusCode, Json<ErrorBody>) {
    let status = e.status();
    if status.is_server_error() {
        warn!("Error: {:#}", e);
    } else {
        debug!("Error: {:#}", e);
    }
    (status, Json(e.body()))
}

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    #[arg(short, long)]
    db: Option<String>,
    #[arg(long, default_value = DEFAULT_BLOCK_API)]
    block_api: String,
    #[arg(long, default_value = DEFAULT_PRICE_API)]
    price_api: String,
    #[arg(long, default_value = "SP_CONTRACT_ADDRESS")]
    contract_address: String,
    #[arg(long, default_value = "prediction-market")]
    contract_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let engine = Arc::new(Engine::new(
        Box::new(SqliteStore::new(cli.db).await),
        Box::new(HttpOracle::new(cli.block_api, cli.price_api)),
        Contract {
            address: cli.contract_address,
            name: cli.contract_name,
        },
    ));
    let (_port, handle) = run_server(Some(cli.port), engine).await;
    handle.await?;
    Ok(())
}

async fn run_server(port: Option<u16>, engine: Arc<Engine>) -> (u16, JoinHandle<()>) {
    let app = Router::new()
        .route("/markets", get(list_markets))
        .route("/market/:id", get(get_market))
        .route("/create", post(create_market))
        .route("/bet", post(describe_bet))
        .route("/settle/:id", post(settle_market))
        .route("/claim/:id", post(describe_claim))
        .route("/api", get(api_info))
        .route("/health", get(health))
        .route("/demo/create-test-market", post(create_demo_market))
        .layer(CorsLayer::permissive())
        .with_state(engine);

    let addr = "127.0.0.1:".to_string() + port.unwrap_or(0).to_string().as_str();
    let server = axum::Server::bind(&addr.parse().unwrap()).serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        server.await.unwrap();
    });
    (port, handle)
}
