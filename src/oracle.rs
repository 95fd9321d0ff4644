use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::warn;
use serde::Deserialize;

use crate::api::{BlockHeight, PriceCents};

pub const DEFAULT_BLOCK_API: &str = "https://api.hiro.so";
pub const DEFAULT_PRICE_API: &str = "https://api.coingecko.com";

const FEED_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only view of the outside world: the burn block counter markets lock
/// against and the BTC price they settle against. `None` means the feed could
/// not be read right now, callers decide whether that is fatal.
#[async_trait]
pub trait Oracle {
    async fn current_block(&self) -> Option<BlockHeight>;
    async fn current_price(&self) -> Option<PriceCents>;
}

pub struct HttpOracle {
    client: reqwest::Client,
    block_api: String,
    price_api: String,
}

impl HttpOracle {
    pub fn new(block_api: String, price_api: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            block_api,
            price_api,
        }
    }
    async fn fetch_block(&self) -> Result<BlockHeight> {
        let response = self
            .client
            .get(self.block_api.clone() + "/extended/v2/burn-blocks?limit=1")
            .timeout(FEED_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let body = response.json::<BurnBlocksResponse>().await?;
        let height = body
            .results
            .first()
            .map(|block| block.burn_block_height)
            .ok_or(anyhow!("burn block feed returned no results"))?;
        Ok(height)
    }
    async fn fetch_price(&self) -> Result<PriceCents> {
        let response = self
            .client
            .get(self.price_api.clone() + "/api/v3/simple/price?ids=bitcoin&vs_currencies=usd")
            .timeout(FEED_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let body = response.json::<SimplePriceResponse>().await?;
        Ok((body.bitcoin.usd * 100.0).round() as PriceCents)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn current_block(&self) -> Option<BlockHeight> {
        match self.fetch_block().await {
            Ok(0) => {
                warn!("burn block feed reported height 0, treating as unavailable");
                None
            }
            Ok(height) => Some(height),
            Err(e) => {
                warn!("burn block feed unavailable: {:#}", e);
                None
            }
        }
    }
    async fn current_price(&self) -> Option<PriceCents> {
        match self.fetch_price().await {
            Ok(0) => {
                warn!("price feed reported zero, treating as unavailable");
                None
            }
            Ok(price) => Some(price),
            Err(e) => {
                warn!("price feed unavailable: {:#}", e);
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct BurnBlocksResponse {
    results: Vec<BurnBlock>,
}
#[derive(Debug, Deserialize)]
struct BurnBlock {
    burn_block_height: BlockHeight,
}
#[derive(Debug, Deserialize)]
struct SimplePriceResponse {
    bitcoin: BitcoinPrice,
}
#[derive(Debug, Deserialize)]
struct BitcoinPrice {
    usd: f64,
}

/// Feed double with settable readings, shared across clones like the real
/// thing is shared across tasks.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    block: Arc<Mutex<Option<BlockHeight>>>,
    price: Arc<Mutex<Option<PriceCents>>>,
}

impl StaticOracle {
    pub fn new(block: BlockHeight, price: PriceCents) -> Self {
        let oracle = Self::default();
        oracle.set_block(Some(block));
        oracle.set_price(Some(price));
        oracle
    }
    pub fn set_block(&self, block: Option<BlockHeight>) {
        *self.block.lock().unwrap() = block;
    }
    pub fn set_price(&self, price: Option<PriceCents>) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl Oracle for StaticOracle {
    async fn current_block(&self) -> Option<BlockHeight> {
        *self.block.lock().unwrap()
    }
    async fn current_price(&self) -> Option<PriceCents> {
        *self.price.lock().unwrap()
    }
}

#[cfg(test)]
mod test {
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve(app: Router) -> String {
        let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
            .serve(app.into_make_service());
        let port = server.local_addr().port();
        tokio::spawn(async move {
            server.await.unwrap();
        });
        "http://127.0.0.1:".to_string() + port.to_string().as_str()
    }

    #[tokio::test]
    async fn reads_burn_block_height() {
        let app = Router::new().route(
            "/extended/v2/burn-blocks",
            get(|| async { r#"{"results":[{"burn_block_height":850123}]}"# }),
        );
        let url = serve(app).await;
        let oracle = HttpOracle::new(url, "http://127.0.0.1:1".to_string());
        assert_eq!(oracle.current_block().await, Some(850_123));
    }

    #[tokio::test]
    async fn zero_height_is_unavailable() {
        let app = Router::new().route(
            "/extended/v2/burn-blocks",
            get(|| async { r#"{"results":[{"burn_block_height":0}]}"# }),
        );
        let url = serve(app).await;
        let oracle = HttpOracle::new(url, "http://127.0.0.1:1".to_string());
        assert_eq!(oracle.current_block().await, None);
    }

    #[tokio::test]
    async fn empty_results_are_unavailable() {
        let app = Router::new().route(
            "/extended/v2/burn-blocks",
            get(|| async { r#"{"results":[]}"# }),
        );
        let url = serve(app).await;
        let oracle = HttpOracle::new(url, "http://127.0.0.1:1".to_string());
        assert_eq!(oracle.current_block().await, None);
    }

    #[tokio::test]
    async fn malformed_feed_is_unavailable() {
        let app = Router::new().route(
            "/api/v3/simple/price",
            get(|| async { "very much not json" }),
        );
        let url = serve(app).await;
        let oracle = HttpOracle::new("http://127.0.0.1:1".to_string(), url);
        assert_eq!(oracle.current_price().await, None);
    }

    #[tokio::test]
    async fn unreachable_feed_is_unavailable() {
        let oracle = HttpOracle::new(
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:1".to_string(),
        );
        assert_eq!(oracle.current_block().await, None);
        assert_eq!(oracle.current_price().await, None);
    }

    #[tokio::test]
    async fn converts_price_to_cents() {
        let app = Router::new().route(
            "/api/v3/simple/price",
            get(|| async { r#"{"bitcoin":{"usd":65000.504}}"# }),
        );
        let url = serve(app).await;
        let oracle = HttpOracle::new("http://127.0.0.1:1".to_string(), url);
        assert_eq!(oracle.current_price().await, Some(6_500_050));
    }

    #[tokio::test]
    async fn static_oracle_is_settable() {
        let oracle = StaticOracle::new(850_000, 6_500_000);
        assert_eq!(oracle.current_block().await, Some(850_000));
        oracle.set_block(None);
        assert_eq!(oracle.current_block().await, None);
        assert_eq!(oracle.current_price().await, Some(6_500_000));
    }

    // hits the real hiro and coingecko endpoints
    #[ignore]
    #[tokio::test]
    async fn live_feeds() {
        let oracle = HttpOracle::new(
            DEFAULT_BLOCK_API.to_string(),
            DEFAULT_PRICE_API.to_string(),
        );
        let block = oracle.current_block().await;
        let price = oracle.current_price().await;
        println!("burn block: {:?}, price cents: {:?}", block, price);
        assert!(block.is_some());
        assert!(price.is_some());
    }
}
