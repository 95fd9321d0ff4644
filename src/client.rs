use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};

use crate::api::*;

pub struct Client {
    url: String,
    client: reqwest::Client,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    pub async fn create_market(
        &self,
        request: &CreateMarketRequest,
        payment: Option<&str>,
    ) -> Response {
        let mut builder = self
            .client
            .post(self.url.clone() + "/create")
            .json(request);
        if let Some(payment) = payment {
            builder = builder.header("X-Payment", payment);
        }
        builder.send().await.unwrap()
    }
    pub async fn describe_bet(&self, request: &BetRequest) -> Response {
        self.client
            .post(self.url.clone() + "/bet")
            .json(request)
            .send()
            .await
            .unwrap()
    }
    pub async fn settle_market(&self, market_id: MarketId) -> Response {
        self.client
            .post(self.url.clone() + "/settle/" + market_id.to_string().as_str())
            .send()
            .await
            .unwrap()
    }
    pub async fn describe_claim(&self, market_id: MarketId, request: &ClaimRequest) -> Response {
        self.client
            .post(self.url.clone() + "/claim/" + market_id.to_string().as_str())
            .json(request)
            .send()
            .await
            .unwrap()
    }
    pub async fn seed_demo_market(&self) -> Response {
        self.client
            .post(self.url.clone() + "/demo/create-test-market")
            .send()
            .await
            .unwrap()
    }
    pub async fn list_markets(&self) -> Result<MarketsResponse> {
        let response = self
            .client
            .get(self.url.clone() + "/markets")
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<MarketsResponse>().await?)
    }
    pub async fn get_market(&self, market_id: MarketId) -> Result<MarketDetailResponse> {
        let response = self
            .client
            .get(self.url.clone() + "/market/" + market_id.to_string().as_str())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            bail!("{}: {}", response.status(), response.text().await?)
        }
        Ok(response.json::<MarketDetailResponse>().await?)
    }
    pub async fn info(&self) -> Result<ApiInfoResponse> {
        let response = self.client.get(self.url.clone() + "/api").send().await?;
        Ok(response.json::<ApiInfoResponse>().await?)
    }
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url.clone() + "/health").send().await?;
        Ok(response.json::<HealthResponse>().await?)
    }
}
