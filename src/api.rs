use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub type MarketId = u64;
pub type Sats = u64;
pub type BlockHeight = u64;
pub type PriceCents = u64;
pub type MicroStx = u64;

/// x402 price for creating a market, in microSTX (0.01 STX).
pub const CREATE_MARKET_PRICE: MicroStx = 10_000;

// Requests
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateMarketRequest {
    pub target_price: PriceCents,
    pub settlement_block: BlockHeight,
    #[serde(default)]
    pub description: Option<String>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub market_id: MarketId,
    pub side: Side,
    pub amount: Sats,
    pub sender: String,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    #[serde(default)]
    pub sender: Option<String>,
}

// Responses
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarketsResponse {
    pub markets: Vec<MarketView>,
    pub count: usize,
    pub current_block: Option<BlockHeight>,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetailResponse {
    #[serde(flatten)]
    pub view: MarketView,
    pub current_btc_price: Option<PriceCents>,
    pub current_block: Option<BlockHeight>,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateMarketResponse {
    pub success: bool,
    pub market: Market,
    pub payment: PaymentEcho,
    pub message: String,
    pub bet_endpoint: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct PaymentEcho {
    pub txid: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BetIntentResponse {
    pub success: bool,
    pub transaction: ContractCall,
    pub market: MarketSnapshot,
    pub message: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub id: MarketId,
    pub target_price: PriceCents,
    pub settlement_block: BlockHeight,
    pub current_odds: Odds,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub success: bool,
    pub settlement: SettlementSummary,
    pub message: String,
    pub claim_endpoint: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    pub market_id: MarketId,
    pub target_price: PriceCents,
    pub settlement_price: PriceCents,
    pub winning_side: Side,
    pub yes_pool: Sats,
    pub no_pool: Sats,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClaimIntentResponse {
    pub success: bool,
    pub transaction: ContractCall,
    pub market: SettledMarketSummary,
    pub message: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SettledMarketSummary {
    pub id: MarketId,
    pub winning_side: Side,
    pub settlement_price: PriceCents,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DemoMarketResponse {
    pub success: bool,
    pub market: Market,
    pub message: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfoResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    pub current_btc_block: Option<BlockHeight>,
    pub current_btc_price: Option<String>,
    pub contract: Contract,
    pub endpoints: BTreeMap<String, String>,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub error: String,
    pub description: String,
    pub pricing: Pricing,
    pub instructions: String,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct Pricing {
    pub amount: MicroStx,
    pub formatted: String,
    pub sats: Sats,
}
impl PaymentRequiredResponse {
    pub fn new(description: impl Into<String>, amount: MicroStx) -> Self {
        Self {
            error: "Payment required".to_string(),
            description: description.into(),
            pricing: Pricing {
                amount,
                formatted: format!("{:.6} STX", Decimal::from(amount) / dec!(1_000_000)),
                sats: (amount + 99) / 100,
            },
            instructions: "Include X-Payment header with transaction ID".to_string(),
        }
    }
}

/// Error payload shared by every endpoint: `error` names the violated
/// condition, the optional fields carry whatever the client needs to satisfy it.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_block: Option<BlockHeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_block: Option<BlockHeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_block: Option<BlockHeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks_remaining: Option<BlockHeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_side: Option<Side>,
}

// Types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: MarketId,
    pub creator: String,
    pub target_price: PriceCents,
    pub settlement_block: BlockHeight,
    pub yes_pool: Sats,
    pub no_pool: Sats,
    pub settled: bool,
    pub winning_side: Option<Side>,
    pub settlement_price: PriceCents,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
impl Market {
    /// Derived lifecycle stage. Without a block reading an unsettled market
    /// cannot be proven past its lock, so it reports as active.
    pub fn status(&self, current_block: Option<BlockHeight>) -> MarketStatus {
        if self.settled {
            return MarketStatus::Settled;
        }
        match current_block {
            Some(block) if block >= self.settlement_block => MarketStatus::PendingSettlement,
            _ => MarketStatus::Active,
        }
    }
    pub fn blocks_remaining(&self, current_block: Option<BlockHeight>) -> Option<i64> {
        current_block.map(|block| self.settlement_block as i64 - block as i64)
    }
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarketView {
    #[serde(flatten)]
    pub market: Market,
    pub odds: Odds,
    pub blocks_remaining: Option<i64>,
    pub status: MarketStatus,
}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}
impl Side {
    pub fn bet_function(&self) -> &'static str {
        match self {
            Self::Yes => "bet-yes",
            Self::No => "bet-no",
        }
    }
}
impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Yes => "yes",
            Self::No => "no",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            e => bail!("Couldn't parse \"{}\" as a side, expected yes or no", e),
        }
    }
}
#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    PendingSettlement,
    Settled,
}
impl Display for MarketStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Active => "active",
            Self::PendingSettlement => "pending_settlement",
            Self::Settled => "settled",
        };
        write!(f, "{}", output)
    }
}
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub address: String,
    pub name: String,
}
impl Contract {
    pub fn call(&self, function_name: &str, function_args: Vec<FunctionArg>) -> ContractCall {
        ContractCall {
            contract_address: self.address.clone(),
            contract_name: self.name.clone(),
            function_name: function_name.to_string(),
            function_args,
            post_conditions: vec![],
        }
    }
}
impl Default for Contract {
    fn default() -> Self {
        Self {
            address: "SP_CONTRACT_ADDRESS".to_string(),
            name: "prediction-market".to_string(),
        }
    }
}
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCall {
    pub contract_address: String,
    pub contract_name: String,
    pub function_name: String,
    pub function_args: Vec<FunctionArg>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_conditions: Vec<PostCondition>,
}
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FunctionArg {
    #[serde(rename = "type")]
    pub arg_type: String,
    pub value: u64,
}
impl FunctionArg {
    pub fn uint(value: u64) -> Self {
        Self {
            arg_type: "uint".to_string(),
            value,
        }
    }
}
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PostCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub sender: String,
    pub amount: Sats,
}
impl PostCondition {
    pub fn stx_transfer(sender: String, amount: Sats) -> Self {
        Self {
            condition_type: "stx-transfer".to_string(),
            sender,
            amount,
        }
    }
}
/// Current odds for a market. The percentages always sum to exactly 100
/// because the no side is derived from the rounded yes side, and the implied
/// multipliers are rendered with two decimals or "∞" against an empty pool.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Odds {
    pub yes_odds: u32,
    pub no_odds: u32,
    pub implied_yes: String,
    pub implied_no: String,
}

// helper functions
pub fn format_usd(cents: PriceCents) -> String {
    let dollars = (cents / 100).to_string();
    let mut out = String::from("$");
    for (i, c) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if cents % 100 > 0 {
        out.push_str(format!(".{:02}", cents % 100).as_str());
    }
    out
}
