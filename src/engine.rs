use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::Utc;
use log::{trace, warn};
use reqwest::StatusCode;
use thiserror::Error;

use crate::api::*;
use crate::odds::odds;
use crate::oracle::Oracle;
use crate::store::{MarketSet, MarketStore, StoreError};

/// Blocks a new market must leave between creation and settlement, roughly a
/// day of Bitcoin blocks.
pub const MIN_SETTLEMENT_LEAD: BlockHeight = 144;
/// Smallest stake the betting contract accepts.
pub const MIN_BET_SATS: Sats = 1000;
/// Load-modify-save cycles to attempt before giving up on a contended book.
const CAS_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Blocks,
    Price,
}
impl Display for Feed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Blocks => "BTC block height",
            Self::Price => "BTC price",
        };
        write!(f, "{}", output)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("Invalid target price")]
    InvalidTargetPrice,
    #[error("Settlement block too soon")]
    SettlementTooSoon {
        minimum_block: BlockHeight,
        current_block: BlockHeight,
    },
    #[error("Minimum bet is 1000 sats, got {amount}")]
    BetTooSmall { amount: Sats },
    #[error("Market not found")]
    MarketNotFound(MarketId),
    #[error("Betting period ended")]
    BettingClosed {
        settlement_block: BlockHeight,
        current_block: BlockHeight,
    },
    #[error("Already settled")]
    AlreadySettled { winning_side: Option<Side> },
    #[error("Settlement block not reached")]
    SettlementNotDue {
        current_block: BlockHeight,
        settlement_block: BlockHeight,
        blocks_remaining: BlockHeight,
    },
    #[error("Market not yet settled")]
    NotSettled,
    #[error("Sender address required")]
    MissingSender,
    #[error("Could not fetch {0}")]
    OracleUnavailable(Feed),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MarketNotFound(_) => StatusCode::NOT_FOUND,
            Self::OracleUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
    pub fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            error: self.to_string(),
            ..Default::default()
        };
        match self {
            Self::SettlementTooSoon {
                minimum_block,
                current_block,
            } => {
                body.minimum_block = Some(*minimum_block);
                body.current_block = Some(*current_block);
            }
            Self::BettingClosed {
                settlement_block,
                current_block,
            } => {
                body.settlement_block = Some(*settlement_block);
                body.current_block = Some(*current_block);
            }
            Self::AlreadySettled { winning_side } => {
                body.winning_side = *winning_side;
            }
            Self::SettlementNotDue {
                current_block,
                settlement_block,
                blocks_remaining,
            } => {
                body.current_block = Some(*current_block);
                body.settlement_block = Some(*settlement_block);
                body.blocks_remaining = Some(*blocks_remaining);
            }
            _ => {}
        }
        body
    }
}

/// The ledger engine: owns market lifecycle (open, locked, settled), resolves
/// outcomes against the oracle and keeps the book consistent under concurrent
/// writers via the store's compare-and-swap.
pub struct Engine {
    store: Box<dyn MarketStore + Send + Sync>,
    oracle: Box<dyn Oracle + Send + Sync>,
    contract: Contract,
}

impl Engine {
    pub fn new(
        store: Box<dyn MarketStore + Send + Sync>,
        oracle: Box<dyn Oracle + Send + Sync>,
        contract: Contract,
    ) -> Self {
        Self {
            store,
            oracle,
            contract,
        }
    }

    async fn current_block(&self) -> Result<BlockHeight, EngineError> {
        self.oracle
            .current_block()
            .await
            .ok_or(EngineError::OracleUnavailable(Feed::Blocks))
    }

    async fn current_price(&self) -> Result<PriceCents, EngineError> {
        self.oracle
            .current_price()
            .await
            .ok_or(EngineError::OracleUnavailable(Feed::Price))
    }

    /// One load-modify-save cycle against the store, retried from a fresh
    /// read whenever another writer got in between. `apply` must stay pure on
    /// the book it is given since a retry runs it again on new state.
    async fn update_book<T>(
        &self,
        mut apply: impl FnMut(&mut MarketSet) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        for attempt in 1..=CAS_ATTEMPTS {
            let (mut set, version) = self.store.load().await?;
            let out = apply(&mut set)?;
            match self.store.save(&set, version).await {
                Ok(()) => return Ok(out),
                Err(StoreError::Conflict) => {
                    trace!("market book moved underneath us, retrying (attempt {})", attempt);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!("giving up on a contended market book after {} attempts", CAS_ATTEMPTS);
        Err(EngineError::Store(StoreError::Conflict))
    }

    fn view(&self, market: &Market, current_block: Option<BlockHeight>) -> MarketView {
        MarketView {
            odds: odds(market.yes_pool, market.no_pool),
            blocks_remaining: market.blocks_remaining(current_block),
            status: market.status(current_block),
            market: market.clone(),
        }
    }

    pub async fn list_markets(&self) -> Result<MarketsResponse, EngineError> {
        let (set, _) = self.store.load().await?;
        let current_block = self.oracle.current_block().await;
        let markets = set
            .markets
            .iter()
            .map(|market| self.view(market, current_block))
            .collect::<Vec<MarketView>>();
        Ok(MarketsResponse {
            count: markets.len(),
            markets,
            current_block,
        })
    }

    pub async fn get_market(&self, market_id: MarketId) -> Result<MarketDetailResponse, EngineError> {
        let (set, _) = self.store.load().await?;
        let market = set
            .market(market_id)
            .ok_or(EngineError::MarketNotFound(market_id))?;
        let current_block = self.oracle.current_block().await;
        let current_btc_price = self.oracle.current_price().await;
        Ok(MarketDetailResponse {
            view: self.view(market, current_block),
            current_btc_price,
            current_block,
        })
    }

    pub async fn create_market(
        &self,
        request: CreateMarketRequest,
        payment: &str,
    ) -> Result<CreateMarketResponse, EngineError> {
        if request.target_price == 0 {
            return Err(EngineError::InvalidTargetPrice);
        }
        let current_block = self.current_block().await?;
        let minimum_block = current_block + MIN_SETTLEMENT_LEAD;
        if request.settlement_block < minimum_block {
            return Err(EngineError::SettlementTooSoon {
                minimum_block,
                current_block,
            });
        }
        // the payment txid doubles as a pseudo-identity for the creator
        let creator = payment.chars().take(20).collect::<String>();
        let description = match request.description {
            Some(description) if !description.is_empty() => description,
            _ => format!(
                "BTC >= {} by block {}",
                format_usd(request.target_price),
                request.settlement_block
            ),
        };
        let market = self
            .update_book(|set| {
                let market = Market {
                    id: set.next_id,
                    creator: creator.clone(),
                    target_price: request.target_price,
                    settlement_block: request.settlement_block,
                    yes_pool: 0,
                    no_pool: 0,
                    settled: false,
                    winning_side: None,
                    settlement_price: 0,
                    description: description.clone(),
                    created_at: Utc::now(),
                };
                set.next_id += 1;
                set.markets.push(market.clone());
                Ok(market)
            })
            .await?;
        Ok(CreateMarketResponse {
            success: true,
            market,
            payment: PaymentEcho {
                txid: payment.to_string(),
            },
            message: "Market created! Users can now place bets.".to_string(),
            bet_endpoint: "/bet".to_string(),
        })
    }

    /// Builds the contract call a bettor has to sign. The pools themselves
    /// only move on-chain, so nothing is written here; the book is read once
    /// for validation and the odds snapshot.
    pub async fn describe_bet(&self, request: BetRequest) -> Result<BetIntentResponse, EngineError> {
        if request.sender.is_empty() {
            return Err(EngineError::MissingSender);
        }
        if request.amount < MIN_BET_SATS {
            return Err(EngineError::BetTooSmall {
                amount: request.amount,
            });
        }
        let (set, _) = self.store.load().await?;
        let market = set
            .market(request.market_id)
            .ok_or(EngineError::MarketNotFound(request.market_id))?;
        if market.settled {
            return Err(EngineError::AlreadySettled {
                winning_side: market.winning_side,
            });
        }
        let current_block = self.current_block().await?;
        if current_block >= market.settlement_block {
            return Err(EngineError::BettingClosed {
                settlement_block: market.settlement_block,
                current_block,
            });
        }
        let mut transaction = self.contract.call(
            request.side.bet_function(),
            vec![
                FunctionArg::uint(request.market_id),
                FunctionArg::uint(request.amount),
            ],
        );
        transaction
            .post_conditions
            .push(PostCondition::stx_transfer(request.sender.clone(), request.amount));
        Ok(BetIntentResponse {
            success: true,
            transaction,
            market: MarketSnapshot {
                id: market.id,
                target_price: market.target_price,
                settlement_block: market.settlement_block,
                current_odds: odds(market.yes_pool, market.no_pool),
            },
            message: format!(
                "Sign this transaction to bet {} sats on {}",
                request.amount,
                request.side.to_string().to_uppercase()
            ),
        })
    }

    /// Resolves a due market against the price feed: yes wins when the
    /// observed price reaches the target, ties included. Settlement is final,
    /// a lost race against another settler reports the recorded outcome
    /// instead of resolving twice.
    pub async fn settle(&self, market_id: MarketId) -> Result<SettlementResponse, EngineError> {
        // pre-checks on a fresh read, so an already settled market reports
        // its outcome even while the feeds are down
        let (set, _) = self.store.load().await?;
        let market = set
            .market(market_id)
            .ok_or(EngineError::MarketNotFound(market_id))?;
        if market.settled {
            return Err(EngineError::AlreadySettled {
                winning_side: market.winning_side,
            });
        }
        let current_block = self.current_block().await?;
        if current_block < market.settlement_block {
            return Err(EngineError::SettlementNotDue {
                current_block,
                settlement_block: market.settlement_block,
                blocks_remaining: market.settlement_block - current_block,
            });
        }
        let settlement_price = self.current_price().await?;
        let settlement = self
            .update_book(|set| {
                let market = set
                    .market_mut(market_id)
                    .ok_or(EngineError::MarketNotFound(market_id))?;
                if market.settled {
                    return Err(EngineError::AlreadySettled {
                        winning_side: market.winning_side,
                    });
                }
                let winning_side = if settlement_price >= market.target_price {
                    Side::Yes
                } else {
                    Side::No
                };
                market.settled = true;
                market.winning_side = Some(winning_side);
                market.settlement_price = settlement_price;
                Ok(SettlementSummary {
                    market_id,
                    target_price: market.target_price,
                    settlement_price,
                    winning_side,
                    yes_pool: market.yes_pool,
                    no_pool: market.no_pool,
                })
            })
            .await?;
        Ok(SettlementResponse {
            success: true,
            message: format!(
                "Market settled! {} wins. BTC was {} vs target {}",
                settlement.winning_side.to_string().to_uppercase(),
                format_usd(settlement.settlement_price),
                format_usd(settlement.target_price)
            ),
            claim_endpoint: format!("/claim/{}", market_id),
            settlement,
        })
    }

    pub async fn describe_claim(
        &self,
        market_id: MarketId,
        request: ClaimRequest,
    ) -> Result<ClaimIntentResponse, EngineError> {
        match request.sender.as_deref() {
            Some(sender) if !sender.is_empty() => {}
            _ => return Err(EngineError::MissingSender),
        }
        let (set, _) = self.store.load().await?;
        let market = set
            .market(market_id)
            .ok_or(EngineError::MarketNotFound(market_id))?;
        if !market.settled {
            return Err(EngineError::NotSettled);
        }
        let winning_side = market.winning_side.ok_or_else(|| {
            warn!("market {} is settled but carries no outcome", market_id);
            EngineError::Store(StoreError::Unavailable("corrupt market book".to_string()))
        })?;
        Ok(ClaimIntentResponse {
            success: true,
            transaction: self
                .contract
                .call("claim", vec![FunctionArg::uint(market_id)]),
            market: SettledMarketSummary {
                id: market_id,
                winning_side,
                settlement_price: market.settlement_price,
            },
            message: "Sign this transaction to claim your winnings".to_string(),
        })
    }

    /// Seeds a ready-made market with pre-filled pools. Needs the block feed
    /// for a sane settlement height; a dead price feed falls back to a $150k
    /// target.
    pub async fn seed_demo_market(&self) -> Result<DemoMarketResponse, EngineError> {
        let current_block = self.current_block().await?;
        let target_price = match self.oracle.current_price().await {
            Some(price) => price + 500_000,
            None => 15_000_000,
        };
        let market = self
            .update_book(|set| {
                let market = Market {
                    id: set.next_id,
                    creator: "demo".to_string(),
                    target_price,
                    settlement_block: current_block + 1000,
                    yes_pool: 50_000,
                    no_pool: 30_000,
                    settled: false,
                    winning_side: None,
                    settlement_price: 0,
                    description: "Demo: Will BTC reach new highs?".to_string(),
                    created_at: Utc::now(),
                };
                set.next_id += 1;
                set.markets.push(market.clone());
                Ok(market)
            })
            .await?;
        Ok(DemoMarketResponse {
            success: true,
            market,
            message: "Test market created for demo purposes".to_string(),
        })
    }

    pub async fn info(&self) -> ApiInfoResponse {
        let current_btc_block = self.oracle.current_block().await;
        let current_btc_price = self.oracle.current_price().await;
        let mut endpoints = BTreeMap::new();
        endpoints.insert("GET /markets".to_string(), "List all markets".to_string());
        endpoints.insert("GET /market/:id".to_string(), "Get market details".to_string());
        endpoints.insert(
            "POST /create".to_string(),
            "Create new market (x402: 0.01 STX)".to_string(),
        );
        endpoints.insert("POST /bet".to_string(), "Generate bet transaction".to_string());
        endpoints.insert(
            "POST /settle/:id".to_string(),
            "Trigger market settlement".to_string(),
        );
        endpoints.insert(
            "POST /claim/:id".to_string(),
            "Generate claim transaction".to_string(),
        );
        ApiInfoResponse {
            name: "BTC Oracle - Prediction Market".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Bet sBTC on Bitcoin price predictions, settled against the BTC price feed"
                .to_string(),
            current_btc_block,
            current_btc_price: current_btc_price.map(format_usd),
            contract: self.contract.clone(),
            endpoints,
        }
    }
}
