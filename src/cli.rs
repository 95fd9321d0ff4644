#![allow(unused)]
use std::str::FromStr;

use anyhow::Result;
use api::*;
use clap::{Parser, Subcommand};

use crate::client::Client;

mod api;
mod client;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,
}
#[derive(Subcommand)]
enum Commands {
    Markets,
    Market {
        #[arg(short, long)]
        id: MarketId,
    },
    Create {
        #[arg(short, long)]
        target_price: PriceCents,
        #[arg(short, long)]
        settlement_block: BlockHeight,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        payment: String,
    },
    Bet {
        #[arg(short, long)]
        market: MarketId,
        #[arg(short, long)]
        side: String,
        #[arg(short, long)]
        amount: Sats,
        #[arg(long)]
        sender: String,
    },
    Settle {
        #[arg(short, long)]
        id: MarketId,
    },
    Claim {
        #[arg(short, long)]
        id: MarketId,
        #[arg(short, long)]
        sender: String,
    },
    Info,
    Health,
    SeedDemo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let client = Client::new(cli.url);

    match cli.command {
        Commands::Markets => {
            let response = client.list_markets().await?;
            println!(
                "{} markets, current block {:?}",
                response.count, response.current_block
            );
            for market in response.markets {
                println!("{:#?}", market);
            }
        }
        Commands::Market { id } => {
            let response = client.get_market(id).await?;
            println!("{:#?}", response);
        }
        Commands::Create {
            target_price,
            settlement_block,
            description,
            payment,
        } => {
            let request = CreateMarketRequest {
                target_price,
                settlement_block,
                description,
            };
            let response = client.create_market(&request, Some(payment.as_str())).await;
            print_response(response).await?;
        }
        Commands::Bet {
            market,
            side,
            amount,
            sender,
        } => {
            let request = BetRequest {
                market_id: market,
                side: Side::from_str(side.as_str())?,
                amount,
                sender,
            };
            let response = client.describe_bet(&request).await;
            print_response(response).await?;
        }
        Commands::Settle { id } => {
            let response = client.settle_market(id).await;
            print_response(response).await?;
        }
        Commands::Claim { id, sender } => {
            let request = ClaimRequest {
                sender: Some(sender),
            };
            let response = client.describe_claim(id, &request).await;
            print_response(response).await?;
        }
        Commands::Info => {
            let response = client.info().await?;
            println!("{:#?}", response);
        }
        Commands::Health => {
            let response = client.health().await?;
            println!("{:#?}", response);
        }
        Commands::SeedDemo => {
            let response = client.seed_demo_market().await;
            print_response(response).await?;
        }
    }
    Ok(())
}

async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body = response.json::<serde_json::Value>().await?;
    println!("{}", status);
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
