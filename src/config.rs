// src/config.rs
use alloy::primitives::Address;
use dotenvy::dotenv;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    /// Account whose balances and flows are tracked
    pub agent_address: Address,
    /// App emitting `SetAgent`; agent changes are not watched when unset
    pub app_address: Option<Address>,
    /// Constant flow agreement emitting `FlowUpdated`
    pub cfa_address: Address,
    pub start_block: Option<u64>,
    pub backfill_blocks: u64,
    pub lookback_blocks: u64,
    pub confirmations: u64,
    pub poll_interval_secs: u64,
    pub port: u16,
    pub liquidation_period_seconds: u64,
    pub price_api_url: String,
    pub currency: String,
    pub is_test_network: bool,
}

/// Polygon deployment of the constant flow agreement
const DEFAULT_CFA: &str = "0x6EeE6060f715257b970700bc2656De21dEdF074C";

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn address(key: &str) -> Result<Option<Address>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<Address>()
            .map(Some)
            .wrap_err_with(|| format!("{} is not a valid address", key)),
        _ => Ok(None),
    }
}

pub fn load() -> Result<Config> {
    dotenv().ok(); // Load from .env file

    // RPC URL (prefer RPC_HTTP_URL, fallback to polygon-rpc.com)
    let rpc_http_url = env::var("RPC_HTTP_URL")
        .or_else(|_| env::var("POLYGON_RPC"))
        .unwrap_or_else(|_| "https://polygon-rpc.com".to_string());

    let agent_address = address("AGENT_ADDRESS")?.ok_or_else(|| eyre!("AGENT_ADDRESS is required"))?;
    let app_address = address("APP_ADDRESS")?;
    let cfa_address = match address("CFA_ADDRESS")? {
        Some(cfa) => cfa,
        None => DEFAULT_CFA.parse()?,
    };

    let cfg = Config {
        rpc_http_url,
        agent_address,
        app_address,
        cfa_address,
        start_block: env::var("START_BLOCK").ok().and_then(|v| v.trim().parse().ok()),
        backfill_blocks: parsed_or("BACKFILL_BLOCKS", 5000),
        lookback_blocks: parsed_or("LOOKBACK_BLOCKS", 100).max(1),
        confirmations: parsed_or("CONFIRMATIONS", 2),
        poll_interval_secs: parsed_or("POLL_INTERVAL_SECS", 10),
        port: parsed_or("PORT", 8080),
        // four hours, the protocol default
        liquidation_period_seconds: parsed_or("LIQUIDATION_PERIOD_SECONDS", 14_400),
        price_api_url: env::var("PRICE_API_URL")
            .unwrap_or_else(|_| "https://min-api.cryptocompare.com/data/pricemulti".to_string()),
        currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
        is_test_network: parsed_or("IS_TEST_NETWORK", false),
    };

    Ok(cfg)
}
