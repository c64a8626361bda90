// src/sources.rs
//! Interfaces of the external collaborators the accounting core talks to.

use std::sync::Arc;

use alloy::primitives::{Address, I256};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::FetchError;

/// Handle to one super token contract.
#[async_trait]
pub trait SuperTokenContract: Send + Sync {
    async fn name(&self) -> Result<String, FetchError>;
    async fn symbol(&self) -> Result<String, FetchError>;
    async fn decimals(&self) -> Result<u8, FetchError>;
    async fn underlying_token(&self) -> Result<Address, FetchError>;
    async fn balance_of(&self, account: Address) -> Result<I256, FetchError>;
}

/// Builds contract handles. Construction may be costly, so the registry
/// caches what this returns.
pub trait ContractProvider: Send + Sync {
    fn super_token(&self, address: Address) -> Arc<dyn SuperTokenContract>;
}

/// Chain-confirmed timestamp of the flow between `sender` and `receiver`.
#[async_trait]
pub trait FlowTimestampSource: Send + Sync {
    async fn flow_timestamp(
        &self,
        token: Address,
        sender: Address,
        receiver: Address,
    ) -> Result<u64, FetchError>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn rates(&self, keys: &[String], currency: &str) -> Result<ConvertRates, FetchError>;
}

pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Price table keyed by `(price key, currency)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertRates {
    rates: HashMap<String, HashMap<String, Decimal>>,
}

impl ConvertRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, currency: &str, rate: Decimal) {
        self.rates
            .entry(key.to_uppercase())
            .or_default()
            .insert(currency.to_uppercase(), rate);
    }

    pub fn rate(&self, key: &str, currency: &str) -> Option<Decimal> {
        self.rates
            .get(&key.to_uppercase())
            .and_then(|by_currency| by_currency.get(&currency.to_uppercase()))
            .copied()
    }
}

impl From<HashMap<String, HashMap<String, Decimal>>> for ConvertRates {
    fn from(raw: HashMap<String, HashMap<String, Decimal>>) -> Self {
        let mut rates = ConvertRates::new();
        for (key, by_currency) in raw {
            for (currency, rate) in by_currency {
                rates.insert(&key, &currency, rate);
            }
        }
        rates
    }
}
