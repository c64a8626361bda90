// src/registry.rs
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use alloy::primitives::{Address, I256};
use futures_util::future::try_join4;
use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::models::{SuperToken, TokenMetadata};
use crate::sources::{ContractProvider, SuperTokenContract};

/// Contract handles keyed by token address, written once per key.
#[derive(Default)]
pub struct HandleCache {
    handles: RwLock<HashMap<Address, Arc<dyn SuperTokenContract>>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<F>(&self, address: Address, create: F) -> Arc<dyn SuperTokenContract>
    where
        F: FnOnce() -> Arc<dyn SuperTokenContract>,
    {
        if let Some(handle) = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
        {
            return Arc::clone(handle);
        }

        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(handles.entry(address).or_insert_with(create))
    }

    pub fn len(&self) -> usize {
        self.handles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Known super tokens and the agent's balance in each.
///
/// Every operation takes the current token list and returns a new one; the
/// input is never modified, so a failed fetch leaves the caller's list intact.
pub struct TokenRegistry {
    provider: Arc<dyn ContractProvider>,
    handles: Arc<HandleCache>,
}

impl TokenRegistry {
    pub fn new(provider: Arc<dyn ContractProvider>, handles: Arc<HandleCache>) -> Self {
        Self { provider, handles }
    }

    /// Cached contract handle for `address`.
    pub fn contract(&self, address: Address) -> Arc<dyn SuperTokenContract> {
        self.handles.get_or_create(address, || {
            debug!("Creating contract handle for {}", address);
            self.provider.super_token(address)
        })
    }

    /// Record an observed balance (and net flow when known) for `address`,
    /// fetching metadata first if the token has not been seen.
    pub async fn upsert(
        &self,
        tokens: &[SuperToken],
        address: Address,
        observed_balance: I256,
        observed_net_flow: Option<I256>,
        now: u64,
    ) -> Result<Vec<SuperToken>> {
        let metadata = if find(tokens, address).is_none() {
            let contract = self.contract(address);
            Some(fetch_metadata(contract.as_ref(), address).await?)
        } else {
            None
        };

        Ok(apply(tokens, address, metadata, observed_balance, observed_net_flow, now))
    }

    /// Re-read `account`'s balance of `address` and record it through
    /// [`upsert`](Self::upsert).
    pub async fn refresh(
        &self,
        tokens: &[SuperToken],
        address: Address,
        account: Address,
        observed_net_flow: Option<I256>,
        now: u64,
    ) -> Result<Vec<SuperToken>> {
        let balance = self
            .contract(address)
            .balance_of(account)
            .await
            .map_err(|source| LedgerError::BalanceFetchFailed { token: address, source })?;

        self.upsert(tokens, address, balance, observed_net_flow, now).await
    }
}

fn find(tokens: &[SuperToken], address: Address) -> Option<usize> {
    tokens.iter().position(|t| t.address == address)
}

async fn fetch_metadata(contract: &dyn SuperTokenContract, address: Address) -> Result<TokenMetadata> {
    let (name, symbol, decimals, underlying_token) = try_join4(
        contract.name(),
        contract.symbol(),
        contract.decimals(),
        contract.underlying_token(),
    )
    .await
    .map_err(|source| LedgerError::TokenMetadataUnavailable { token: address, source })?;

    info!("New super token {} ({}) at {}", name, symbol, address);

    Ok(TokenMetadata {
        name,
        symbol,
        decimals,
        underlying_token,
    })
}

fn apply(
    tokens: &[SuperToken],
    address: Address,
    metadata: Option<TokenMetadata>,
    balance: I256,
    net_flow: Option<I256>,
    now: u64,
) -> Vec<SuperToken> {
    let mut next = tokens.to_vec();

    match (find(tokens, address), metadata) {
        (Some(index), _) => {
            let token = &mut next[index];
            token.balance = balance;
            token.last_update_timestamp = now;
            if let Some(net_flow) = net_flow {
                token.net_flow = net_flow;
            }
        }
        (None, Some(metadata)) => next.push(SuperToken {
            address,
            name: metadata.name,
            symbol: metadata.symbol,
            decimals: metadata.decimals,
            underlying_token: metadata.underlying_token,
            balance,
            net_flow: net_flow.unwrap_or(I256::ZERO),
            last_update_timestamp: now,
        }),
        // metadata is always fetched for unseen tokens
        (None, None) => {}
    }

    next
}
