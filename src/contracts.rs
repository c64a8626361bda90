// src/contracts.rs
//! Super token and flow agreement handles backed by `eth_call`.

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, I256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};

use crate::error::FetchError;
use crate::rpc::RpcClient;
use crate::sources::{ContractProvider, FlowTimestampSource, SuperTokenContract};

/// First four bytes of the keccak of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Hex topic of an event signature
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// An address left-padded to a 32-byte topic
pub fn address_topic(address: Address) -> String {
    format!("0x{}{}", "0".repeat(24), hex::encode(address))
}

pub fn encode_call(signature: &str, args: &[Address]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    for arg in args {
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(arg.as_slice());
    }
    data
}

fn word(data: &[u8], index: usize) -> Result<&[u8]> {
    let start = index * 32;
    data.get(start..start + 32)
        .ok_or_else(|| eyre!("return data too short: {} bytes, need word {}", data.len(), index))
}

pub fn decode_u256(data: &[u8], index: usize) -> Result<U256> {
    U256::try_from_be_slice(word(data, index)?).ok_or_else(|| eyre!("invalid uint256"))
}

pub fn decode_i256(data: &[u8], index: usize) -> Result<I256> {
    Ok(I256::from_raw(decode_u256(data, index)?))
}

pub fn decode_u64(data: &[u8], index: usize) -> Result<u64> {
    let w = word(data, index)?;
    if w[..24].iter().any(|b| *b != 0) {
        return Err(eyre!("value does not fit in u64"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(bytes))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address> {
    let w = word(data, index)?;
    Ok(Address::from_slice(&w[12..]))
}

/// ABI `string`, falling back to a zero-padded `bytes32` for tokens that
/// predate the standard.
pub fn decode_string(data: &[u8]) -> Result<String> {
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return Ok(String::from_utf8(data[..end].to_vec())?);
    }

    let offset = usize::try_from(decode_u64(data, 0)?)?;
    let start = offset
        .checked_add(32)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| eyre!("string offset {} out of range", offset))?;
    let len = usize::try_from(decode_u64(&data[offset..start], 0)?)?;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| eyre!("string length {} out of range", len))?;

    Ok(String::from_utf8(bytes.to_vec())?)
}

/// One super token, read through `eth_call`.
pub struct RpcSuperToken {
    rpc: RpcClient,
    address: Address,
}

impl RpcSuperToken {
    pub fn new(rpc: RpcClient, address: Address) -> Self {
        Self { rpc, address }
    }

    async fn call(&self, signature: &str, args: &[Address]) -> Result<Vec<u8>> {
        self.rpc
            .eth_call(&self.address.to_string(), &encode_call(signature, args))
            .await
    }
}

#[async_trait]
impl SuperTokenContract for RpcSuperToken {
    async fn name(&self) -> Result<String, FetchError> {
        Ok(decode_string(&self.call("name()", &[]).await?)?)
    }

    async fn symbol(&self) -> Result<String, FetchError> {
        Ok(decode_string(&self.call("symbol()", &[]).await?)?)
    }

    async fn decimals(&self) -> Result<u8, FetchError> {
        let raw = decode_u64(&self.call("decimals()", &[]).await?, 0)?;
        u8::try_from(raw).map_err(|_| FetchError::new(format!("decimals out of range: {}", raw)))
    }

    async fn underlying_token(&self) -> Result<Address, FetchError> {
        Ok(decode_address(&self.call("getUnderlyingToken()", &[]).await?, 0)?)
    }

    async fn balance_of(&self, account: Address) -> Result<I256, FetchError> {
        let raw = decode_u256(&self.call("balanceOf(address)", &[account]).await?, 0)?;
        let balance = I256::from_raw(raw);
        if balance.is_negative() {
            return Err(FetchError::new(format!("balance out of range: {}", raw)));
        }
        Ok(balance)
    }
}

/// Builds [`RpcSuperToken`] handles sharing one HTTP client.
pub struct RpcContractProvider {
    rpc: RpcClient,
}

impl RpcContractProvider {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

impl ContractProvider for RpcContractProvider {
    fn super_token(&self, address: Address) -> Arc<dyn SuperTokenContract> {
        Arc::new(RpcSuperToken::new(self.rpc.clone(), address))
    }
}

/// Reads flow timestamps from the constant flow agreement.
pub struct CfaFlowTimestamps {
    rpc: RpcClient,
    cfa: Address,
}

impl CfaFlowTimestamps {
    pub fn new(rpc: RpcClient, cfa: Address) -> Self {
        Self { rpc, cfa }
    }
}

#[async_trait]
impl FlowTimestampSource for CfaFlowTimestamps {
    async fn flow_timestamp(
        &self,
        token: Address,
        sender: Address,
        receiver: Address,
    ) -> Result<u64, FetchError> {
        // getFlow returns (timestamp, flowRate, deposit, owedDeposit)
        let data = self
            .rpc
            .eth_call(
                &self.cfa.to_string(),
                &encode_call("getFlow(address,address,address)", &[token, sender, receiver]),
            )
            .await?;
        Ok(decode_u64(&data, 0)?)
    }
}
