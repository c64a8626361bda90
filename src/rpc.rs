// src/rpc.rs
use eyre::{eyre, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,

    #[serde(rename = "blockNumber")]
    pub block_number_hex: String,

    #[serde(rename = "transactionHash")]
    pub tx_hash: String,

    #[serde(rename = "logIndex")]
    pub log_index_hex: String,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcResponse<T> {
    Success { result: T },
    Error { error: RpcError },
}

impl<T> RpcResponse<T> {
    fn into_result(self, method: &str) -> Result<T> {
        match self {
            RpcResponse::Success { result } => Ok(result),
            RpcResponse::Error { error } => Err(eyre!(
                "{} failed: {} (code {})",
                method,
                error.message,
                error.code
            )),
        }
    }
}

/// Log filter for `eth_getLogs`. `None` topics match anything.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Minimal JSON-RPC client over HTTP.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    client: Client,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let resp = self.client.post(&self.url).json(&payload).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(eyre!("{} failed: HTTP {}", method, resp.status()));
        }
        let text = resp.text().await?;
        debug!("📩 Raw {} response: {}", method, text);

        let parsed: RpcResponse<T> = serde_json::from_str(&text)?;
        parsed.into_result(method)
    }

    /// Latest block number, retried up to 3 times
    pub async fn block_number(&self) -> Result<u64> {
        for attempt in 1..=3 {
            debug!("📡 Sending eth_blockNumber → {}", self.url);

            match self.call::<String>("eth_blockNumber", json!([])).await {
                Ok(hex_number) => return parse_quantity(&hex_number),
                Err(e) if attempt < 3 => {
                    warn!("RPC request failed (attempt {}): {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Err(e) => return Err(eyre!("RPC request failed after 3 retries: {}", e)),
            }
        }

        Err(eyre!("Unreachable: retries exhausted"))
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let topics: Vec<Value> = filter
            .topics
            .iter()
            .map(|t| t.as_ref().map_or(Value::Null, |t| Value::String(t.clone())))
            .collect();

        debug!(
            "📡 Sending eth_getLogs → {} (range {} → {}, address {})",
            self.url, filter.from_block, filter.to_block, filter.address
        );

        self.call(
            "eth_getLogs",
            json!([{
                "fromBlock": format!("0x{:x}", filter.from_block),
                "toBlock": format!("0x{:x}", filter.to_block),
                "address": filter.address,
                "topics": topics
            }]),
        )
        .await
    }

    /// `eth_call` against the latest block; returns the raw return data.
    pub async fn eth_call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let result: String = self
            .call(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;

        Ok(hex::decode(result.trim_start_matches("0x"))?)
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(hex_number: &str) -> Result<u64> {
    Ok(u64::from_str_radix(hex_number.trim_start_matches("0x"), 16)?)
}
