// src/indexer.rs
use eyre::{eyre, Result};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::contracts::{address_topic, event_topic};
use crate::models::LedgerEvent;
use crate::parser::{self, FLOW_UPDATED, SET_AGENT, VAULT_DEPOSIT, VAULT_TRANSFER};
use crate::rpc::{Log, LogFilter, RpcClient};

const MAX_RETRY_DELAY_SECS: u64 = 120;

/// Log queries covering every event the reconciler cares about in `[from, to]`.
pub fn filters(cfg: &Config, from_block: u64, to_block: u64) -> Vec<LogFilter> {
    let agent = Some(address_topic(cfg.agent_address));
    let cfa = cfg.cfa_address.to_string();
    let agent_address = cfg.agent_address.to_string();

    let filter = |address: &str, topics: Vec<Option<String>>| LogFilter {
        address: address.to_string(),
        topics,
        from_block,
        to_block,
    };

    let mut filters = vec![
        // agent as sender, then as receiver
        filter(&cfa, vec![Some(event_topic(FLOW_UPDATED)), None, agent.clone()]),
        filter(&cfa, vec![Some(event_topic(FLOW_UPDATED)), None, None, agent]),
        filter(&agent_address, vec![Some(event_topic(VAULT_DEPOSIT))]),
        filter(&agent_address, vec![Some(event_topic(VAULT_TRANSFER))]),
    ];
    if let Some(app) = cfg.app_address {
        filters.push(filter(&app.to_string(), vec![Some(event_topic(SET_AGENT))]));
    }
    filters
}

async fn fetch_range(rpc: &RpcClient, cfg: &Config, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
    let mut logs = Vec::new();
    for filter in filters(cfg, from_block, to_block) {
        logs.extend(rpc.get_logs(&filter).await?);
    }
    Ok(logs)
}

/// Poll the node and push decoded events, in chain order, to the reconciler.
pub async fn run(cfg: Config, rpc: RpcClient, events: mpsc::Sender<LedgerEvent>) -> Result<()> {
    let rpc_pause = Duration::from_millis(200); // pause between RPC requests
    let mut retry_delay = cfg.poll_interval_secs;
    // last block whose logs were all delivered
    let mut cursor: Option<u64> = None;

    info!("Indexer started with lookback = {} blocks", cfg.lookback_blocks);

    loop {
        match rpc.block_number().await {
            Ok(latest_block) => {
                retry_delay = cfg.poll_interval_secs;
                let target_block = latest_block.saturating_sub(cfg.confirmations);
                let start_block = match cursor {
                    Some(done) => done + 1,
                    None => {
                        let start = cfg
                            .start_block
                            .unwrap_or_else(|| target_block.saturating_sub(cfg.backfill_blocks));
                        info!("Backfill: scanning {} → {}", start, target_block);
                        start
                    }
                };

                let mut from = start_block;
                let mut delivered = 0usize;
                while from <= target_block {
                    let to = from.saturating_add(cfg.lookback_blocks - 1).min(target_block);

                    match fetch_range(&rpc, &cfg, from, to).await {
                        Ok(logs) => {
                            for decoded in parser::decode_batch(&logs) {
                                debug!(
                                    "{} at block {} (log {})",
                                    decoded.event.kind(),
                                    decoded.block_number,
                                    decoded.log_index
                                );
                                events
                                    .send(decoded.event)
                                    .await
                                    .map_err(|_| eyre!("reconciler stopped"))?;
                                delivered += 1;
                            }
                            cursor = Some(to);
                            from = to + 1;
                        }
                        Err(e) => {
                            warn!("Fetch logs failed for {} → {}: {:?}", from, to, e);
                            retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY_SECS);
                            break;
                        }
                    }

                    sleep(rpc_pause).await; // avoid hammering
                }

                if start_block <= target_block {
                    info!("Indexed up to block {} → {} events", target_block, delivered);
                }
            }
            Err(e) => {
                warn!("RPC failed this round: {:?}", e);
                retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY_SECS);
            }
        }

        sleep(Duration::from_secs(retry_delay)).await;
    }
}
