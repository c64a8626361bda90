use superflow_indexer::contracts::event_topic;
use superflow_indexer::models::LedgerEvent;
use superflow_indexer::parser::{decode_batch, FLOW_UPDATED};
use superflow_indexer::rpc::{LogFilter, RpcClient};

/// Polygon deployment of the constant flow agreement
const CFA: &str = "0x6EeE6060f715257b970700bc2656De21dEdF074C";
const RANGE: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let rpc_url = std::env::var("RPC_HTTP_URL").unwrap_or_else(|_| "https://polygon-rpc.com".to_string());
    let cfa = std::env::var("CFA_ADDRESS").unwrap_or_else(|_| CFA.to_string());

    let rpc = RpcClient::new(&rpc_url).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Fetching latest FlowUpdated logs from {}...", cfa);

    let latest_block = rpc.block_number().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Latest block: {}", latest_block);

    let logs = rpc
        .get_logs(&LogFilter {
            address: cfa,
            topics: vec![Some(event_topic(FLOW_UPDATED))],
            from_block: latest_block.saturating_sub(RANGE),
            to_block: latest_block,
        })
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let decoded = decode_batch(&logs);
    println!("Fetched {} logs, decoded {}", logs.len(), decoded.len());

    for entry in decoded.iter().take(5) {
        if let LedgerEvent::FlowUpdated(ev) = &entry.event {
            println!(
                "Tx: {} | Block: {} | Token: {} | {} -> {} | Rate: {}/s",
                entry.tx_hash, entry.block_number, ev.token, ev.sender, ev.receiver, ev.flow_rate
            );
        }
    }

    Ok(())
}
