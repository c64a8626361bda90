// src/parser.rs
use alloy::primitives::Address;
use tracing::debug;

use crate::contracts::{decode_address, decode_i256, event_topic};
use crate::models::{AgentReassigned, FlowUpdated, LedgerEvent, VaultEvent};
use crate::rpc::{parse_quantity, Log};

pub const FLOW_UPDATED: &str =
    "FlowUpdated(address,address,address,int96,int256,int256,bytes)";
pub const VAULT_DEPOSIT: &str = "VaultDeposit(address,address,uint256)";
pub const VAULT_TRANSFER: &str = "VaultTransfer(address,address,uint256)";
pub const SET_AGENT: &str = "SetAgent(address)";

/// An event together with its position in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: String,
    pub event: LedgerEvent,
}

fn topic_to_address(topic: &str) -> Option<Address> {
    // topics are 32-byte (padded) hex strings; address is the last 20 bytes
    let bytes = hex::decode(topic.trim_start_matches("0x")).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(Address::from_slice(&bytes[12..32]))
}

fn decode_flow_updated(log: &Log, data: &[u8]) -> Option<LedgerEvent> {
    if log.topics.len() < 4 {
        return None;
    }
    Some(LedgerEvent::FlowUpdated(FlowUpdated {
        token: topic_to_address(&log.topics[1])?,
        sender: topic_to_address(&log.topics[2])?,
        receiver: topic_to_address(&log.topics[3])?,
        flow_rate: decode_i256(data, 0).ok()?,
        total_sender_flow_rate: decode_i256(data, 1).ok()?,
        total_receiver_flow_rate: decode_i256(data, 2).ok()?,
    }))
}

fn decode_vault_event(log: &Log) -> Option<LedgerEvent> {
    let token = topic_to_address(log.topics.get(1)?)?;
    // native currency movements carry the zero address
    if token == Address::ZERO {
        return None;
    }
    Some(LedgerEvent::VaultEvent(VaultEvent { token }))
}

fn decode_set_agent(log: &Log, data: &[u8]) -> Option<LedgerEvent> {
    let agent = match log.topics.get(1) {
        Some(topic) => topic_to_address(topic)?,
        None => decode_address(data, 0).ok()?,
    };
    Some(LedgerEvent::AgentReassigned(AgentReassigned { agent }))
}

/// Decode a single log into a ledger event
pub fn decode_event(log: &Log) -> Option<DecodedLog> {
    let topic0 = log.topics.first()?.to_lowercase();
    let data = hex::decode(log.data.trim_start_matches("0x")).ok()?;

    let event = if topic0 == event_topic(FLOW_UPDATED) {
        decode_flow_updated(log, &data)
    } else if topic0 == event_topic(VAULT_DEPOSIT) || topic0 == event_topic(VAULT_TRANSFER) {
        decode_vault_event(log)
    } else if topic0 == event_topic(SET_AGENT) {
        decode_set_agent(log, &data)
    } else {
        None
    };

    let Some(event) = event else {
        debug!("Skipping log {}:{} ({})", log.tx_hash, log.log_index_hex, topic0);
        return None;
    };

    Some(DecodedLog {
        block_number: parse_quantity(&log.block_number_hex).ok()?,
        log_index: parse_quantity(&log.log_index_hex).unwrap_or(0),
        tx_hash: log.tx_hash.clone(),
        event,
    })
}

/// Decode, drop duplicates and order by chain position.
pub fn decode_batch(logs: &[Log]) -> Vec<DecodedLog> {
    let mut decoded: Vec<DecodedLog> = logs.iter().filter_map(decode_event).collect();
    decoded.sort_by(|a, b| {
        (a.block_number, a.log_index, &a.tx_hash).cmp(&(b.block_number, b.log_index, &b.tx_hash))
    });
    decoded.dedup_by(|a, b| a.tx_hash == b.tx_hash && a.log_index == b.log_index);
    decoded
}
