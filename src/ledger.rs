// src/ledger.rs
//! Flows between the agent and its counterparties.
//!
//! Entries are never removed. A terminated flow stays where it is with
//! `is_cancelled` set, so positions and identities of other entries are
//! stable across snapshots.

use alloy::primitives::{Address, I256};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::math;
use crate::models::{Flow, FlowKey, FlowUpdated};
use crate::sources::FlowTimestampSource;

/// Identity of the flow a `FlowUpdated` event refers to, seen from `agent`.
pub fn flow_key(agent: Address, event: &FlowUpdated) -> FlowKey {
    let is_incoming = event.receiver == agent;
    FlowKey {
        entity: if is_incoming { event.sender } else { event.receiver },
        super_token_address: event.token,
        is_incoming,
    }
}

/// Active entry for `key`, if any.
pub fn find_active(flows: &[Flow], key: FlowKey) -> Option<(usize, &Flow)> {
    flows
        .iter()
        .enumerate()
        .find(|(_, flow)| flow.is_active() && flow.key() == key)
}

/// Fetch the chain timestamp for the event's flow and apply it.
pub async fn apply_flow_event(
    flows: &[Flow],
    agent: Address,
    event: &FlowUpdated,
    timestamps: &dyn FlowTimestampSource,
) -> Result<Vec<Flow>> {
    let key = flow_key(agent, event);

    let timestamp = timestamps
        .flow_timestamp(event.token, event.sender, event.receiver)
        .await
        .map_err(|source| LedgerError::FlowTimestampFetchFailed {
            token: event.token,
            sender: event.sender,
            receiver: event.receiver,
            source,
        })?;

    apply_flow_update(flows, key, event.flow_rate, timestamp)
}

/// Create, update or cancel the flow identified by `key`.
///
/// Replaying an update with the same timestamp yields the same entry, since
/// the accrual over a zero interval is a no-op.
pub fn apply_flow_update(
    flows: &[Flow],
    key: FlowKey,
    flow_rate: I256,
    timestamp: u64,
) -> Result<Vec<Flow>> {
    let existing = find_active(flows, key).map(|(index, _)| index);
    let is_open = flow_rate.is_positive();

    let mut next = flows.to_vec();

    match existing {
        None if is_open => {
            debug!(
                "Creating flow with {} in {} at {} (rate {})",
                key.entity, key.super_token_address, timestamp, flow_rate
            );
            next.push(Flow {
                entity: key.entity,
                super_token_address: key.super_token_address,
                is_incoming: key.is_incoming,
                flow_rate,
                creation_timestamp: timestamp,
                last_timestamp: timestamp,
                accumulated_amount: I256::ZERO,
                is_cancelled: false,
            });
        }
        // late or repeated termination of a flow we no longer track
        None => return Ok(next),
        Some(index) if is_open => {
            let previous = next[index].clone();
            let accumulated_amount = math::accrued_amount(
                previous.accumulated_amount,
                previous.flow_rate,
                math::elapsed_seconds(previous.last_timestamp, timestamp),
            )?;
            debug!(
                "Updating flow with {} in {}: rate {} -> {}",
                key.entity, key.super_token_address, previous.flow_rate, flow_rate
            );
            next[index] = Flow {
                flow_rate,
                last_timestamp: timestamp,
                accumulated_amount,
                ..previous
            };
        }
        Some(index) => {
            debug!("Cancelling flow with {} in {}", key.entity, key.super_token_address);
            next[index].is_cancelled = true;
        }
    }

    Ok(next)
}
