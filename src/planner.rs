// src/planner.rs
//! Validation and pricing of a flow operation before it is submitted.

use alloy::primitives::{Address, I256};
use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};
use crate::ledger;
use crate::math;
use crate::models::{Flow, FlowKey, Snapshot};

/// A create/update request as entered by the user.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub token: Address,
    /// Receiver of an outgoing flow; ignored for incoming flows
    pub recipient: Address,
    /// Display units per second
    pub flow_rate: Decimal,
    pub outgoing: bool,
    /// Payer balance for incoming flows, in raw units
    pub sender_balance: Option<I256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPlan {
    pub token: Address,
    pub sender: Address,
    pub receiver: Address,
    pub requested_rate: I256,
    /// Rate to submit on chain, after merging with an existing flow
    pub new_flow_rate: I256,
    pub required_deposit: I256,
    pub existing_flow: Option<Flow>,
    pub is_update: bool,
}

/// Check `request` against the snapshot and work out what to submit.
///
/// Incoming flows are paid by `connected_account` into the agent; outgoing
/// flows are paid by the agent.
pub fn plan_flow(
    snapshot: &Snapshot,
    agent: Address,
    connected_account: Address,
    request: &FlowRequest,
    liquidation_period_seconds: u64,
    now: u64,
) -> Result<FlowPlan> {
    if request.outgoing && request.recipient == agent {
        return Err(LedgerError::FlowToAgent);
    }
    if request.flow_rate <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveFlowRate);
    }

    let token = snapshot
        .super_token(request.token)
        .ok_or(LedgerError::UnknownToken(request.token))?;

    let requested_rate =
        math::to_decimals(request.flow_rate, token.decimals).ok_or(LedgerError::AmountOverflow)?;
    if !requested_rate.is_positive() {
        // below the token's smallest unit per second
        return Err(LedgerError::NonPositiveFlowRate);
    }

    let (sender, receiver) = if request.outgoing {
        (agent, request.recipient)
    } else {
        (connected_account, agent)
    };
    let key = FlowKey {
        entity: if request.outgoing { receiver } else { sender },
        super_token_address: request.token,
        is_incoming: !request.outgoing,
    };
    let existing_flow = ledger::find_active(&snapshot.flows, key).map(|(_, flow)| flow.clone());

    let new_flow_rate = math::merged_flow_rate(existing_flow.as_ref(), requested_rate)?;
    let required_deposit = math::required_deposit(new_flow_rate, liquidation_period_seconds)?;

    let available = match (request.outgoing, request.sender_balance) {
        (false, Some(balance)) => balance,
        _ => token.current_balance(now)?,
    };
    if available < required_deposit {
        return Err(LedgerError::InsufficientBalance {
            symbol: token.symbol.clone(),
            required: required_deposit,
            available,
        });
    }

    Ok(FlowPlan {
        token: request.token,
        sender,
        receiver,
        requested_rate,
        new_flow_rate,
        required_deposit,
        is_update: existing_flow.is_some(),
        existing_flow,
    })
}
