// src/models.rs
use alloy::primitives::{Address, I256};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::math;

/// A wrapped ERC20 with streaming support, as seen from the agent's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperToken {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub underlying_token: Address,
    /// On-chain balance as of `last_update_timestamp`
    pub balance: I256,
    /// Net rate per second at `last_update_timestamp`; negative when depleting
    pub net_flow: I256,
    pub last_update_timestamp: u64,
}

impl SuperToken {
    /// Live balance at `now`, never below zero.
    pub fn current_balance(&self, now: u64) -> Result<I256> {
        math::current_amount(self.balance, self.net_flow, self.last_update_timestamp, now)
    }

    pub fn depletion_timestamp(&self) -> Option<u64> {
        math::depletion_timestamp(self.balance, self.net_flow, self.last_update_timestamp)
    }
}

/// Immutable token metadata, fetched once per address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub underlying_token: Address,
}

/// Identity of a flow: at most one active flow exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub entity: Address,
    pub super_token_address: Address,
    pub is_incoming: bool,
}

/// A constant-rate stream between the agent and one counterparty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    /// Counterparty: the sender for incoming flows, the receiver otherwise
    pub entity: Address,
    pub super_token_address: Address,
    pub is_incoming: bool,
    pub flow_rate: I256,
    pub creation_timestamp: u64,
    pub last_timestamp: u64,
    /// Streamed between `creation_timestamp` and `last_timestamp`
    pub accumulated_amount: I256,
    pub is_cancelled: bool,
}

impl Flow {
    pub fn key(&self) -> FlowKey {
        FlowKey {
            entity: self.entity,
            super_token_address: self.super_token_address,
            is_incoming: self.is_incoming,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_cancelled
    }

    /// Total moved by this flow up to `now`. Cancelled flows stop at their
    /// last accumulated amount.
    pub fn streamed_amount(&self, now: u64) -> Result<I256> {
        if self.is_cancelled {
            return Ok(self.accumulated_amount);
        }
        math::accrued_amount(
            self.accumulated_amount,
            self.flow_rate,
            math::elapsed_seconds(self.last_timestamp, now),
        )
    }
}

/// State handed to consumers. Never mutated once published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub super_tokens: Vec<SuperToken>,
    pub flows: Vec<Flow>,
}

impl Snapshot {
    pub fn super_token(&self, address: Address) -> Option<&SuperToken> {
        self.super_tokens.iter().find(|t| t.address == address)
    }

    pub fn active_flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.iter().filter(|f| f.is_active())
    }
}

/// `FlowUpdated` log of the constant flow agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowUpdated {
    pub token: Address,
    pub sender: Address,
    pub receiver: Address,
    pub flow_rate: I256,
    pub total_sender_flow_rate: I256,
    pub total_receiver_flow_rate: I256,
}

/// Deposit into or transfer out of the agent's vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEvent {
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReassigned {
    pub agent: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    FlowUpdated(FlowUpdated),
    VaultEvent(VaultEvent),
    AgentReassigned(AgentReassigned),
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::FlowUpdated(_) => "FlowUpdated",
            LedgerEvent::VaultEvent(_) => "VaultEvent",
            LedgerEvent::AgentReassigned(_) => "AgentReassigned",
        }
    }
}

/// Presentation row for one super token balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBalance {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Snapshot balance as last observed on chain
    pub balance: I256,
    /// Live balance at projection time
    pub current_balance: I256,
    pub net_flow: I256,
    pub last_update_timestamp: u64,
    pub depletion_timestamp: Option<u64>,
    pub converted_amount: Option<Decimal>,
    pub converted_net_flow: Option<Decimal>,
}
