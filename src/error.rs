// src/error.rs
use alloy::primitives::{Address, I256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failure reported by an external collaborator (RPC node, price API).
/// Transient and permanent failures are not told apart at this layer.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

impl FetchError {
    pub fn new(msg: impl Into<String>) -> Self {
        FetchError(msg.into())
    }
}

impl From<eyre::Report> for FetchError {
    fn from(e: eyre::Report) -> Self {
        let chain: Vec<String> = e.chain().map(|cause| cause.to_string()).collect();
        FetchError(chain.join(": "))
    }
}

/// Coarse grouping used at the outer boundary to tell bad input apart
/// from missing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Fetch,
    Unsupported,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Streams are never rewound
    #[error("invalid interval: elapsed time {0}s is negative")]
    InvalidInterval(i64),

    #[error("merging rate {requested} into existing rate {existing} would go negative")]
    NegativeResultingRate { existing: I256, requested: I256 },

    #[error("rate must not be negative, got {0}")]
    NegativeRate(I256),

    #[error("amount overflow")]
    AmountOverflow,

    #[error("outgoing flows cannot target the agent")]
    FlowToAgent,

    #[error("flow rate must be greater than zero")]
    NonPositiveFlowRate,

    #[error("unknown super token {0}")]
    UnknownToken(Address),

    #[error("required deposit {required} exceeds current {symbol} balance {available}")]
    InsufficientBalance {
        symbol: String,
        required: I256,
        available: I256,
    },

    #[error("token metadata unavailable for {token}")]
    TokenMetadataUnavailable {
        token: Address,
        #[source]
        source: FetchError,
    },

    #[error("balance fetch failed for {token}")]
    BalanceFetchFailed {
        token: Address,
        #[source]
        source: FetchError,
    },

    #[error("flow timestamp fetch failed for {token} {sender} -> {receiver}")]
    FlowTimestampFetchFailed {
        token: Address,
        sender: Address,
        receiver: Address,
        #[source]
        source: FetchError,
    },

    #[error("agent reassignment to {new_agent} is not supported")]
    AgentReassignmentUnsupported { new_agent: Address },
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::InvalidInterval(_)
            | LedgerError::NegativeResultingRate { .. }
            | LedgerError::NegativeRate(_)
            | LedgerError::AmountOverflow
            | LedgerError::FlowToAgent
            | LedgerError::NonPositiveFlowRate
            | LedgerError::UnknownToken(_)
            | LedgerError::InsufficientBalance { .. } => ErrorCategory::Validation,
            LedgerError::TokenMetadataUnavailable { .. }
            | LedgerError::BalanceFetchFailed { .. }
            | LedgerError::FlowTimestampFetchFailed { .. } => ErrorCategory::Fetch,
            LedgerError::AgentReassignmentUnsupported { .. } => ErrorCategory::Unsupported,
        }
    }
}
