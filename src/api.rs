// src/api.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use alloy::primitives::{Address, I256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ErrorCategory, LedgerError};
use crate::models::{DisplayBalance, Flow, Snapshot};
use crate::planner::{self, FlowPlan, FlowRequest};
use crate::sources::{Clock, ConvertRates, PriceSource};
use crate::view;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub snapshot: watch::Receiver<Arc<Snapshot>>,
    pub prices: Arc<dyn PriceSource>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }
}

#[derive(Deserialize)]
pub struct FlowsQuery {
    pub active: Option<bool>, // defaults to all entries
}

#[derive(Deserialize)]
pub struct PlanQuery {
    pub token: String,
    pub recipient: Option<String>,
    pub flow_rate: String,
    pub outgoing: Option<bool>, // defaults to true
    pub sender: Option<String>,
    pub sender_balance: Option<String>,
}

/// Amounts are 256-bit, so they travel as decimal strings
#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub balance: String,
    pub current_balance: String,
    pub net_flow: String,
    pub last_update_timestamp: u64,
    pub depletion_timestamp: Option<u64>,
    pub converted_amount: Option<Decimal>,
    pub converted_net_flow: Option<Decimal>,
}

impl From<DisplayBalance> for BalanceView {
    fn from(b: DisplayBalance) -> Self {
        BalanceView {
            address: b.address.to_string(),
            name: b.name,
            symbol: b.symbol,
            decimals: b.decimals,
            balance: b.balance.to_string(),
            current_balance: b.current_balance.to_string(),
            net_flow: b.net_flow.to_string(),
            last_update_timestamp: b.last_update_timestamp,
            depletion_timestamp: b.depletion_timestamp,
            converted_amount: b.converted_amount,
            converted_net_flow: b.converted_net_flow,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowView {
    pub entity: String,
    pub super_token_address: String,
    pub is_incoming: bool,
    pub flow_rate: String,
    pub creation_timestamp: u64,
    pub last_timestamp: u64,
    pub accumulated_amount: String,
    pub streamed_amount: Option<String>,
    pub is_cancelled: bool,
}

impl FlowView {
    fn new(flow: &Flow, now: u64) -> Self {
        FlowView {
            entity: flow.entity.to_string(),
            super_token_address: flow.super_token_address.to_string(),
            is_incoming: flow.is_incoming,
            flow_rate: flow.flow_rate.to_string(),
            creation_timestamp: flow.creation_timestamp,
            last_timestamp: flow.last_timestamp,
            accumulated_amount: flow.accumulated_amount.to_string(),
            streamed_amount: flow.streamed_amount(now).ok().map(|a| a.to_string()),
            is_cancelled: flow.is_cancelled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanView {
    pub token: String,
    pub sender: String,
    pub receiver: String,
    pub requested_rate: String,
    pub new_flow_rate: String,
    pub required_deposit: String,
    pub is_update: bool,
    pub existing_flow: Option<FlowView>,
}

impl PlanView {
    fn new(plan: FlowPlan, now: u64) -> Self {
        PlanView {
            token: plan.token.to_string(),
            sender: plan.sender.to_string(),
            receiver: plan.receiver.to_string(),
            requested_rate: plan.requested_rate.to_string(),
            new_flow_rate: plan.new_flow_rate.to_string(),
            required_deposit: plan.required_deposit.to_string(),
            is_update: plan.is_update,
            existing_flow: plan.existing_flow.as_ref().map(|f| FlowView::new(f, now)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg.into() }))
}

fn ledger_error(e: LedgerError) -> ApiError {
    let status = match e.category() {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Fetch => StatusCode::BAD_GATEWAY,
        ErrorCategory::Unsupported => StatusCode::NOT_IMPLEMENTED,
    };
    (status, Json(ErrorBody { error: e.to_string() }))
}

fn parse_address(field: &str, value: &str) -> Result<Address, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("{} must be a valid address", field)))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Superflow Indexer API running" }))
        .route("/balances", get(get_balances))
        .route("/flows", get(get_flows))
        .route("/plan", get(get_plan))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState) -> eyre::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], state.cfg.port));
    let app = router(state);
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn get_balances(State(state): State<AppState>) -> Json<Vec<BalanceView>> {
    let snapshot = state.current();
    let is_test_network = state.cfg.is_test_network;

    let mut keys: Vec<String> = snapshot
        .super_tokens
        .iter()
        .map(|t| view::price_key(t, is_test_network))
        .collect();
    keys.sort();
    keys.dedup();

    let rates = match state.prices.rates(&keys, &state.cfg.currency).await {
        Ok(rates) => rates,
        Err(e) => {
            warn!("Price lookup failed: {}", e);
            ConvertRates::new()
        }
    };

    let balances = view::project(
        &snapshot.super_tokens,
        &rates,
        &state.cfg.currency,
        is_test_network,
        state.clock.now(),
    );
    Json(balances.into_iter().map(BalanceView::from).collect())
}

async fn get_flows(State(state): State<AppState>, Query(q): Query<FlowsQuery>) -> Json<Vec<FlowView>> {
    let snapshot = state.current();
    let now = state.clock.now();
    let active_only = q.active.unwrap_or(false);

    Json(
        snapshot
            .flows
            .iter()
            .filter(|f| !active_only || f.is_active())
            .map(|f| FlowView::new(f, now))
            .collect(),
    )
}

async fn get_plan(
    State(state): State<AppState>,
    Query(q): Query<PlanQuery>,
) -> Result<Json<PlanView>, ApiError> {
    let outgoing = q.outgoing.unwrap_or(true);
    let token = parse_address("token", &q.token)?;
    let recipient = match (&q.recipient, outgoing) {
        (Some(r), _) => parse_address("recipient", r)?,
        (None, true) => return Err(bad_request("recipient is required for outgoing flows")),
        (None, false) => state.cfg.agent_address,
    };
    let connected_account = match &q.sender {
        Some(s) => parse_address("sender", s)?,
        None if outgoing => state.cfg.agent_address,
        None => return Err(bad_request("sender is required for incoming flows")),
    };
    let flow_rate: Decimal = q
        .flow_rate
        .trim()
        .parse()
        .map_err(|_| bad_request("flow_rate must be a decimal number"))?;
    let sender_balance = match &q.sender_balance {
        Some(raw) => Some(
            raw.trim()
                .parse::<I256>()
                .map_err(|_| bad_request("sender_balance must be an integer"))?,
        ),
        None => None,
    };

    let request = FlowRequest {
        token,
        recipient,
        flow_rate,
        outgoing,
        sender_balance,
    };
    let now = state.clock.now();
    let plan = planner::plan_flow(
        &state.current(),
        state.cfg.agent_address,
        connected_account,
        &request,
        state.cfg.liquidation_period_seconds,
        now,
    )
    .map_err(ledger_error)?;

    Ok(Json(PlanView::new(plan, now)))
}
