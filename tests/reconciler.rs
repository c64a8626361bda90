use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, I256};
use async_trait::async_trait;
use tokio::sync::mpsc;

use superflow_indexer::models::{AgentReassigned, FlowUpdated, VaultEvent};
use superflow_indexer::sources::{
    Clock, ContractProvider, ConvertRates, FlowTimestampSource, SuperTokenContract,
};
use superflow_indexer::{
    view, ErrorCategory, FetchError, Flow, HandleCache, LedgerError, LedgerEvent, Reconciler,
    Snapshot, SuperToken, TokenRegistry,
};

const AGENT: Address = Address::new([0xaa; 20]);
const X: Address = Address::new([0x0b; 20]);
const Y: Address = Address::new([0x0c; 20]);
const T: Address = Address::new([0x22; 20]);

fn amt(v: i64) -> I256 {
    I256::try_from(v).unwrap()
}

/// In-memory chain: balances, flow timestamps and failure switches.
#[derive(Default)]
struct FakeChain {
    balances: Mutex<HashMap<Address, I256>>,
    flow_timestamps: Mutex<HashMap<(Address, Address, Address), u64>>,
    fail_balance: AtomicBool,
    fail_timestamps: AtomicBool,
    /// Answers served ahead of `flow_timestamps`, `None` fails that read
    scripted_timestamps: Mutex<VecDeque<Option<u64>>>,
}

impl FakeChain {
    fn set_balance(&self, token: Address, balance: i64) {
        self.balances.lock().unwrap().insert(token, amt(balance));
    }

    fn set_flow_timestamp(&self, token: Address, sender: Address, receiver: Address, ts: u64) {
        self.flow_timestamps
            .lock()
            .unwrap()
            .insert((token, sender, receiver), ts);
    }
}

struct FakeToken {
    chain: Arc<FakeChain>,
    address: Address,
}

#[async_trait]
impl SuperTokenContract for FakeToken {
    async fn name(&self) -> Result<String, FetchError> {
        Ok("Super Token".to_string())
    }
    async fn symbol(&self) -> Result<String, FetchError> {
        Ok("TKNx".to_string())
    }
    async fn decimals(&self) -> Result<u8, FetchError> {
        Ok(18)
    }
    async fn underlying_token(&self) -> Result<Address, FetchError> {
        Ok(Address::ZERO)
    }
    async fn balance_of(&self, _account: Address) -> Result<I256, FetchError> {
        if self.chain.fail_balance.load(Ordering::SeqCst) {
            return Err(FetchError::new("node unavailable"));
        }
        Ok(self
            .chain
            .balances
            .lock()
            .unwrap()
            .get(&self.address)
            .copied()
            .unwrap_or(I256::ZERO))
    }
}

struct FakeProvider(Arc<FakeChain>);

impl ContractProvider for FakeProvider {
    fn super_token(&self, address: Address) -> Arc<dyn SuperTokenContract> {
        Arc::new(FakeToken {
            chain: self.0.clone(),
            address,
        })
    }
}

struct FakeTimestamps(Arc<FakeChain>);

#[async_trait]
impl FlowTimestampSource for FakeTimestamps {
    async fn flow_timestamp(
        &self,
        token: Address,
        sender: Address,
        receiver: Address,
    ) -> Result<u64, FetchError> {
        if self.0.fail_timestamps.load(Ordering::SeqCst) {
            return Err(FetchError::new("node unavailable"));
        }
        if let Some(scripted) = self.0.scripted_timestamps.lock().unwrap().pop_front() {
            return scripted.ok_or_else(|| FetchError::new("node unavailable"));
        }
        Ok(self
            .0
            .flow_timestamps
            .lock()
            .unwrap()
            .get(&(token, sender, receiver))
            .copied()
            .unwrap_or(0))
    }
}

struct FixedClock(AtomicU64);

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn setup() -> (Reconciler, Arc<FakeChain>, Arc<FixedClock>) {
    let chain = Arc::new(FakeChain::default());
    let clock = Arc::new(FixedClock(AtomicU64::new(1000)));
    let registry = TokenRegistry::new(
        Arc::new(FakeProvider(chain.clone())),
        Arc::new(HandleCache::new()),
    );
    let (reconciler, _rx) = Reconciler::new(
        AGENT,
        registry,
        Arc::new(FakeTimestamps(chain.clone())),
        clock.clone(),
        Snapshot::default(),
    );
    (reconciler, chain, clock)
}

fn outgoing(receiver: Address, rate: i64) -> LedgerEvent {
    LedgerEvent::FlowUpdated(FlowUpdated {
        token: T,
        sender: AGENT,
        receiver,
        flow_rate: amt(rate),
        total_sender_flow_rate: amt(-rate),
        total_receiver_flow_rate: amt(rate),
    })
}

fn scenario_flow(rate: i64, accumulated: i64, last: u64, cancelled: bool) -> Flow {
    Flow {
        entity: X,
        super_token_address: T,
        is_incoming: false,
        flow_rate: amt(rate),
        creation_timestamp: 1000,
        last_timestamp: last,
        accumulated_amount: amt(accumulated),
        is_cancelled: cancelled,
    }
}

#[tokio::test]
async fn scenarios_create_update_cancel() {
    let (mut reconciler, chain, _) = setup();
    chain.set_balance(T, 1_000_000);

    // A: create at chain timestamp 1000
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    let snapshot = reconciler.apply(&outgoing(X, 100)).await.unwrap();
    assert_eq!(snapshot.flows, vec![scenario_flow(100, 0, 1000, false)]);
    assert_eq!(snapshot.super_tokens.len(), 1);
    assert_eq!(snapshot.super_tokens[0].net_flow, amt(-100));

    // B: rate change at 1100 accrues the old rate
    chain.set_flow_timestamp(T, AGENT, X, 1100);
    let snapshot = reconciler.apply(&outgoing(X, 150)).await.unwrap();
    assert_eq!(snapshot.flows, vec![scenario_flow(150, 10_000, 1100, false)]);

    // C: termination keeps the last computed values
    chain.set_flow_timestamp(T, AGENT, X, 1300);
    let snapshot = reconciler.apply(&outgoing(X, 0)).await.unwrap();
    assert_eq!(snapshot.flows, vec![scenario_flow(150, 10_000, 1100, true)]);
    assert_eq!(snapshot.active_flows().count(), 0);
}

#[tokio::test]
async fn replaying_an_event_is_idempotent() {
    let (mut reconciler, chain, _) = setup();
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    reconciler.apply(&outgoing(X, 100)).await.unwrap();

    chain.set_flow_timestamp(T, AGENT, X, 1100);
    let once = reconciler.apply(&outgoing(X, 150)).await.unwrap();
    let twice = reconciler.apply(&outgoing(X, 150)).await.unwrap();
    assert_eq!(once.flows, twice.flows);

    // reconcile against the same prior snapshot gives the same entry
    let prior = Snapshot {
        super_tokens: once.super_tokens.clone(),
        flows: vec![scenario_flow(100, 0, 1000, false)],
    };
    let a = reconciler.reconcile(&prior, &outgoing(X, 150)).await.unwrap();
    let b = reconciler.reconcile(&prior, &outgoing(X, 150)).await.unwrap();
    assert_eq!(a.flows, b.flows);
}

#[tokio::test]
async fn cancelling_one_flow_leaves_others_in_place() {
    let (mut reconciler, chain, _) = setup();
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    chain.set_flow_timestamp(T, AGENT, Y, 1000);
    reconciler.apply(&outgoing(X, 100)).await.unwrap();
    let before = reconciler.apply(&outgoing(Y, 40)).await.unwrap();

    let after = reconciler.apply(&outgoing(X, 0)).await.unwrap();
    assert_eq!(after.flows.len(), 2);
    assert!(after.flows[0].is_cancelled);
    assert_eq!(after.flows[0].entity, X);
    assert_eq!(after.flows[1], before.flows[1]);
}

#[tokio::test]
async fn termination_for_unknown_flow_is_a_noop() {
    let (mut reconciler, _, _) = setup();
    let snapshot = reconciler.apply(&outgoing(X, 0)).await.unwrap();
    assert!(snapshot.flows.is_empty());
}

#[tokio::test]
async fn incoming_flow_uses_receiver_totals() {
    let (mut reconciler, chain, _) = setup();
    chain.set_flow_timestamp(T, X, AGENT, 1000);

    let event = LedgerEvent::FlowUpdated(FlowUpdated {
        token: T,
        sender: X,
        receiver: AGENT,
        flow_rate: amt(25),
        total_sender_flow_rate: amt(-25),
        total_receiver_flow_rate: amt(25),
    });
    let snapshot = reconciler.apply(&event).await.unwrap();
    assert!(snapshot.flows[0].is_incoming);
    assert_eq!(snapshot.flows[0].entity, X);
    assert_eq!(snapshot.super_tokens[0].net_flow, amt(25));
}

#[tokio::test]
async fn unrelated_flow_passes_through() {
    let (mut reconciler, _, _) = setup();
    let event = LedgerEvent::FlowUpdated(FlowUpdated {
        token: T,
        sender: X,
        receiver: Y,
        flow_rate: amt(10),
        total_sender_flow_rate: amt(-10),
        total_receiver_flow_rate: amt(10),
    });
    let snapshot = reconciler.apply(&event).await.unwrap();
    assert_eq!(*snapshot, Snapshot::default());
}

#[tokio::test]
async fn failed_fetch_keeps_last_snapshot() {
    let (mut reconciler, chain, _) = setup();
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    let good = reconciler.apply(&outgoing(X, 100)).await.unwrap();
    let mut rx = reconciler.subscribe();
    let _ = rx.borrow_and_update();

    chain.fail_timestamps.store(true, Ordering::SeqCst);
    chain.set_flow_timestamp(T, AGENT, X, 1100);
    let err = reconciler.apply(&outgoing(X, 150)).await.unwrap_err();
    assert!(matches!(err, LedgerError::FlowTimestampFetchFailed { .. }));
    assert_eq!(err.category(), ErrorCategory::Fetch);
    assert_eq!(*reconciler.snapshot(), *good);
    assert!(!rx.has_changed().unwrap());

    chain.fail_timestamps.store(false, Ordering::SeqCst);
    chain.fail_balance.store(true, Ordering::SeqCst);
    let err = reconciler.apply(&outgoing(X, 150)).await.unwrap_err();
    assert!(matches!(err, LedgerError::BalanceFetchFailed { .. }));
    assert_eq!(*reconciler.snapshot(), *good);

    // retry succeeds once the node is back
    chain.fail_balance.store(false, Ordering::SeqCst);
    let snapshot = reconciler.apply(&outgoing(X, 150)).await.unwrap();
    assert_eq!(snapshot.flows[0].accumulated_amount, amt(10_000));
    assert!(rx.has_changed().unwrap());
}

#[tokio::test]
async fn run_retries_event_after_transient_fetch_failure() {
    let (reconciler, chain, _) = setup();
    chain
        .scripted_timestamps
        .lock()
        .unwrap()
        .extend([Some(1000), None, Some(1100), Some(1200)]);
    let rx = reconciler.subscribe();

    let (tx, events) = mpsc::channel(8);
    tx.send(outgoing(X, 100)).await.unwrap();
    tx.send(outgoing(X, 150)).await.unwrap();
    tx.send(outgoing(X, 200)).await.unwrap();
    drop(tx);

    reconciler
        .with_retry_delay(Duration::from_millis(1))
        .run(events)
        .await;

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.flows.len(), 1);
    let flow = &snapshot.flows[0];
    assert_eq!(flow.flow_rate, amt(200));
    assert_eq!(flow.last_timestamp, 1200);
    // 100/s over 1000..1100, then 150/s over 1100..1200
    assert_eq!(flow.accumulated_amount, amt(25_000));
    assert!(chain.scripted_timestamps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn run_skips_unsupported_event() {
    let (reconciler, chain, _) = setup();
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    let rx = reconciler.subscribe();

    let (tx, events) = mpsc::channel(8);
    tx.send(LedgerEvent::AgentReassigned(AgentReassigned { agent: Y }))
        .await
        .unwrap();
    tx.send(outgoing(X, 100)).await.unwrap();
    drop(tx);

    reconciler.run(events).await;

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.flows, vec![scenario_flow(100, 0, 1000, false)]);
}

#[tokio::test]
async fn vault_event_updates_balance_only() {
    let (mut reconciler, chain, clock) = setup();
    chain.set_balance(T, 500);
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    let before = reconciler.apply(&outgoing(X, 5)).await.unwrap();

    chain.set_balance(T, 9_000);
    clock.0.store(1200, Ordering::SeqCst);
    let after = reconciler
        .apply(&LedgerEvent::VaultEvent(VaultEvent { token: T }))
        .await
        .unwrap();

    assert_eq!(after.flows, before.flows);
    assert_eq!(after.super_tokens[0].balance, amt(9_000));
    assert_eq!(after.super_tokens[0].net_flow, amt(-5));
    assert_eq!(after.super_tokens[0].last_update_timestamp, 1200);
}

#[tokio::test]
async fn agent_reassignment_is_refused() {
    let (mut reconciler, chain, _) = setup();
    chain.set_flow_timestamp(T, AGENT, X, 1000);
    let good = reconciler.apply(&outgoing(X, 100)).await.unwrap();

    let err = reconciler
        .apply(&LedgerEvent::AgentReassigned(AgentReassigned { agent: Y }))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AgentReassignmentUnsupported { new_agent } if new_agent == Y));
    assert_eq!(err.category(), ErrorCategory::Unsupported);
    assert_eq!(*reconciler.snapshot(), *good);
    assert_eq!(reconciler.agent(), AGENT);
}

#[test]
fn scenario_d_projection() {
    let token = SuperToken {
        address: T,
        name: "Super Token".into(),
        symbol: "TKNx".into(),
        decimals: 18,
        underlying_token: Address::ZERO,
        balance: amt(1000),
        net_flow: amt(-10),
        last_update_timestamp: 1000,
    };
    assert_eq!(token.current_balance(1050).unwrap(), amt(500));

    let rates = ConvertRates::new();
    let view = view::project(std::slice::from_ref(&token), &rates, "USD", false, 1050);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].current_balance, amt(500));
    assert_eq!(view[0].converted_amount, None);

    let later = view::project(&[token], &rates, "USD", false, 1200);
    assert!(later.is_empty());
}
