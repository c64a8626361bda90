// src/reconciler.rs
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorCategory, LedgerError, Result};
use crate::ledger;
use crate::models::{AgentReassigned, FlowUpdated, LedgerEvent, Snapshot, VaultEvent};
use crate::registry::TokenRegistry;
use crate::sources::{Clock, FlowTimestampSource};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(120);

/// Folds events into snapshots, one event at a time.
///
/// The current snapshot lives in a watch channel; readers get an `Arc` to a
/// complete value and a failed event never replaces it.
pub struct Reconciler {
    agent: Address,
    registry: TokenRegistry,
    timestamps: Arc<dyn FlowTimestampSource>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<Arc<Snapshot>>,
    retry_delay: Duration,
}

impl Reconciler {
    pub fn new(
        agent: Address,
        registry: TokenRegistry,
        timestamps: Arc<dyn FlowTimestampSource>,
        clock: Arc<dyn Clock>,
        initial: Snapshot,
    ) -> (Self, watch::Receiver<Arc<Snapshot>>) {
        let (state, rx) = watch::channel(Arc::new(initial));
        let reconciler = Self {
            agent,
            registry,
            timestamps,
            clock,
            state,
            retry_delay: Duration::from_secs(1),
        };
        (reconciler, rx)
    }

    /// First wait before retrying an event whose chain reads failed. Doubles
    /// on each further failure, up to two minutes.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn agent(&self) -> Address {
        self.agent
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.state.subscribe()
    }

    /// Reconcile one event against the current snapshot and publish the
    /// result. On error the published snapshot is left as it was.
    pub async fn apply(&mut self, event: &LedgerEvent) -> Result<Arc<Snapshot>> {
        let current = self.snapshot();
        let next = Arc::new(self.reconcile(&current, event).await?);
        self.state.send_replace(Arc::clone(&next));
        Ok(next)
    }

    /// Next snapshot for `event`. Does not publish.
    pub async fn reconcile(&self, snapshot: &Snapshot, event: &LedgerEvent) -> Result<Snapshot> {
        match event {
            LedgerEvent::FlowUpdated(flow) => self.on_flow_updated(snapshot, flow).await,
            LedgerEvent::VaultEvent(vault) => self.on_vault_event(snapshot, vault).await,
            LedgerEvent::AgentReassigned(reassigned) => self.on_agent_reassigned(reassigned),
        }
    }

    /// Drain `events` until the sender side closes.
    ///
    /// An event whose chain reads fail is retried until it applies; later
    /// events wait behind it. Events rejected for any other reason are
    /// logged and skipped.
    pub async fn run(mut self, mut events: mpsc::Receiver<LedgerEvent>) {
        info!("Reconciler started for agent {}", self.agent);

        while let Some(event) = events.recv().await {
            let mut retry_delay = self.retry_delay;
            loop {
                match self.apply(&event).await {
                    Ok(snapshot) => {
                        debug!(
                            "Applied {} -> {} tokens, {} flows",
                            event.kind(),
                            snapshot.super_tokens.len(),
                            snapshot.flows.len()
                        );
                        break;
                    }
                    Err(e) if e.category() == ErrorCategory::Fetch => {
                        warn!(
                            "Fetch failed for {}: {}. Retrying in {:?}",
                            event.kind(),
                            e,
                            retry_delay
                        );
                        sleep(retry_delay).await;
                        retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                    }
                    Err(e) => {
                        error!("Dropping {}: {}", event.kind(), e);
                        break;
                    }
                }
            }
        }

        info!("Event feed closed, reconciler stopping");
    }

    async fn on_flow_updated(&self, snapshot: &Snapshot, event: &FlowUpdated) -> Result<Snapshot> {
        let is_sender = event.sender == self.agent;
        if !is_sender && event.receiver != self.agent {
            return Ok(snapshot.clone());
        }

        let net_flow = if is_sender {
            event.total_sender_flow_rate
        } else {
            event.total_receiver_flow_rate
        };
        let now = self.clock.now();

        let (super_tokens, flows) = tokio::try_join!(
            self.registry.refresh(&snapshot.super_tokens, event.token, self.agent, Some(net_flow), now),
            ledger::apply_flow_event(&snapshot.flows, self.agent, event, self.timestamps.as_ref()),
        )?;

        Ok(Snapshot { super_tokens, flows })
    }

    async fn on_vault_event(&self, snapshot: &Snapshot, event: &VaultEvent) -> Result<Snapshot> {
        let super_tokens = self
            .registry
            .refresh(&snapshot.super_tokens, event.token, self.agent, None, self.clock.now())
            .await?;

        Ok(Snapshot {
            super_tokens,
            flows: snapshot.flows.clone(),
        })
    }

    // Moving subscriptions to a new agent is not designed yet.
    fn on_agent_reassigned(&self, event: &AgentReassigned) -> Result<Snapshot> {
        warn!(
            "Agent changed {} -> {}: subscriptions must move to the new agent, not handled",
            self.agent, event.agent
        );
        Err(LedgerError::AgentReassignmentUnsupported { new_agent: event.agent })
    }
}
