//! Exchange state machine.
//!
//! All round state lives in [`ExchangeCore`], guarded by one non-recursive
//! mutex in the service layer. Event handlers receive `&mut ExchangeCore` as
//! the locked witness plus the shared [`ExchangeDeps`], so helpers never
//! re-acquire the lock. Messages addressed to the local node short-circuit
//! through the same handlers instead of round-tripping the fabric.

use std::sync::Arc;

use arc_swap::ArcSwap;
use strata_core::{
    ClockSource, ClusterKey, NamespaceRegistry, NodeId, SUCCESSION_SOFT_CAPACITY,
};
use tracing::{debug, info, warn};

use super::codec;
use super::commit;
use super::messages::{self, ExchangeMessage, MessageKind};
use super::peers::PeerTable;
use super::publisher::EventPublisher;
use super::traits::{FabricTransport, HeartbeatMonitor, PartitionBalance};
use super::types::{
    ClusterChangedEvent, ClusteringEvent, CommittedSnapshot, ExchangeConfig, ExchangeState,
    ExchangeTimeouts,
};

// ---------------------------------------------------------------------------
// ExchangeDeps / ExchangeEvent
// ---------------------------------------------------------------------------

/// Immutable configuration and collaborators shared by every handler.
pub(crate) struct ExchangeDeps {
    pub config: ExchangeConfig,
    pub clock: Arc<dyn ClockSource>,
    pub fabric: Arc<dyn FabricTransport>,
    pub balance: Arc<dyn PartitionBalance>,
    pub heartbeat: Arc<dyn HeartbeatMonitor>,
    pub namespaces: NamespaceRegistry,
    pub committed: ArcSwap<CommittedSnapshot>,
    pub publisher: EventPublisher,
}

impl ExchangeDeps {
    /// Current timeout set; recomputed per event so heartbeat interval
    /// changes take effect immediately.
    fn timeouts(&self) -> ExchangeTimeouts {
        ExchangeTimeouts::derive(
            self.heartbeat.tx_interval_ms(),
            self.config.quantum_interval_ms,
        )
    }
}

/// One event entering the dispatcher.
#[derive(Debug, Clone)]
pub(crate) enum ExchangeEvent {
    ClusterChange(ClusteringEvent),
    Timer,
    Message {
        from: NodeId,
        message: ExchangeMessage,
    },
}

fn send_to(deps: &ExchangeDeps, to: NodeId, message: &ExchangeMessage) {
    if let Err(error) = deps.fabric.send(to, message) {
        warn!(%to, kind = %message.kind, %error, "exchange message send failed");
    }
}

// ---------------------------------------------------------------------------
// ExchangeCore
// ---------------------------------------------------------------------------

/// All mutable exchange state for the current round.
pub(crate) struct ExchangeCore {
    pub state: ExchangeState,
    pub cluster_key: ClusterKey,
    pub succession: Vec<NodeId>,
    pub peers: PeerTable,
    self_payload: Vec<u8>,
    send_ts: u64,
    ready_to_commit_send_ts: u64,
    orphan_since: u64,
    orphan_txns_blocked: bool,
}

impl ExchangeCore {
    /// A fresh core: orphaned, with client transactions blocked until the
    /// first committed round.
    pub fn new(now_ms: u64) -> Self {
        Self {
            state: ExchangeState::Orphaned,
            cluster_key: ClusterKey::NULL,
            succession: Vec::new(),
            peers: PeerTable::default(),
            self_payload: Vec::new(),
            send_ts: 0,
            ready_to_commit_send_ts: 0,
            orphan_since: now_ms,
            orphan_txns_blocked: true,
        }
    }

    /// The current principal: element 0 of the succession list.
    #[must_use]
    pub fn principal(&self) -> Option<NodeId> {
        self.succession.first().copied()
    }

    fn is_principal(&self, deps: &ExchangeDeps) -> bool {
        self.principal() == Some(deps.config.node_id)
    }

    /// Single entry point: dispatches one event to the handler for the
    /// current state. The caller holds the exchange lock.
    pub fn handle_event(&mut self, deps: &ExchangeDeps, event: ExchangeEvent) {
        match event {
            ExchangeEvent::ClusterChange(ClusteringEvent::Orphaned) => self.on_orphaned(deps),
            ExchangeEvent::ClusterChange(ClusteringEvent::Changed {
                cluster_key,
                succession,
            }) => self.on_cluster_changed(deps, cluster_key, succession),
            ExchangeEvent::Timer => self.on_timer(deps),
            ExchangeEvent::Message { from, message } => self.on_message(deps, from, message),
        }
    }

    // -- Clustering events --------------------------------------------------

    fn on_orphaned(&mut self, deps: &ExchangeDeps) {
        if matches!(
            self.state,
            ExchangeState::Exchanging | ExchangeState::ReadyToCommit
        ) {
            info!(cluster_key = %self.cluster_key, "aborting exchange round: node orphaned");
        }
        self.state = ExchangeState::Orphaned;
        self.cluster_key = ClusterKey::NULL;
        self.succession.clear();
        self.peers.reset_to_membership(&[]);
        self.self_payload.clear();
        self.orphan_since = deps.clock.now_ms();
        deps.balance.disallow_migrations();
        deps.balance.synchronize_migrations();
    }

    fn on_cluster_changed(
        &mut self,
        deps: &ExchangeDeps,
        cluster_key: ClusterKey,
        succession: Vec<NodeId>,
    ) {
        if cluster_key.is_null()
            || succession.is_empty()
            || !succession.contains(&deps.config.node_id)
        {
            warn!(%cluster_key, "malformed cluster-change event, treating as orphaned");
            self.on_orphaned(deps);
            return;
        }
        if succession.len() > SUCCESSION_SOFT_CAPACITY {
            warn!(
                size = succession.len(),
                "succession list exceeds soft capacity"
            );
        }
        if matches!(
            self.state,
            ExchangeState::Exchanging | ExchangeState::ReadyToCommit
        ) {
            info!(
                old_key = %self.cluster_key,
                new_key = %cluster_key,
                "aborting exchange round for new membership"
            );
        }
        self.state = ExchangeState::Exchanging;
        self.cluster_key = cluster_key;
        self.succession = succession;
        // Leaving the orphan state re-arms the one-shot transaction block.
        self.orphan_txns_blocked = false;

        self.begin_round(deps);
        info!(
            cluster_key = %self.cluster_key,
            size = self.succession.len(),
            principal = %self.succession[0],
            "exchange round started"
        );
        self.check_exchange_complete(deps);
    }

    /// Resets the peer table to the new membership, rebuilds the self
    /// payload, and broadcasts it. The local node's own payload is stored
    /// and acked directly.
    fn begin_round(&mut self, deps: &ExchangeDeps) {
        self.peers.reset_to_membership(&self.succession);
        codec::build_payload_into(&mut self.self_payload, &deps.namespaces);
        self.send_ts = deps.clock.now_ms();

        let me = deps.config.node_id;
        if let Some(own) = self.peers.get_mut(me) {
            own.store_payload(&self.self_payload);
            own.received = true;
            own.send_acked = true;
        }

        let message = ExchangeMessage::data(self.cluster_key, self.self_payload.clone());
        for &node in &self.succession {
            if node != me {
                send_to(deps, node, &message);
            }
        }
    }

    // -- Timer ---------------------------------------------------------------

    fn on_timer(&mut self, deps: &ExchangeDeps) {
        let now = deps.clock.now_ms();
        let timeouts = deps.timeouts();
        match self.state {
            ExchangeState::Orphaned => {
                if !self.orphan_txns_blocked
                    && now.saturating_sub(self.orphan_since) > timeouts.orphan_block_ms
                {
                    warn!(
                        timeout_ms = timeouts.orphan_block_ms,
                        "blocking client transactions after prolonged orphan state"
                    );
                    deps.balance.revert_to_orphan();
                    self.orphan_txns_blocked = true;
                }
            }
            ExchangeState::Exchanging => {
                let elapsed = now.saturating_sub(self.send_ts);
                if elapsed > timeouts.send_timeout_ms(elapsed) {
                    self.resend_data(deps);
                    self.send_ts = now;
                }
            }
            ExchangeState::ReadyToCommit => {
                if !self.is_principal(deps)
                    && now.saturating_sub(self.ready_to_commit_send_ts)
                        > timeouts.ready_to_commit_ms
                {
                    if let Some(principal) = self.principal() {
                        debug!(%principal, "retransmitting ready-to-commit");
                        send_to(
                            deps,
                            principal,
                            &ExchangeMessage::control(MessageKind::ReadyToCommit, self.cluster_key),
                        );
                        self.ready_to_commit_send_ts = now;
                    }
                }
            }
            ExchangeState::Rest => {}
        }
    }

    fn resend_data(&mut self, deps: &ExchangeDeps) {
        let pending = self.peers.send_unacked();
        if pending.is_empty() {
            return;
        }
        let message = ExchangeMessage::data(self.cluster_key, self.self_payload.clone());
        for node in pending {
            if node != deps.config.node_id {
                debug!(%node, "retransmitting exchange data");
                send_to(deps, node, &message);
            }
        }
    }

    // -- Messages ------------------------------------------------------------

    fn on_message(&mut self, deps: &ExchangeDeps, from: NodeId, message: ExchangeMessage) {
        if let Err(rejection) =
            messages::sanity_check(&message, from, self.cluster_key, &self.succession)
        {
            debug!(%from, %rejection, "dropping exchange message");
            return;
        }
        match (self.state, message.kind) {
            (ExchangeState::Exchanging, MessageKind::Data) => self.on_data(deps, from, &message),
            (ExchangeState::Exchanging, MessageKind::DataAck) => self.on_data_ack(deps, from),
            (ExchangeState::ReadyToCommit, MessageKind::Data) => {
                // Retransmission from a peer that missed our ack.
                send_to(
                    deps,
                    from,
                    &ExchangeMessage::control(MessageKind::DataAck, self.cluster_key),
                );
            }
            (ExchangeState::ReadyToCommit, MessageKind::ReadyToCommit) => {
                self.on_ready_to_commit(deps, from);
            }
            (ExchangeState::ReadyToCommit, MessageKind::Commit) => self.on_commit(deps, from),
            (ExchangeState::Rest, MessageKind::ReadyToCommit) => {
                self.on_rest_ready_to_commit(deps, from);
            }
            (state, kind) => {
                debug!(%from, %kind, %state, "ignoring exchange message in current state");
            }
        }
    }

    fn on_data(&mut self, deps: &ExchangeDeps, from: NodeId, message: &ExchangeMessage) {
        let Some(peer) = self.peers.get_mut(from) else {
            warn!(%from, "no peer entry for data sender");
            return;
        };
        if !peer.received {
            match codec::validate_payload(message.payload_bytes(), deps.config.partition_count) {
                Ok(()) => {
                    peer.store_payload(message.payload_bytes());
                    peer.received = true;
                }
                Err(error) => {
                    warn!(%from, %error, "invalid exchange payload");
                    return;
                }
            }
        }
        send_to(
            deps,
            from,
            &ExchangeMessage::control(MessageKind::DataAck, self.cluster_key),
        );
        self.check_exchange_complete(deps);
    }

    fn on_data_ack(&mut self, deps: &ExchangeDeps, from: NodeId) {
        if let Some(peer) = self.peers.get_mut(from) {
            peer.send_acked = true;
        }
        self.check_exchange_complete(deps);
    }

    /// Transitions to ready-to-commit once every data message is acked and
    /// every peer payload has arrived.
    fn check_exchange_complete(&mut self, deps: &ExchangeDeps) {
        if self.state != ExchangeState::Exchanging {
            return;
        }
        if !self.peers.send_unacked().is_empty() || !self.peers.not_received().is_empty() {
            return;
        }
        info!(cluster_key = %self.cluster_key, "exchange complete, ready to commit");
        self.state = ExchangeState::ReadyToCommit;
        self.ready_to_commit_send_ts = deps.clock.now_ms();

        let Some(principal) = self.principal() else {
            return;
        };
        if principal == deps.config.node_id {
            if let Some(own) = self.peers.get_mut(principal) {
                own.is_ready_to_commit = true;
            }
            self.check_ready_to_commit_complete(deps);
        } else {
            send_to(
                deps,
                principal,
                &ExchangeMessage::control(MessageKind::ReadyToCommit, self.cluster_key),
            );
        }
    }

    fn on_ready_to_commit(&mut self, deps: &ExchangeDeps, from: NodeId) {
        if !self.is_principal(deps) {
            warn!(%from, "ready-to-commit received by non-principal");
            return;
        }
        if let Some(peer) = self.peers.get_mut(from) {
            peer.is_ready_to_commit = true;
        }
        self.check_ready_to_commit_complete(deps);
    }

    /// Principal only: once all peers are ready, broadcasts the commit and
    /// applies it locally.
    fn check_ready_to_commit_complete(&mut self, deps: &ExchangeDeps) {
        if !self.peers.not_ready_to_commit().is_empty() {
            return;
        }
        info!(cluster_key = %self.cluster_key, "all nodes ready, committing cluster change");
        let message = ExchangeMessage::control(MessageKind::Commit, self.cluster_key);
        let me = deps.config.node_id;
        for &node in &self.succession {
            if node != me {
                send_to(deps, node, &message);
            }
        }
        self.commit_round(deps);
    }

    fn on_commit(&mut self, deps: &ExchangeDeps, from: NodeId) {
        if Some(from) != self.principal() {
            warn!(%from, "commit from non-principal ignored");
            return;
        }
        self.commit_round(deps);
    }

    /// A peer's commit was lost; only the principal may replay it.
    fn on_rest_ready_to_commit(&mut self, deps: &ExchangeDeps, from: NodeId) {
        if self.is_principal(deps) {
            info!(%from, "resending commit to peer that missed it");
            send_to(
                deps,
                from,
                &ExchangeMessage::control(MessageKind::Commit, self.cluster_key),
            );
        } else {
            warn!(%from, "ready-to-commit in rest state at non-principal");
        }
    }

    // -- Commit --------------------------------------------------------------

    fn commit_round(&mut self, deps: &ExchangeDeps) {
        commit::apply(
            &deps.namespaces,
            &self.succession,
            &self.peers,
            deps.config.partition_count,
        );

        let snapshot = CommittedSnapshot {
            cluster_key: self.cluster_key,
            succession: self.succession.clone(),
        };
        info!(
            cluster_key = %snapshot.cluster_key,
            size = snapshot.size(),
            "cluster change committed"
        );
        deps.committed.store(Arc::new(snapshot.clone()));
        deps.publisher.queue_event(ClusterChangedEvent {
            cluster_key: snapshot.cluster_key,
            succession: snapshot.succession,
        });
        self.state = ExchangeState::Rest;
        deps.balance.balance();
    }
}
