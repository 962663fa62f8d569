//! Exchange service: lifecycle and public surface.
//!
//! [`Exchange`] owns the locked state machine core, the shared collaborator
//! handles, and the background workers (timer, publisher). External events
//! enter through [`Exchange::on_clustering_event`] and the fabric handler
//! registered at construction; both funnel into the single serializing
//! dispatcher.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use strata_core::{ClockSource, ClusterKey, NamespaceRegistry, NodeId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, Level};

use super::machine::{ExchangeCore, ExchangeDeps, ExchangeEvent};
use super::messages::ExchangeMessage;
use super::publisher::{ClusterChangedListener, EventPublisher};
use super::timer;
use super::traits::{
    ExchangeMessageHandler, FabricTransport, HeartbeatMonitor, ManagedSubsystem, PartitionBalance,
};
use super::types::{
    ClusterChangedEvent, ClusteringEvent, CommittedSnapshot, ExchangeConfig, ExchangeHealth,
    ExchangeState, TIMER_TICK_MS,
};

// ---------------------------------------------------------------------------
// ExchangeInner
// ---------------------------------------------------------------------------

/// Shared dispatcher target: the locked core plus its collaborators.
pub(crate) struct ExchangeInner {
    pub deps: ExchangeDeps,
    pub core: Mutex<ExchangeCore>,
}

impl ExchangeInner {
    /// Serializes one event through the exchange lock.
    pub fn dispatch(&self, event: ExchangeEvent) {
        self.core.lock().handle_event(&self.deps, event);
    }
}

impl ExchangeMessageHandler for ExchangeInner {
    fn on_message(&self, from: NodeId, message: ExchangeMessage) {
        self.dispatch(ExchangeEvent::Message { from, message });
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Initialized,
    Running,
    Stopped,
}

struct Lifecycle {
    state: LifecycleState,
    shutdown_tx: watch::Sender<bool>,
    timer_worker: Option<JoinHandle<()>>,
    publisher_worker: Option<JoinHandle<()>>,
}

/// The cluster-change exchange subsystem.
///
/// Construction leaves the node orphaned with client transactions blocked;
/// the first committed round unblocks them. [`ManagedSubsystem::start`]
/// spawns the timer and publisher workers.
pub struct Exchange {
    pub(crate) inner: Arc<ExchangeInner>,
    lifecycle: Mutex<Lifecycle>,
}

impl Exchange {
    /// Builds the exchange and registers its message handler with the
    /// fabric transport.
    #[must_use]
    pub fn new(
        config: ExchangeConfig,
        namespaces: NamespaceRegistry,
        clock: Arc<dyn ClockSource>,
        fabric: Arc<dyn FabricTransport>,
        balance: Arc<dyn PartitionBalance>,
        heartbeat: Arc<dyn HeartbeatMonitor>,
    ) -> Self {
        let deps = ExchangeDeps {
            config,
            clock,
            fabric,
            balance,
            heartbeat,
            namespaces,
            committed: ArcSwap::from_pointee(CommittedSnapshot::default()),
            publisher: EventPublisher::new(),
        };
        let now = deps.clock.now_ms();
        let inner = Arc::new(ExchangeInner {
            core: Mutex::new(ExchangeCore::new(now)),
            deps,
        });
        inner
            .deps
            .fabric
            .register_exchange_handler(Arc::clone(&inner) as Arc<dyn ExchangeMessageHandler>);

        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner,
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Initialized,
                shutdown_tx,
                timer_worker: None,
                publisher_worker: None,
            }),
        }
    }

    // -- Event intake --------------------------------------------------------

    /// Feeds one clustering-layer event into the dispatcher.
    pub fn on_clustering_event(&self, event: ClusteringEvent) {
        self.inner.dispatch(ExchangeEvent::ClusterChange(event));
    }

    /// The inbound message handler, as registered with the fabric transport.
    #[must_use]
    pub fn message_handler(&self) -> Arc<dyn ExchangeMessageHandler> {
        Arc::clone(&self.inner) as Arc<dyn ExchangeMessageHandler>
    }

    #[cfg(test)]
    pub(crate) fn inject_timer(&self) {
        self.inner.dispatch(ExchangeEvent::Timer);
    }

    // -- Listeners -----------------------------------------------------------

    /// Registers a committed-cluster-changed listener.
    ///
    /// # Panics
    ///
    /// Panics if the listener limit is exceeded.
    pub fn register_listener(
        &self,
        listener: impl Fn(&ClusterChangedEvent) + Send + Sync + 'static,
    ) {
        let listener: Arc<ClusterChangedListener> = Arc::new(listener);
        self.inner.deps.publisher.register_listener(listener);
    }

    // -- Accessors -----------------------------------------------------------

    /// The current exchange state.
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.inner.core.lock().state
    }

    /// The most recently committed membership snapshot. Lock-free.
    #[must_use]
    pub fn committed_snapshot(&self) -> Arc<CommittedSnapshot> {
        self.inner.deps.committed.load_full()
    }

    /// The committed cluster key; null before the first committed round.
    #[must_use]
    pub fn committed_cluster_key(&self) -> ClusterKey {
        self.inner.deps.committed.load().cluster_key
    }

    /// The committed cluster size.
    #[must_use]
    pub fn committed_size(&self) -> usize {
        self.inner.deps.committed.load().size()
    }

    /// The committed succession list.
    #[must_use]
    pub fn committed_succession(&self) -> Vec<NodeId> {
        self.inner.deps.committed.load().succession.clone()
    }

    /// The committed principal, if a membership is committed.
    #[must_use]
    pub fn committed_principal(&self) -> Option<NodeId> {
        self.inner.deps.committed.load().principal()
    }

    /// Diagnostic summary of the current round and committed state.
    #[must_use]
    pub fn health(&self) -> ExchangeHealth {
        let core = self.inner.core.lock();
        let committed = self.inner.deps.committed.load();
        let peers = core.peers.len();
        ExchangeHealth {
            state: core.state,
            cluster_key: core.cluster_key,
            succession_size: core.succession.len(),
            is_principal: core.principal() == Some(self.inner.deps.config.node_id),
            peers_send_acked: peers - core.peers.send_unacked().len(),
            peers_received: peers - core.peers.not_received().len(),
            peers_ready_to_commit: peers - core.peers.not_ready_to_commit().len(),
            committed_cluster_key: committed.cluster_key,
            committed_size: committed.size(),
        }
    }

    /// Serializes the committed succession list as comma-separated hex node
    /// ids with a trailing `\nok`, for the info/admin surface.
    #[must_use]
    pub fn info_committed_succession(&self) -> String {
        let snapshot = self.inner.deps.committed.load();
        let mut out = String::new();
        for (i, node) in snapshot.succession.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{node}");
        }
        out.push_str("\nok");
        out
    }

    /// Logs the full exchange state at the requested severity.
    pub fn dump(&self, level: Level) {
        let core = self.inner.core.lock();
        let committed = self.inner.deps.committed.load();

        log_at(level, &format!("exchange: state {}", core.state));
        log_at(
            level,
            &format!(
                "exchange: cluster key {} size {}",
                core.cluster_key,
                core.succession.len()
            ),
        );
        for (i, node) in core.succession.iter().enumerate() {
            let flags = core.peers.get(*node).map_or_else(
                || "untracked".to_string(),
                |peer| {
                    format!(
                        "send_acked {} received {} ready {}",
                        peer.send_acked, peer.received, peer.is_ready_to_commit
                    )
                },
            );
            log_at(level, &format!("exchange: node[{i}] {node} {flags}"));
        }
        log_at(
            level,
            &format!(
                "exchange: committed key {} size {}",
                committed.cluster_key,
                committed.size()
            ),
        );
    }
}

#[async_trait::async_trait]
impl ManagedSubsystem for Exchange {
    async fn start(&self) -> anyhow::Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        anyhow::ensure!(
            lifecycle.state == LifecycleState::Initialized,
            "exchange already started"
        );

        let inner = Arc::clone(&self.inner);
        lifecycle.timer_worker = Some(timer::spawn_timer(
            Duration::from_millis(TIMER_TICK_MS),
            lifecycle.shutdown_tx.subscribe(),
            move || inner.dispatch(ExchangeEvent::Timer),
        ));
        lifecycle.publisher_worker = Some(self.inner.deps.publisher.spawn_worker());
        lifecycle.state = LifecycleState::Running;
        info!("exchange started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let (timer_worker, publisher_worker) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != LifecycleState::Running {
                return Ok(());
            }
            lifecycle.state = LifecycleState::Stopped;
            let _ = lifecycle.shutdown_tx.send(true);
            (
                lifecycle.timer_worker.take(),
                lifecycle.publisher_worker.take(),
            )
        };

        // Join the timer before stopping the publisher so no tick can queue
        // another event mid-shutdown.
        if let Some(worker) = timer_worker {
            let _ = worker.await;
        }
        self.inner.deps.publisher.shutdown();
        if let Some(worker) = publisher_worker {
            let _ = worker.await;
        }
        info!("exchange stopped");
        Ok(())
    }
}

fn log_at(level: Level, message: &str) {
    if level == Level::ERROR {
        tracing::error!("{message}");
    } else if level == Level::WARN {
        tracing::warn!("{message}");
    } else if level == Level::INFO {
        tracing::info!("{message}");
    } else if level == Level::DEBUG {
        tracing::debug!("{message}");
    } else {
        tracing::trace!("{message}");
    }
}
