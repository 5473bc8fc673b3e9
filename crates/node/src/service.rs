//! The network-facing node service: connection lifecycle, message routing
//! between the transport and the coordinator, round timers and shutdown.

use crate::coordinator::{Coordinator, Outbound};
use crate::error::NodeError;
use async_trait::async_trait;
use basalt_consensus::{
    Action, ConsensusMessage, ConsensusOutbound, Proposal, QuorumCertificate, ViewChange, Vote,
};
use basalt_network::{
    message_id, perform_handshake, ConnectionLimits, Envelope, Established, GossipRouter,
    HandshakeConfig, LimitConfig, Payload, PeerEntry, PeerTable, Reputation, SecureReceiver,
    SecureSender,
};
use basalt_types::{from_bytes_canonical, to_bytes_canonical, NetworkError, PeerId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Views with no tip progress before a view-change timeout fires.
const VIEW_TIMEOUT_TICKS: u64 = 5;
/// Bound on the shutdown join of any one task.
const SHUTDOWN_JOIN: Duration = Duration::from_secs(5);
const OUTBOUND_QUEUE: usize = 256;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Live peer connections and their outbound queues.
pub struct PeerRegistry {
    senders: RwLock<HashMap<PeerId, mpsc::Sender<Payload>>>,
}

impl PeerRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            senders: RwLock::new(HashMap::new()),
        })
    }

    fn register(&self, peer: PeerId, sender: mpsc::Sender<Payload>) {
        self.senders.write().insert(peer, sender);
    }

    fn unregister(&self, peer: &PeerId) {
        self.senders.write().remove(peer);
    }

    pub fn send_to(&self, peer: &PeerId, payload: Payload) {
        if let Some(sender) = self.senders.read().get(peer) {
            if sender.try_send(payload).is_err() {
                debug!(target: "node", peer = %peer, "outbound queue full; dropping message");
            }
        }
    }

    pub fn broadcast(&self, payload: Payload) {
        for (peer, sender) in self.senders.read().iter() {
            if sender.try_send(payload.clone()).is_err() {
                debug!(target: "node", peer = %peer, "outbound queue full; dropping broadcast");
            }
        }
    }

    pub fn connected(&self) -> Vec<PeerId> {
        self.senders.read().keys().copied().collect()
    }
}

/// The consensus → transport seam: engine wire actions leave the node
/// through these four calls and nothing else.
#[async_trait]
impl ConsensusOutbound for PeerRegistry {
    async fn broadcast_proposal(&self, proposal: &Proposal) -> Result<(), NetworkError> {
        self.broadcast(Payload::Consensus(ConsensusMessage::Proposal(
            proposal.clone(),
        )));
        Ok(())
    }

    async fn send_vote_to_leader(&self, vote: &Vote, leader: &PeerId) -> Result<(), NetworkError> {
        self.send_to(leader, Payload::Consensus(ConsensusMessage::Vote(vote.clone())));
        Ok(())
    }

    async fn broadcast_qc(&self, qc: &QuorumCertificate) -> Result<(), NetworkError> {
        self.broadcast(Payload::Consensus(ConsensusMessage::Qc(*qc)));
        Ok(())
    }

    async fn broadcast_view_change(&self, vc: &ViewChange) -> Result<(), NetworkError> {
        self.broadcast(Payload::Consensus(ConsensusMessage::ViewChange(vc.clone())));
        Ok(())
    }
}

/// Delivers one engine wire action through the transport seam.
async fn deliver_consensus(
    outbound: &dyn ConsensusOutbound,
    action: Action,
) -> Result<(), NetworkError> {
    match action {
        Action::BroadcastProposal(proposal) => outbound.broadcast_proposal(&proposal).await,
        Action::SendVoteToLeader { vote, leader } => {
            outbound.send_vote_to_leader(&vote, &leader).await
        }
        Action::BroadcastQc(qc) => outbound.broadcast_qc(&qc).await,
        Action::BroadcastViewChange(vc) => outbound.broadcast_view_change(&vc).await,
        // State actions never reach the wire.
        Action::Finalized { .. } | Action::EnteredView(_) => Ok(()),
    }
}

pub struct NodeService {
    pub coordinator: Arc<Coordinator>,
    pub peers: Arc<PeerRegistry>,
    pub table: Arc<PeerTable>,
    pub reputation: Arc<Reputation>,
    pub gossip: Arc<GossipRouter>,
    limits: Arc<ConnectionLimits>,
    handshake: HandshakeConfig,
    local_peer: PeerId,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeService {
    pub fn new(coordinator: Arc<Coordinator>, handshake: HandshakeConfig) -> Arc<Self> {
        let local_peer = handshake.keys.peer_id();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            coordinator,
            peers: PeerRegistry::new(),
            table: Arc::new(PeerTable::new(local_peer)),
            reputation: Arc::new(Reputation::new()),
            gossip: Arc::new(GossipRouter::new()),
            limits: ConnectionLimits::new(LimitConfig::default()),
            handshake,
            local_peer,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Binds the listener and starts the accept loop and the round timers.
    pub async fn start(self: &Arc<Self>, listen: SocketAddr) -> Result<(), NodeError> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| NodeError::Network(NetworkError::Io(e.to_string())))?;
        info!(target: "node", %listen, "listening");

        let service = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let service = service.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = service.run_connection(stream, addr, false).await {
                                        debug!(target: "node", %addr, %err, "inbound connection ended");
                                    }
                                });
                            }
                            Err(err) => {
                                warn!(target: "node", %err, "accept failed");
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        self.start_timers();
        Ok(())
    }

    /// Dials a peer and runs the connection to completion in a task.
    pub fn connect(self: &Arc<Self>, addr: SocketAddr) {
        let service = self.clone();
        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(err) = service.run_connection(stream, addr, true).await {
                        debug!(target: "node", %addr, %err, "outbound connection ended");
                    }
                }
                Err(err) => debug!(target: "node", %addr, %err, "dial failed"),
            }
        });
    }

    async fn run_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        initiator: bool,
    ) -> Result<(), NodeError> {
        // Connection limits count both directions.
        let _permit = self
            .limits
            .acquire(addr.ip())
            .map_err(NodeError::Network)?;

        let (read_half, write_half) = stream.into_split();
        let Established {
            peer_id,
            peer_identity: _,
            sender,
            receiver,
        } = perform_handshake(read_half, write_half, &self.handshake, initiator)
            .await
            .map_err(NodeError::Network)?;

        if self.reputation.is_banned(&peer_id, now_ms()) {
            return Err(NodeError::Network(NetworkError::PeerBanned));
        }
        self.table.insert(PeerEntry {
            peer_id,
            addr,
            last_seen_ms: now_ms(),
            best_block: 0,
            outbound: initiator,
        });
        self.gossip.add_peer(peer_id);

        let (tx, rx) = mpsc::channel::<Payload>(OUTBOUND_QUEUE);
        self.peers.register(peer_id, tx);
        info!(target: "node", peer = %peer_id, %addr, initiator, "peer connected");

        let writer = self.spawn_writer(peer_id, sender, rx);
        let result = self.read_loop(peer_id, receiver).await;

        self.peers.unregister(&peer_id);
        self.gossip.remove_peer(&peer_id);
        writer.abort();
        result
    }

    fn spawn_writer(
        self: &Arc<Self>,
        peer_id: PeerId,
        mut sender: SecureSender<tokio::net::tcp::OwnedWriteHalf>,
        mut rx: mpsc::Receiver<Payload>,
    ) -> JoinHandle<()> {
        let local_peer = self.local_peer;
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    payload = rx.recv() => {
                        let Some(payload) = payload else { break };
                        let envelope = Envelope {
                            sender: local_peer,
                            timestamp_ms: now_ms(),
                            payload,
                        };
                        if let Err(err) = sender.send(&to_bytes_canonical(&envelope)).await {
                            debug!(target: "node", peer = %peer_id, %err, "send failed");
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    async fn read_loop(
        self: &Arc<Self>,
        peer_id: PeerId,
        mut receiver: SecureReceiver<tokio::net::tcp::OwnedReadHalf>,
    ) -> Result<(), NodeError> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let frame = tokio::select! {
                frame = receiver.recv() => frame,
                _ = shutdown.changed() => return Ok(()),
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(NetworkError::Disconnected) => return Ok(()),
                Err(err) => {
                    self.reputation.penalize(&peer_id, 20, now_ms());
                    return Err(NodeError::Network(err));
                }
            };

            let envelope: Envelope = match from_bytes_canonical(&frame) {
                Ok(envelope) => envelope,
                Err(err) => {
                    // Malformed frames are an edge problem: penalize and
                    // drop, never forward.
                    debug!(target: "node", peer = %peer_id, %err, "malformed envelope");
                    self.reputation.penalize(&peer_id, 10, now_ms());
                    continue;
                }
            };
            // Gossip-duplicate suppression before any handler runs.
            let id = message_id(&frame);
            if !self.gossip.seen().first_seen(id, now_ms()) {
                continue;
            }

            if let Some(handled) = self.handle_control(&peer_id, &envelope.payload) {
                for outbound in handled {
                    self.route(outbound).await;
                }
                continue;
            }

            match self
                .coordinator
                .handle_envelope(envelope, peer_id, now_ms())
            {
                Ok(outbounds) => {
                    self.table.mark_seen(&peer_id, now_ms(), 0);
                    for outbound in outbounds {
                        self.route(outbound).await;
                    }
                }
                Err(NodeError::Network(err)) => {
                    self.reputation.penalize(&peer_id, 30, now_ms());
                    debug!(target: "node", peer = %peer_id, %err, "envelope rejected");
                }
                Err(err) => {
                    debug!(target: "node", peer = %peer_id, %err, "envelope failed");
                }
            }
        }
    }

    /// Discovery and gossip-control messages handled at the service edge.
    fn handle_control(&self, peer: &PeerId, payload: &Payload) -> Option<Vec<Outbound>> {
        match payload {
            Payload::FindNode { target } => {
                let peers = self
                    .table
                    .closest(target, basalt_network::wire::MAX_FIND_NODE_PEERS)
                    .into_iter()
                    .map(|entry| basalt_network::PeerAddr {
                        peer_id: entry.peer_id,
                        addr: entry.addr,
                    })
                    .collect();
                Some(vec![Outbound::ToPeer(
                    *peer,
                    Payload::FindNodeResponse { peers },
                )])
            }
            Payload::FindNodeResponse { peers } => {
                for entry in peers {
                    self.table.insert(PeerEntry {
                        peer_id: entry.peer_id,
                        addr: entry.addr,
                        last_seen_ms: now_ms(),
                        best_block: 0,
                        outbound: false,
                    });
                }
                Some(Vec::new())
            }
            Payload::IHave(ids) => {
                let wanted = self.gossip.on_ihave(ids, now_ms());
                if wanted.is_empty() {
                    Some(Vec::new())
                } else {
                    Some(vec![Outbound::ToPeer(*peer, Payload::IWant(wanted))])
                }
            }
            Payload::IWant(ids) => {
                let granted = self.gossip.on_iwant(peer, ids, now_ms());
                // Grantable ids are transactions we advertised; serve them.
                let mut txs = Vec::new();
                for id in granted {
                    if let Some(tx) = self.coordinator.mempool.get(&id) {
                        txs.push((*tx).clone());
                    }
                }
                if txs.is_empty() {
                    Some(Vec::new())
                } else {
                    Some(vec![Outbound::ToPeer(*peer, Payload::TxAnnounce(txs))])
                }
            }
            Payload::Graft => {
                self.gossip.graft(*peer);
                Some(Vec::new())
            }
            Payload::Prune => {
                self.gossip.prune(*peer);
                Some(Vec::new())
            }
            _ => None,
        }
    }

    pub async fn route(&self, outbound: Outbound) {
        match outbound {
            Outbound::ToPeer(peer, payload) => self.peers.send_to(&peer, payload),
            Outbound::Broadcast(payload) => self.peers.broadcast(payload),
            Outbound::Consensus(action) => {
                if let Err(err) = deliver_consensus(self.peers.as_ref(), action).await {
                    debug!(target: "node", %err, "consensus delivery failed");
                }
            }
        }
    }

    /// The proposal and view-timeout timers.
    fn start_timers(self: &Arc<Self>) {
        let service = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let block_time = Duration::from_millis(service.coordinator.params.block_time_ms);
        self.spawn(async move {
            let mut ticker = tokio::time::interval(block_time);
            let mut stalled_ticks = 0u64;
            let mut last_tip = service.coordinator.tip_number();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                match service.coordinator.try_propose(now_ms()) {
                    Ok(outbounds) => {
                        for outbound in outbounds {
                            service.route(outbound).await;
                        }
                    }
                    Err(err) => debug!(target: "node", %err, "proposal attempt failed"),
                }

                // Liveness: with no tip progress for several ticks, fire
                // the view-change timer.
                let tip = service.coordinator.tip_number();
                if tip > last_tip {
                    last_tip = tip;
                    stalled_ticks = 0;
                } else {
                    stalled_ticks += 1;
                    if stalled_ticks >= VIEW_TIMEOUT_TICKS {
                        stalled_ticks = 0;
                        if let Ok(actions) = service.coordinator.engine.on_timeout() {
                            match service.coordinator_dispatch(actions) {
                                Ok(outbounds) => {
                                    for outbound in outbounds {
                                        service.route(outbound).await;
                                    }
                                }
                                Err(err) => {
                                    debug!(target: "node", %err, "timeout dispatch failed")
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    fn coordinator_dispatch(
        &self,
        actions: Vec<basalt_consensus::Action>,
    ) -> Result<Vec<Outbound>, NodeError> {
        // Reuse the coordinator's action mapping through its consensus
        // dispatch path.
        self.coordinator.dispatch_engine_actions(actions)
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(task));
    }

    /// Cooperative shutdown with bounded joins. Key material zeroizes when
    /// the last `ValidatorKeys` reference drops with the coordinator.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_JOIN, task).await.is_err() {
                warn!(target: "node", "task did not stop within the join bound; aborting");
            }
        }
        info!(target: "node", "node stopped");
    }
}
