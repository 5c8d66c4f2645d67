//! Leader election and ledger transfer on top of the peer transport.
//!
//! A round starts when a leader runs [`ElectionCoordinator::start_election`]:
//!
//! 1. `NEW_ELECTION n z payload` goes to every leader (and is applied locally).
//! 2. Each leader fans out `ELECTION z payload` to its leaders and nodes.
//!    Every peer that receives `ELECTION` mines, leaders included.
//! 3. Miners report `WIN nonce` to a leader, which validates the proof and
//!    shares the winner's address as `WIN_ADVICE` with the other leaders.
//! 4. Once a leader has collected `n` distinct winners it broadcasts
//!    `ELECTED addr…`; every node then drops its leader connections and
//!    reconnects according to its new role.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use nether_common::utils::random::random_string;
use nether_p2p::{Command, ConnectionId, MessageHandler, PeerConnection, PeerNetwork, Role, RoleCounts, Scope};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ElectionError;
use crate::ledger_sync::SharedLedger;
use crate::pow::{validate_proof, ProofOfWorkEngine};
use crate::state::{ElectionState, Phase};

const ELECTION: &str = "election";

/// How often a `LEADER?` is repeated when the peer is not a leader (yet).
const ANNOUNCE_RETRIES: u32 = 10;
const ANNOUNCE_RETRY_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Default)]
pub struct ElectionOptions {
    /// Upper bound on local mining per round. `None` mines until the round ends.
    pub round_timeout: Option<Duration>,
}

/// Point-in-time view of the election state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionStatus {
    pub is_leader: bool,
    pub phase: Phase,
    pub under_election: bool,
    pub round_active: bool,
    pub collected_winners: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub role: Role,
    pub remote_addr: SocketAddr,
    pub advertised_addr: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub counts: RoleCounts,
    pub connections: Vec<ConnectionInfo>,
}

pub struct ElectionCoordinator {
    me: Weak<ElectionCoordinator>,
    network: PeerNetwork,
    engine: ProofOfWorkEngine,
    ledger: Arc<SharedLedger>,
    options: ElectionOptions,
    state: Mutex<ElectionState>,
    winners: Mutex<Vec<String>>,
    /// Outstanding `LEADER?` announcements, by connection, with attempts used.
    announcements: Mutex<HashMap<ConnectionId, u32>>,
}

impl ElectionCoordinator {
    pub fn new(
        network: PeerNetwork,
        engine: ProofOfWorkEngine,
        ledger: Arc<SharedLedger>,
        options: ElectionOptions,
    ) -> Arc<Self> {
        let state = ElectionState::new(network.shutdown_token().clone());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            network,
            engine,
            ledger,
            options,
            state: Mutex::new(state),
            winners: Mutex::new(Vec::new()),
            announcements: Mutex::new(HashMap::new()),
        })
    }

    fn handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.me.upgrade().map(|me| me as Arc<dyn MessageHandler>)
    }

    pub fn network(&self) -> &PeerNetwork {
        &self.network
    }

    pub fn ledger(&self) -> &Arc<SharedLedger> {
        &self.ledger
    }

    pub async fn start_as_leader(&self) {
        self.state.lock().await.is_leader = true;
        info!(target: ELECTION, "👑 Starting as leader");
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.is_leader
    }

    pub async fn status(&self) -> ElectionStatus {
        let collected_winners = self.winners.lock().await.clone();
        let state = self.state.lock().await;
        ElectionStatus {
            is_leader: state.is_leader,
            phase: state.phase,
            under_election: state.under_election,
            round_active: state.round_active,
            collected_winners,
        }
    }

    /// Connects to `address` and attaches to whichever leader it points us at.
    pub async fn join_network(&self, address: &str) -> Result<(), ElectionError> {
        let announce_leader = self.is_leader().await;
        let query = Command::LeaderQuery { announce_leader }.to_string();

        let (conn, mut reader) = self.network.connect(address).await?;
        conn.send(&query).await?;
        let reply = tokio::time::timeout(self.network.transport().connect_timeout(), reader.read_message())
            .await
            .map_err(|_| nether_p2p::P2pError::Connection(format!("{} did not answer LEADER?", address)))??;

        let handler = self.handler().ok_or(nether_p2p::P2pError::Closed)?;
        match Command::parse(&reply) {
            Ok(Some(Command::Yes)) => {
                info!("🔗 Joined leader {}", conn.advertised_addr());
                self.network.register(Role::Leader, conn, reader, handler).await;
                Ok(())
            }
            Ok(Some(Command::LeaderAddress(leader))) => {
                conn.close().await;
                info!("↪️ {} redirected us to leader {}", address, leader);
                self.connect_leader(&leader).await?;
                Ok(())
            }
            Ok(Some(Command::NoLeader)) => {
                conn.close().await;
                Err(ElectionError::NoLeader(address.to_string()))
            }
            _ => {
                conn.close().await;
                Err(nether_p2p::P2pError::Handshake(format!("unexpected reply to LEADER?: {:?}", reply)).into())
            }
        }
    }

    /// Dials a leader, registers it and announces our role to it.
    async fn connect_leader(&self, address: &str) -> Result<PeerConnection, ElectionError> {
        let handler = self.handler().ok_or(nether_p2p::P2pError::Closed)?;
        let (conn, reader) = self.network.connect(address).await?;
        self.network.register(Role::Leader, conn.clone(), reader, handler).await;
        self.announce(&conn).await;
        Ok(conn)
    }

    async fn announce(&self, conn: &PeerConnection) {
        let announce_leader = self.is_leader().await;
        self.announcements.lock().await.entry(conn.id()).or_insert(0);
        if let Err(e) = conn.send(&Command::LeaderQuery { announce_leader }.to_string()).await {
            warn!(conn = conn.id(), "announce failed: {}", e);
            self.announcements.lock().await.remove(&conn.id());
        }
    }

    /// A peer we hold as leader answered `LEADER?` without `YES`. It may not
    /// have processed `ELECTED` yet, so ask again a few times.
    async fn retry_announce(&self, conn: &PeerConnection) {
        let attempt = {
            let mut pending = self.announcements.lock().await;
            let Some(attempts) = pending.get_mut(&conn.id()) else {
                return;
            };
            *attempts += 1;
            if *attempts > ANNOUNCE_RETRIES {
                pending.remove(&conn.id());
                warn!(conn = conn.id(), "{} never confirmed leadership", conn.advertised_addr());
                return;
            }
            *attempts
        };

        let Some(me) = self.me.upgrade() else {
            return;
        };
        let conn = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ANNOUNCE_RETRY_DELAY).await;
            let announce_leader = me.is_leader().await;
            debug!(conn = conn.id(), attempt, "repeating LEADER?");
            let _ = conn.send(&Command::LeaderQuery { announce_leader }.to_string()).await;
        });
    }

    /// Leader-only: opens a new round with a random payload.
    pub async fn start_election(&self, leader_count: usize, difficulty: u32) -> Result<(), ElectionError> {
        if !self.is_leader().await {
            return Err(ElectionError::NotLeader);
        }
        let leader_count = leader_count.max(1);
        let payload = random_string(30, 40);
        info!(target: ELECTION, leader_count, difficulty, "🗳️ Starting election");

        let command = Command::NewElection {
            leader_count,
            difficulty,
            payload: payload.clone(),
        };
        let sent = self
            .network
            .registry()
            .broadcast(Scope::Only(Role::Leader), &command.to_string())
            .await;
        debug!(target: ELECTION, "NEW_ELECTION sent to {} leaders", sent);

        self.on_new_election(leader_count, difficulty, payload).await;
        Ok(())
    }

    /// Opens the round and fans out `ELECTION`. The preparing leader only
    /// arbitrates: it mines when another leader's `ELECTION` reaches it.
    async fn on_new_election(&self, leader_count: usize, difficulty: u32, payload: String) {
        {
            let mut state = self.state.lock().await;
            if !state.is_leader {
                warn!(target: ELECTION, "ignoring NEW_ELECTION: not a leader");
                return;
            }
            state.prepare(leader_count, difficulty, &payload);
        }
        self.winners.lock().await.clear();
        info!(target: ELECTION, leader_count, difficulty, "📣 Preparing election");

        let election = Command::Election { difficulty, payload: payload.clone() }.to_string();
        let registry = self.network.registry();
        let leaders = registry.broadcast(Scope::Only(Role::Leader), &election).await;
        let nodes = registry.broadcast(Scope::Only(Role::Node), &election).await;
        debug!(target: ELECTION, leaders, nodes, "ELECTION fanned out");
        if leaders + nodes == 0 {
            warn!(target: ELECTION, "no peer received ELECTION, the round cannot complete");
        }

        let mut state = self.state.lock().await;
        if state.is_current(&payload) && state.phase == Phase::Preparing {
            state.phase = Phase::Mining;
        }
    }

    async fn on_election(&self, difficulty: u32, payload: String) {
        let token = {
            let mut state = self.state.lock().await;
            if state.is_current(&payload) {
                if state.mining {
                    debug!(target: ELECTION, "already mining this round");
                    return;
                }
                state.round_token()
            } else {
                state.begin_round(difficulty, &payload)
            }
        };
        self.spawn_mining(difficulty, payload, token).await;
    }

    async fn spawn_mining(&self, difficulty: u32, payload: String, token: CancellationToken) {
        {
            let mut state = self.state.lock().await;
            if !state.is_current(&payload) {
                return;
            }
            state.mining = true;
            if state.phase == Phase::Idle || state.phase == Phase::Preparing {
                state.phase = Phase::Mining;
            }
        }

        let Some(me) = self.me.upgrade() else {
            return;
        };
        let engine = self.engine.clone();
        let timeout = self.options.round_timeout;
        info!(target: ELECTION, difficulty, workers = engine.workers(), "⛏️ Mining");

        tokio::spawn(async move {
            let search = engine.mine(&payload, difficulty, &token);
            let found = match timeout {
                Some(limit) => match tokio::time::timeout(limit, search).await {
                    Ok(found) => found,
                    Err(_) => {
                        warn!(target: ELECTION, "round timed out after {:?}", limit);
                        None
                    }
                },
                None => search.await,
            };

            match found {
                Some(nonce) => me.on_nonce_found(payload, nonce).await,
                None => {
                    let mut state = me.state.lock().await;
                    if state.is_current(&payload) {
                        state.mining = false;
                    }
                }
            }
        });
    }

    async fn on_nonce_found(&self, payload: String, nonce: String) {
        {
            let mut state = self.state.lock().await;
            if !state.is_current(&payload) {
                debug!(target: ELECTION, "discarding nonce from a finished round");
                return;
            }
            state.mining = false;
        }
        info!(target: ELECTION, %nonce, "💎 Found nonce");

        let Some(leader) = self.network.registry().pick_any(Role::Leader).await else {
            warn!(target: ELECTION, "no leader to report the win to");
            return;
        };
        // How the leader will name us in ELECTED.
        let advertised = SocketAddr::new(leader.local_addr().ip(), self.network.transport().listen_port());
        self.state.lock().await.advertised_self = Some(advertised.to_string());
        if let Err(e) = leader.send(&Command::Win { nonce }.to_string()).await {
            warn!(target: ELECTION, "could not report win to {}: {}", leader.advertised_addr(), e);
        }
    }

    async fn on_win(&self, conn: &PeerConnection, nonce: String) {
        let (accepting, payload, difficulty) = {
            let state = self.state.lock().await;
            (
                state.is_leader && state.under_election,
                state.election_nonce.clone(),
                state.difficulty,
            )
        };

        if !accepting {
            debug!(target: ELECTION, "rejecting WIN outside of an election");
            let _ = conn.send(&Command::WinRejected.to_string()).await;
            return;
        }
        if !validate_proof(&payload, &nonce, difficulty) {
            warn!(target: ELECTION, peer = %conn.remote_addr(), %nonce, "invalid proof dropped");
            return;
        }

        let address = conn.advertised_addr();
        info!(target: ELECTION, winner = %address, "✅ Accepted win");

        // The winner must learn it won before ELECTED can reach it.
        if let Err(e) = conn.send(&Command::WinAccepted.to_string()).await {
            warn!(target: ELECTION, "could not confirm win: {}", e);
        }
        let advice = Command::WinAdvice { address: address.clone() }.to_string();
        self.network
            .registry()
            .broadcast(Scope::Only(Role::Leader), &advice)
            .await;
        self.record_win_advice(address).await;
    }

    /// Adds a winner. Reaching the required count closes the round and
    /// broadcasts `ELECTED`.
    async fn record_win_advice(&self, address: String) {
        let elected = {
            let mut winners = self.winners.lock().await;
            let mut state = self.state.lock().await;
            if !state.is_leader || !state.under_election {
                debug!(target: ELECTION, "ignoring WIN_ADVICE outside of an election");
                return;
            }
            if winners.contains(&address) {
                return;
            }
            winners.push(address.clone());
            info!(target: ELECTION, winner = %address, "{}/{} winners", winners.len(), state.required_leader_count);

            if winners.len() >= state.required_leader_count {
                state.under_election = false;
                state.phase = Phase::Electing;
                Some(winners.clone())
            } else {
                state.phase = Phase::CollectingWinAdvice;
                None
            }
        };

        let Some(elected) = elected else {
            return;
        };
        let announcement = Command::Elected { addresses: elected.clone() }.to_string();
        let delivered = self.network.registry().broadcast(Scope::All, &announcement).await;
        info!(target: ELECTION, "📜 ELECTED {:?} sent to {} peers", elected, delivered);

        self.on_elected(elected).await;
    }

    async fn on_elected(&self, addresses: Vec<String>) {
        let (become_leader, advertised_self) = {
            let mut state = self.state.lock().await;
            if !state.round_active {
                debug!(target: ELECTION, "ignoring ELECTED: no round in progress");
                return;
            }
            let become_leader = state.become_leader_after_election;
            let advertised_self = state.advertised_self.clone();
            state.reset();
            state.is_leader = become_leader;
            (become_leader, advertised_self)
        };
        self.winners.lock().await.clear();

        let dropped = self.network.registry().disconnect_role(Role::Leader).await;
        info!(
            target: ELECTION,
            leader = become_leader,
            "🏁 Election finished, dropped {} leader connections",
            dropped
        );

        let candidates: Vec<String> = addresses
            .into_iter()
            .filter(|address| Some(address) != advertised_self.as_ref())
            .collect();

        if become_leader {
            let Some(peer) = candidates.choose(&mut rand::thread_rng()).cloned() else {
                info!(target: ELECTION, "👑 Sole leader");
                return;
            };
            if let Err(e) = self.connect_leader(&peer).await {
                warn!(target: ELECTION, "could not reach fellow leader {}: {}", peer, e);
            }
        } else {
            for peer in candidates {
                if let Err(e) = self.connect_leader(&peer).await {
                    warn!(target: ELECTION, "could not reach leader {}: {}", peer, e);
                }
            }
        }
    }

    async fn on_leader_query(&self, conn: &PeerConnection, announce_leader: bool) {
        if self.is_leader().await {
            if let Err(e) = conn.send(&Command::Yes.to_string()).await {
                warn!(conn = conn.id(), "reply failed: {}", e);
                return;
            }
            let to = if announce_leader { Role::Leader } else { Role::Node };
            if self.network.registry().promote(conn.id(), Role::Client, to).await {
                info!(peer = %conn.advertised_addr(), %to, "Peer joined");
            }
            return;
        }

        let reply = match self.network.registry().pick_any(Role::Leader).await {
            Some(leader) => Command::LeaderAddress(leader.advertised_addr()),
            None => Command::NoLeader,
        };
        if let Err(e) = conn.send(&reply.to_string()).await {
            warn!(conn = conn.id(), "reply failed: {}", e);
        }
    }

    /// Asks any leader for its ledger. Returns false when no leader is connected.
    pub async fn request_blockchain(&self) -> Result<bool, ElectionError> {
        match self.network.registry().pick_any(Role::Leader).await {
            Some(leader) => {
                leader.send(&Command::GetBlockchain.to_string()).await?;
                info!("📤 Requested ledger from {}", leader.advertised_addr());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn on_get_blockchain(&self, conn: &PeerConnection) {
        let bytes = match self.ledger.export().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(peer = %conn.remote_addr(), "ledger requested but none is loaded");
                return;
            }
            Err(e) => {
                error!("could not read ledger: {}", e);
                return;
            }
        };
        let data = STANDARD.encode(&bytes);
        match conn.send(&Command::BlockchainData { data }.to_string()).await {
            Ok(()) => info!(peer = %conn.remote_addr(), "📦 Sent ledger ({} bytes)", bytes.len()),
            Err(e) => warn!(peer = %conn.remote_addr(), "ledger transfer failed: {}", e),
        }
    }

    async fn on_blockchain_data(&self, conn: &PeerConnection, data: &str) {
        let bytes = match STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %conn.remote_addr(), "ledger payload is not base64: {}", e);
                return;
            }
        };
        if let Err(e) = self.ledger.import(&bytes).await {
            warn!(peer = %conn.remote_addr(), "rejected ledger: {}", e);
        }
    }

    /// Sends `PING` to every connection; returns how many were delivered.
    pub async fn ping_all(&self) -> usize {
        self.network
            .registry()
            .broadcast(Scope::All, &Command::Ping.to_string())
            .await
    }

    pub async fn show_connections(&self) -> ConnectionSummary {
        let registry = self.network.registry();
        let counts = registry.counts().await;
        let connections = registry
            .snapshot_all()
            .await
            .into_iter()
            .map(|(role, conn)| ConnectionInfo {
                id: conn.id(),
                role,
                remote_addr: conn.remote_addr(),
                advertised_addr: conn.advertised_addr(),
            })
            .collect();
        ConnectionSummary { counts, connections }
    }
}

#[async_trait]
impl MessageHandler for ElectionCoordinator {
    async fn handle(&self, conn: &PeerConnection, command: Command) {
        debug!(conn = conn.id(), "⬅️ {}", summarize(&command));
        match command {
            Command::LeaderQuery { announce_leader } => self.on_leader_query(conn, announce_leader).await,
            Command::Ping => {
                let _ = conn.send(&Command::Pong.to_string()).await;
            }
            Command::Yes => {
                self.announcements.lock().await.remove(&conn.id());
            }
            Command::NoLeader | Command::LeaderAddress(_) => {
                if self.network.registry().role_of(conn.id()).await == Some(Role::Leader) {
                    self.retry_announce(conn).await;
                }
            }
            Command::Pong | Command::UnknownCommand => {}
            Command::NewElection { leader_count, difficulty, payload } => {
                self.on_new_election(leader_count.max(1), difficulty, payload).await
            }
            Command::Election { difficulty, payload } => self.on_election(difficulty, payload).await,
            Command::Win { nonce } => self.on_win(conn, nonce).await,
            Command::WinAdvice { address } => self.record_win_advice(address).await,
            Command::WinAccepted => {
                self.state.lock().await.become_leader_after_election = true;
                info!(target: ELECTION, "🏆 Our win was accepted");
            }
            Command::WinRejected => {
                self.state.lock().await.become_leader_after_election = false;
                debug!(target: ELECTION, "our win was rejected");
            }
            Command::Elected { addresses } => self.on_elected(addresses).await,
            Command::GetBlockchain => self.on_get_blockchain(conn).await,
            Command::BlockchainData { data } => self.on_blockchain_data(conn, &data).await,
            Command::Unknown(_) => {}
        }
    }

    async fn on_disconnect(&self, conn: &PeerConnection) {
        self.announcements.lock().await.remove(&conn.id());
    }
}

/// Log form of a command; ledger payloads are not printed in full.
fn summarize(command: &Command) -> String {
    match command {
        Command::BlockchainData { data } => format!("BLOCKCHAIN_DATA <{} chars>", data.len()),
        other => other.to_string(),
    }
}
