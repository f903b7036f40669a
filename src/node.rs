//! The election engine: listener, inbound dispatch, election scans,
//! leadership announcement, and the leader health monitor.
//!
//! One [`BullyNode`] owns the registry behind a mutex and is shared across
//! every concurrently running task through an `Arc`. Flag mutations happen
//! under the lock; network exchanges never hold it, so an in-flight election
//! cannot stall the dispatcher or the monitor.

use std::io;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::message::{self, Request, ACK};
use crate::registry::Registry;
use crate::transport::{self, Outcome};

/// How an election run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The health monitor (or the host) decided a new election is needed.
    SelfInitiated,
    /// A peer announced an election; the announcement proves it is alive.
    Peer(u64),
}

type Callback = Arc<dyn Fn() + Send + Sync>;

/// A running or startable bully. Construct, register callbacks, wrap in an
/// `Arc`, then call [`BullyNode::run`] or [`BullyNode::spawn`].
pub struct BullyNode {
    registry: Mutex<Registry>,
    settings: Settings,
    on_becoming_leader: Option<Callback>,
    on_losing_leadership: Option<Callback>,
}

/// Handle for a node started with [`BullyNode::spawn`].
pub struct NodeHandle {
    listener: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl NodeHandle {
    /// Stops serving and monitoring. The listener socket closes with its
    /// task, so peers see refused connections afterwards.
    pub fn shutdown(self) {
        self.listener.abort();
        self.monitor.abort();
    }
}

impl BullyNode {
    pub fn new(settings: Settings) -> Result<Self> {
        let registry = Registry::new(&settings.listen, &settings.peers)?;
        Ok(Self {
            registry: Mutex::new(registry),
            settings,
            on_becoming_leader: None,
            on_losing_leadership: None,
        })
    }

    /// Registers the callback fired once per non-leader to leader transition.
    pub fn on_becoming_leader(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_becoming_leader = Some(Arc::new(callback));
    }

    /// Registers the callback fired once per leader to non-leader transition.
    pub fn on_losing_leadership(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_losing_leadership = Some(Arc::new(callback));
    }

    pub async fn local_id(&self) -> u64 {
        self.registry.lock().await.local_id()
    }

    pub async fn is_leader(&self) -> bool {
        self.registry.lock().await.is_leader()
    }

    /// Id of the believed leader, local node included, or `None` while no
    /// one is flagged.
    pub async fn leader_id(&self) -> Option<u64> {
        self.registry.lock().await.leader_id()
    }

    /// Binds the listener, probes the configured peers once, then monitors
    /// the believed leader forever. Returns only on a startup error.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let _listener = Arc::clone(&self).start_listening().await?;
        self.check_active_peers().await;
        self.monitor_leader().await;
        Ok(())
    }

    /// Same startup sequence as [`BullyNode::run`], but the monitor runs in
    /// the background and a shutdown handle is returned once the listener is
    /// bound and the startup probe has finished.
    pub async fn spawn(self: Arc<Self>) -> Result<NodeHandle> {
        let listener = Arc::clone(&self).start_listening().await?;
        self.check_active_peers().await;
        let monitor = tokio::spawn(async move { self.monitor_leader().await });
        Ok(NodeHandle { listener, monitor })
    }

    async fn start_listening(self: Arc<Self>) -> Result<JoinHandle<()>> {
        {
            let registry = self.registry.lock().await;
            ensure!(
                registry.peer_count() > 0,
                "no peers configured; leader election needs at least one peer"
            );
        }

        let listener = TcpListener::bind(&self.settings.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.settings.listen))?;
        info!(listen = %self.settings.listen, "bully listening");

        Ok(tokio::spawn(async move { self.accept_loop(listener).await }))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = node.handle_connection(stream).await {
                            debug!(peer = %peer_addr, error = ?err, "inbound connection failed");
                        }
                    });
                }
                Err(err) => warn!(error = ?err, "failed to accept connection"),
            }
        }
    }

    /// Reads exactly one request line, replies `OK` for recognized requests,
    /// and dispatches the follow-up work on its own task so this handler
    /// returns promptly. Invalid lines get no reply at all.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let Some(line) = message::read_line(&mut reader).await? else {
            return Ok(());
        };
        let Some(request) = Request::parse(&line) else {
            warn!(line = %line, "dropping invalid message");
            return Ok(());
        };

        debug!(request = %request, "handling inbound request");
        message::write_line(&mut writer, ACK).await?;

        match request {
            Request::Election { port } => {
                let node = Arc::clone(&self);
                tokio::spawn(async move {
                    node.announce_election(Trigger::Peer(port)).await;
                });
            }
            Request::Leader { port } => {
                let node = Arc::clone(&self);
                tokio::spawn(async move {
                    node.lose_leadership_to(port).await;
                });
            }
            // The OK reply already served as the liveness ack.
            Request::Ping { .. } => {}
        }

        Ok(())
    }

    /// Runs one election scan: contact active peers with a strictly higher
    /// id, in registry order. The first `OK` suppresses this node; that peer
    /// either becomes leader itself or is suppressed in turn, which is what
    /// transitively enforces highest-id-wins. Zero acknowledgments means
    /// nobody outranks us and leadership is claimed.
    pub async fn announce_election(&self, trigger: Trigger) {
        debug!(?trigger, "announcing election");

        let (request, candidates) = {
            let mut registry = self.registry.lock().await;
            if let Trigger::Peer(id) = trigger {
                registry.mark_active(id);
            }
            let local_id = registry.local_id();
            let candidates: Vec<(u64, String)> = registry
                .peers()
                .iter()
                .filter(|peer| peer.active && peer.id > local_id)
                .map(|peer| (peer.id, peer.endpoint()))
                .collect();
            (Request::Election { port: local_id }, candidates)
        };

        let mut acks = 0u32;
        for (id, endpoint) in candidates {
            match transport::exchange(&endpoint, &request.to_string(), self.settings.response_timeout)
                .await
            {
                Outcome::Unreachable(err) => {
                    debug!(peer = id, error = ?err, "marked peer inactive");
                    self.registry.lock().await.mark_inactive(id);
                }
                Outcome::NoReply(err) => {
                    debug!(peer = id, error = ?err, "no election acknowledgment");
                    self.registry.lock().await.mark_active(id);
                }
                Outcome::Reply(reply) if reply == ACK => {
                    acks += 1;
                    let mut registry = self.registry.lock().await;
                    registry.mark_active(id);
                    // The first live higher id takes the contest from here.
                    registry.mark_leader(id);
                    break;
                }
                Outcome::Reply(reply) => {
                    debug!(peer = id, reply = %reply, "unexpected election response");
                    self.registry.lock().await.mark_active(id);
                }
            }
        }

        debug!(acks, "election scan complete");
        if acks == 0 {
            self.announce_leadership().await;
        }
    }

    /// Tells every reachable peer that this node now leads, then commits
    /// leadership locally. Already leading makes this a logged no-op.
    async fn announce_leadership(&self) {
        let (already_leader, request, targets) = {
            let registry = self.registry.lock().await;
            let targets: Vec<(u64, String)> = registry
                .peers()
                .iter()
                .filter(|peer| peer.active)
                .map(|peer| (peer.id, peer.endpoint()))
                .collect();
            (
                registry.is_leader(),
                Request::Leader { port: registry.local_id() },
                targets,
            )
        };
        if already_leader {
            debug!("already leading");
            return;
        }

        let mut announcements = 0u32;
        for (id, endpoint) in targets {
            match transport::exchange(&endpoint, &request.to_string(), self.settings.response_timeout)
                .await
            {
                Outcome::Unreachable(err) => {
                    debug!(peer = id, error = ?err, "marked peer inactive");
                    self.registry.lock().await.mark_inactive(id);
                }
                outcome => {
                    // Past the connect the announcement counts whatever
                    // happens next; the count only feeds the log line below.
                    self.registry.lock().await.mark_active(id);
                    if let Outcome::Reply(reply) = &outcome {
                        if reply.as_str() != ACK {
                            debug!(peer = id, reply = %reply, "unexpected leader response");
                        }
                    }
                    announcements += 1;
                }
            }
        }

        debug!(announcements, "sent leader announcements");
        self.become_leader().await;
    }

    /// Periodic leader health check. Skips ticks while leading; otherwise
    /// pings the first leader-flagged peer and re-elects on any anomaly:
    /// no leader flagged, more than one flagged, or a missed ping.
    async fn monitor_leader(&self) {
        loop {
            tokio::time::sleep(self.settings.ping_interval).await;

            let (am_leader, leaders, target, request) = {
                let registry = self.registry.lock().await;
                let leaders = registry.peers().iter().filter(|peer| peer.leader).count();
                let target = registry
                    .peers()
                    .iter()
                    .find(|peer| peer.leader)
                    .map(|peer| (peer.id, peer.endpoint()));
                (
                    registry.is_leader(),
                    leaders,
                    target,
                    Request::Ping { port: registry.local_id() },
                )
            };
            if am_leader {
                continue;
            }

            let mut pings = 0usize;
            // Only the first leader-flagged peer is contacted; extra flags
            // are exactly the inconsistency the election clears up.
            if let Some((id, endpoint)) = target {
                match transport::exchange(
                    &endpoint,
                    &request.to_string(),
                    self.settings.response_timeout,
                )
                .await
                {
                    Outcome::Unreachable(err) => {
                        warn!(leader = id, error = ?err, "leader unreachable");
                        self.registry.lock().await.mark_inactive(id);
                    }
                    Outcome::Reply(reply) if reply == ACK => {
                        debug!(leader = id, "leader healthy");
                        pings += 1;
                    }
                    Outcome::Reply(reply) => {
                        debug!(leader = id, reply = %reply, "unexpected ping response");
                    }
                    Outcome::NoReply(err) => {
                        debug!(leader = id, error = ?err, "leader did not answer ping");
                    }
                }
            }

            if leaders != 1 || pings != leaders {
                debug!(leaders, pings, "leader check failed; starting election");
                self.announce_election(Trigger::SelfInitiated).await;
            }
        }
    }

    /// One-shot reachability pass before monitoring starts. Responders are
    /// marked active; everything else keeps its configured flag.
    async fn check_active_peers(&self) {
        let (request, targets) = {
            let registry = self.registry.lock().await;
            let targets: Vec<(u64, String)> = registry
                .peers()
                .iter()
                .map(|peer| (peer.id, peer.endpoint()))
                .collect();
            (Request::Ping { port: registry.local_id() }, targets)
        };

        for (id, endpoint) in targets {
            if let Outcome::Reply(reply) =
                transport::exchange(&endpoint, &request.to_string(), self.settings.response_timeout)
                    .await
            {
                if reply == ACK {
                    info!(peer = id, "peer is up");
                    self.registry.lock().await.mark_active(id);
                }
            }
        }
    }

    /// Commits local leadership. Fires the "became leader" callback on the
    /// actual transition only, on its own task so a slow or panicking
    /// callback cannot block registry users.
    pub(crate) async fn become_leader(&self) {
        let transitioned = self.registry.lock().await.become_leader();
        if !transitioned {
            return;
        }
        info!("became leader");
        if let Some(callback) = &self.on_becoming_leader {
            let callback = Arc::clone(callback);
            tokio::spawn(async move { callback() });
        }
    }

    /// Accepts `leader_id` as the leader. Fires the "lost leadership"
    /// callback on the actual transition only.
    pub(crate) async fn lose_leadership_to(&self, leader_id: u64) {
        let transitioned = self.registry.lock().await.lose_leadership_to(leader_id);
        if transitioned {
            info!(leader = leader_id, "lost leadership");
            if let Some(callback) = &self.on_losing_leadership {
                let callback = Arc::clone(callback);
                tokio::spawn(async move { callback() });
            }
        } else {
            debug!(leader = leader_id, "accepted leader");
        }
    }
}
