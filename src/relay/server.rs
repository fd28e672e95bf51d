// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf, split},
    net::{TcpListener, TcpStream, lookup_host},
    sync::mpsc,
    time::{interval, timeout},
};
use tokio_rustls::{TlsAcceptor, server::TlsStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::Config,
    msg::{Msg, encode, info::{DM_ERROR, UM_ERROR}},
    relay::{
        blocklist::Blocklist,
        conn::{Conn, ConnId, READ_BUF_SZ},
        queue::MsgQueue,
        router::Router,
        tls,
    },
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const TICK_PERIOD: Duration = Duration::from_secs(1);

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routing-level view of one live connection, held by the shared state.
/// The connection's protocol state lives with its reader task; this
/// handle only carries what routing and maintenance need.
#[derive(Debug)]
struct ConnHandle {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
}

/// Everything the dispatch path and the maintenance tick share: the
/// connection set, the routing index, the store-and-forward queue and
/// the blocklist. One lock, never held across an await point.
#[derive(Debug)]
pub struct RelayState {
    next_id: ConnId,
    conns: HashMap<ConnId, ConnHandle>,
    peers: HashMap<SocketAddr, ConnId>,
    router: Router,
    queue: MsgQueue,
    blocklist: Blocklist,
    /// Permitted ATC callsigns, loaded at startup. Consulted by the
    /// LOGON authentication extension point below.
    atcs: HashSet<String>,
}

impl RelayState {
    pub fn new(atcs: HashSet<String>, queue_max_bytes: u64, blocklist: Blocklist) -> Self {
        Self {
            next_id: 0,
            conns: HashMap::new(),
            peers: HashMap::new(),
            router: Router::default(),
            queue: MsgQueue::new(queue_max_bytes),
            blocklist,
            atcs,
        }
    }

    pub fn blocked(&self, peer: SocketAddr) -> bool {
        self.blocklist.contains(peer.ip())
    }

    /// Admits a freshly accepted peer. A second connection from the
    /// exact same peer address is refused; the address is the key of
    /// the connection set.
    pub fn try_register(
        &mut self,
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<Bytes>,
        cancel: CancellationToken,
    ) -> Option<ConnId> {
        if self.peers.contains_key(&peer) {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.peers.insert(peer, id);
        self.conns.insert(id, ConnHandle { peer, tx, cancel });
        Some(id)
    }

    /// Removes a connection from the connection set and, when it had
    /// logged on, from the routing index. Every teardown path ends here.
    pub fn unregister(&mut self, conn: &Conn) {
        if conn.logon_complete {
            self.router.remove(&conn.from, conn.id);
        }
        self.peers.remove(&conn.peer);
        self.conns.remove(&conn.id);
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    pub fn queued_msgs(&self) -> usize {
        self.queue.len()
    }

    /// Message dispatch: LOGON gate, destination resolution, identity
    /// rewrite, then either direct fan-out or enqueue.
    pub fn process_msg(&mut self, conn: &mut Conn, mut msg: Msg, now: i64) {
        if !conn.logon_complete && !msg.is_logon {
            self.send_error(conn, Some(&msg), "LOGON REQUIRED");
            return;
        }
        if msg.is_logon && !self.process_logon(conn, &msg) {
            return;
        }

        let to = if !msg.to.is_empty() {
            msg.to.clone()
        } else if !conn.to.is_empty() {
            conn.to.clone()
        } else {
            self.send_error(conn, Some(&msg), "MESSAGE MISSING TO= HEADER");
            return;
        };

        // The relay asserts the authenticated identity; a peer cannot
        // spoof someone else's callsign in the from header.
        debug_assert!(!conn.from.is_empty());
        msg.from = conn.from.clone();

        let encoded = Bytes::from(encode(&msg));
        let targets = self.router.lookup(&to);
        if targets.is_empty() {
            if !self.queue.enqueue(&msg.from, &to, now, encoded) {
                self.send_error(conn, Some(&msg), "TOO MANY QUEUED MESSAGES");
            }
        } else {
            for &id in targets {
                if let Some(handle) = self.conns.get(&id) {
                    let _ = handle.tx.send(encoded.clone());
                }
            }
        }
    }

    fn process_logon(&mut self, conn: &mut Conn, msg: &Msg) -> bool {
        // Authentication TODO: vet the claimed identity here (enforce
        // msg.to against the ATC registry, verify aircraft credentials).
        // Until then a LOGON is trusted as-is.
        if !msg.to.is_empty() && !self.atcs.contains(&msg.to) {
            debug!(to = %msg.to, "logon to an ATC station not in the registry");
        }

        if conn.logon_complete {
            self.router.remove(&conn.from, conn.id);
            conn.logon_complete = false;
            conn.from.clear();
        }

        conn.to = msg.to.clone();
        if msg.from.is_empty() {
            self.send_error(conn, Some(msg), "LOGON REQUIRES FROM= HEADER");
            return false;
        }
        conn.from = msg.from.clone();
        conn.logon_complete = true;
        self.router.insert(&conn.from, conn.id);
        info!(from = %conn.from, to = %conn.to, peer = %conn.peer, "logon complete");
        true
    }

    /// Replies to a peer error with a single error element: an uplink
    /// error when the offending message was a downlink, a downlink
    /// error otherwise.
    fn send_error(&self, conn: &Conn, orig: Option<&Msg>, reason: &str) {
        let (is_dl, code) = match orig {
            Some(orig) if orig.is_dl() => (false, UM_ERROR),
            Some(_) => (true, DM_ERROR),
            None => (false, UM_ERROR),
        };
        let mut err = Msg::of_type(is_dl, code)
            .expect("error elements are in the static table")
            .with_text(reason);
        err.mrn = orig.and_then(|m| m.min);
        conn.send_bytes(Bytes::from(encode(&err)));
    }

    /// One maintenance pass: deliver queued messages whose recipient is
    /// now connected, drop aged ones, refresh the blocklist and kick
    /// connections that became blocked.
    pub fn tick(&mut self, now: i64) {
        let Self {
            queue,
            router,
            conns,
            ..
        } = self;
        queue.sweep(now, |entry| {
            let targets = router.lookup(&entry.to);
            if targets.is_empty() {
                return false;
            }
            for &id in targets {
                if let Some(handle) = conns.get(&id) {
                    // Stored form is already encoded; deliver verbatim.
                    let _ = handle.tx.send(entry.encoded.clone());
                }
            }
            debug!(to = %entry.to, "delivered queued message");
            true
        });

        if self.blocklist.refresh() {
            for handle in self.conns.values() {
                if self.blocklist.contains(handle.peer.ip()) {
                    warn!(peer = %handle.peer, "closing connection now on blocklist");
                    handle.cancel.cancel();
                }
            }
        }
    }
}

/// The relay daemon: a TLS endpoint accepting aircraft and ATC
/// connections and routing CPDLC messages between them.
pub struct Relay {
    listeners: Vec<TcpListener>,
    local_addrs: Vec<SocketAddr>,
    acceptor: TlsAcceptor,
    state: Arc<Mutex<RelayState>>,
    cancel: CancellationToken,
}

impl Relay {
    /// Binds every configured listen endpoint and prepares the TLS
    /// context. Any failure here is a startup error.
    pub async fn bind(cfg: &Config, default_port: u16) -> Result<Self> {
        let mut listeners = Vec::new();
        let mut bound = HashSet::new();
        for (host, port) in cfg.listen_endpoints(default_port)? {
            let addrs = lookup_host((host.as_str(), port))
                .await
                .with_context(|| format!("invalid listen directive \"{host}:{port}\""))?;
            for addr in addrs {
                // Distinct directives may resolve to one socket address
                // (two names for a host); that is an operator error.
                if !bound.insert(addr) {
                    anyhow::bail!(
                        "invalid listen directive \"{host}:{port}\": \
                         address already used on another socket"
                    );
                }
                let listener = TcpListener::bind(addr).await.with_context(|| {
                    format!("invalid listen directive \"{host}:{port}\": cannot bind {addr}")
                })?;
                listeners.push(listener);
            }
        }
        Self::from_listeners(cfg, listeners)
    }

    /// Builds the relay around already-bound sockets (socket activation,
    /// ephemeral test ports).
    pub fn from_listeners(cfg: &Config, listeners: Vec<TcpListener>) -> Result<Self> {
        anyhow::ensure!(!listeners.is_empty(), "no listen sockets");
        let acceptor = tls::acceptor(
            &cfg.tls.certfile,
            &cfg.tls.keyfile,
            cfg.tls.cafile.as_deref(),
        )?;
        let local_addrs = listeners
            .iter()
            .map(TcpListener::local_addr)
            .collect::<std::io::Result<_>>()
            .context("cannot read listener address")?;
        let state = RelayState::new(
            cfg.atc.iter().cloned().collect(),
            cfg.queue.max_bytes,
            Blocklist::new(cfg.blocklist.clone()),
        );
        Ok(Self {
            listeners,
            local_addrs,
            acceptor,
            state: Arc::new(Mutex::new(state)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Cancelling this token shuts the relay down cooperatively.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs accept loops and maintenance until shutdown. Connection
    /// tasks are children of the relay's cancellation token, so one
    /// cancel tears the whole process down.
    pub async fn run(self) -> Result<()> {
        for listener in self.listeners {
            let addr = listener.local_addr().context("listener address")?;
            info!(%addr, "listening for CPDLC connections");
            tokio::spawn(accept_loop(
                listener,
                self.acceptor.clone(),
                Arc::clone(&self.state),
                self.cancel.clone(),
            ));
        }
        tokio::spawn(maintenance(Arc::clone(&self.state), self.cancel.clone()));

        self.cancel.cancelled().await;
        info!("relay shutting down");
        Ok(())
    }
}

async fn maintenance(state: Arc<Mutex<RelayState>>, cancel: CancellationToken) {
    let mut tick = interval(TICK_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {},
        }
        lock(&state).tick(unix_now());
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<Mutex<RelayState>>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (sock, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "error accepting connection");
                continue;
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let conn_cancel = cancel.child_token();
        let id = {
            let mut st = lock(&state);
            if st.blocked(peer) {
                warn!(%peer, "incoming connection blocked: address on blocklist");
                continue;
            }
            match st.try_register(peer, tx.clone(), conn_cancel.clone()) {
                Some(id) => id,
                None => {
                    warn!(%peer, "error accepting connection: duplicate peer address");
                    continue;
                },
            }
        };

        tokio::spawn(conn_task(
            sock,
            peer,
            id,
            tx,
            rx,
            acceptor.clone(),
            Arc::clone(&state),
            conn_cancel,
        ));
    }
}

#[allow(clippy::too_many_arguments)]
async fn conn_task(
    sock: TcpStream,
    peer: SocketAddr,
    id: ConnId,
    tx: mpsc::UnboundedSender<Bytes>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    acceptor: TlsAcceptor,
    state: Arc<Mutex<RelayState>>,
    cancel: CancellationToken,
) {
    let mut conn = Conn::new(id, peer, tx);

    let handshake = tokio::select! {
        _ = cancel.cancelled() => {
            lock(&state).unregister(&conn);
            return;
        },
        r = timeout(HANDSHAKE_TIMEOUT, acceptor.accept(sock)) => r,
    };
    let stream = match handshake {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            warn!(%peer, %err, "TLS handshake error");
            lock(&state).unregister(&conn);
            return;
        },
        Err(_) => {
            warn!(%peer, "TLS handshake timed out");
            lock(&state).unregister(&conn);
            return;
        },
    };
    debug!(%peer, "TLS handshake complete");

    let (mut rd, mut wr) = split(stream);
    let res: Result<()> = tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        r = input_pump(&mut rd, &mut conn, &state) => r,
        r = output_pump(&mut wr, &mut rx) => r,
    };
    if let Err(err) = res {
        warn!(%peer, %err, "closing connection");
    } else {
        debug!(%peer, "connection closed");
    }

    lock(&state).unregister(&conn);
    // Dropping the stream after shutdown sends the TLS close-notify.
    let _ = wr.shutdown().await;
}

/// Reads decrypted input, enforces the plain-text and buffer-size
/// rules, frames messages and hands them to dispatch.
async fn input_pump(
    rd: &mut ReadHalf<TlsStream<TcpStream>>,
    conn: &mut Conn,
    state: &Arc<Mutex<RelayState>>,
) -> Result<()> {
    let mut buf = [0u8; READ_BUF_SZ];
    loop {
        let bytes = rd.read(&mut buf).await.context("read error on connection")?;
        if bytes == 0 {
            return Ok(());
        }
        conn.push_bytes(&buf[..bytes])?;
        let msgs = conn.drain_msgs()?;
        if msgs.is_empty() {
            continue;
        }
        let now = unix_now();
        let mut st = lock(state);
        for msg in msgs {
            st.process_msg(conn, msg, now);
        }
    }
}

/// Drains the outbound buffer into the TLS stream.
async fn output_pump(
    wr: &mut WriteHalf<TlsStream<TcpStream>>,
    rx: &mut mpsc::UnboundedReceiver<Bytes>,
) -> Result<()> {
    while let Some(chunk) = rx.recv().await {
        wr.write_all(&chunk)
            .await
            .context("send error on connection")?;
    }
    Ok(())
}
