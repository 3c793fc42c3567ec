//! Websocket broadcast pool.
//!
//! The pool owns one listening endpoint and the set of live client
//! connections. Everything runs on a single-threaded event loop hosted on a
//! dedicated background thread:
//! - accepting connections and completing websocket handshakes
//! - draining (and discarding) whatever clients send
//! - broadcasting submitted messages
//!
//! Producers talk to the loop through a single-slot submission channel, so
//! at most one message waits while another is being broadcast. The live set
//! is only ever touched by the loop.
//!
//! Delivery is best-effort and at-most-once. A broadcast pass sends to every
//! connection live at its start, one connection at a time, so a stalled
//! client delays the ones after it. Connections whose send fails are removed
//! once the pass is over. Nothing is replayed for late joiners.
//!
//! If no connection is live when a message arrives, the loop polls for one
//! until the connect timeout, then performs the pass anyway with zero
//! recipients. Producers never see a delivery error.

use std::{
    collections::BTreeMap,
    fmt, io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    pin::Pin,
    thread,
    time::Duration,
};

use bytes::Bytes;
use futures_util::{
    future::BoxFuture,
    stream::{self, BoxStream, FuturesUnordered, SelectAll},
    FutureExt, Sink, SinkExt, StreamExt,
};
use scenecast_shared::config::PoolConfig;
use tokio::{
    net::{TcpListener, TcpStream},
    runtime,
    sync::{mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{self, Message},
    WebSocketStream,
};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<TcpStream>;
type ConnSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Identifies one client connection for the lifetime of the pool.
///
/// A client that reconnects gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection lifecycle. There is no way back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, websocket handshake in progress.
    Connecting,
    /// In the live set.
    Open,
    /// Failed or closed; leaves the live set.
    Closed,
}

/// Why a connection left the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    ClosedByPeer,
    ConnectionLost,
    SendFailure,
}

impl fmt::Display for Departure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Departure::ClosedByPeer => "closed by peer",
            Departure::ConnectionLost => "connection lost",
            Departure::SendFailure => "send failure",
        };
        f.write_str(s)
    }
}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Connections live when the pass started.
    pub recipients: usize,
    /// Sends that completed.
    pub delivered: usize,
    /// Connections removed because their send failed.
    pub dropped: usize,
}

/// Snapshot of the loop's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub live_connections: usize,
    /// Accepted sockets still in the websocket upgrade.
    pub pending_handshakes: usize,
    pub accepting: bool,
}

/// Pool start-up errors.
#[derive(Debug)]
pub enum PoolError {
    /// No port in the scanned range could be bound.
    BindExhausted {
        host: String,
        first_port: u16,
        attempts: u16,
    },
    Io(io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::BindExhausted {
                host,
                first_port,
                attempts,
            } => write!(
                f,
                "no free port on {host} after {attempts} attempts starting at {first_port}"
            ),
            PoolError::Io(e) => write!(f, "pool i/o error: {e}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Io(e) => Some(e),
            PoolError::BindExhausted { .. } => None,
        }
    }
}

impl From<io::Error> for PoolError {
    fn from(e: io::Error) -> Self {
        PoolError::Io(e)
    }
}

enum Request {
    Broadcast {
        payload: Bytes,
        reply: oneshot::Sender<PassReport>,
    },
}

enum Control {
    StopAccepting(oneshot::Sender<()>),
    Status(oneshot::Sender<PoolStatus>),
}

#[derive(Debug, Clone, Copy)]
struct PoolSettings {
    poll_interval: Duration,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(cfg: &PoolConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            connect_timeout: cfg.connect_timeout(),
            handshake_timeout: cfg.handshake_timeout(),
        }
    }
}

/// Handle to a running pool.
///
/// Dropping the handle stops the loop, which closes every connection.
pub struct BroadcastPool {
    host: String,
    port: u16,
    requests: mpsc::Sender<Request>,
    control: mpsc::UnboundedSender<Control>,
}

impl BroadcastPool {
    /// Binds `host`, trying `first_port`, `first_port + 1`, ... for up to
    /// `max_attempts` ports, and starts the loop. Timing uses defaults.
    pub fn start(host: &str, first_port: u16, max_attempts: u16) -> Result<Self, PoolError> {
        Self::with_config(&PoolConfig {
            host: host.to_string(),
            first_port,
            max_attempts,
            ..Default::default()
        })
    }

    pub fn with_config(cfg: &PoolConfig) -> Result<Self, PoolError> {
        let std_listener = bind_first_free(&cfg.host, cfg.first_port, cfg.max_attempts)?;
        let port = std_listener.local_addr()?.port();
        std_listener.set_nonblocking(true)?;

        let rt = runtime::Builder::new_current_thread().enable_all().build()?;
        let listener = {
            let _guard = rt.enter();
            TcpListener::from_std(std_listener)?
        };

        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let event_loop = PoolLoop::new(listener, requests_rx, control_rx, PoolSettings::from(cfg));

        thread::Builder::new()
            .name(format!("scenecast-pool-{port}"))
            .spawn(move || rt.block_on(event_loop.run()))?;

        info!(host = %cfg.host, port, "Serving websockets at ws://{}:{}", cfg.host, port);
        Ok(Self {
            host: cfg.host.clone(),
            port,
            requests: requests_tx,
            control: control_tx,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Websocket URL renderers connect to.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Broadcasts `payload` to every live connection and returns once the
    /// pass is over.
    ///
    /// Blocks the calling thread; must not be called from inside an async
    /// runtime (use [`BroadcastPool::submit_async`] there).
    pub fn submit(&self, payload: impl Into<Bytes>) -> PassReport {
        let (reply, done) = oneshot::channel();
        let request = Request::Broadcast {
            payload: payload.into(),
            reply,
        };
        if self.requests.blocking_send(request).is_err() {
            warn!("Pool loop has stopped; message dropped");
            return PassReport::default();
        }
        done.blocking_recv().unwrap_or_default()
    }

    pub async fn submit_async(&self, payload: impl Into<Bytes>) -> PassReport {
        let (reply, done) = oneshot::channel();
        let request = Request::Broadcast {
            payload: payload.into(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            warn!("Pool loop has stopped; message dropped");
            return PassReport::default();
        }
        done.await.unwrap_or_default()
    }

    /// Current loop state, or `None` if the loop has stopped.
    pub fn status(&self) -> Option<PoolStatus> {
        let (reply, rx) = oneshot::channel();
        self.control.send(Control::Status(reply)).ok()?;
        rx.blocking_recv().ok()
    }

    pub async fn status_async(&self) -> Option<PoolStatus> {
        let (reply, rx) = oneshot::channel();
        self.control.send(Control::Status(reply)).ok()?;
        rx.await.ok()
    }

    pub fn connection_count(&self) -> usize {
        self.status().map_or(0, |s| s.live_connections)
    }

    pub async fn connection_count_async(&self) -> usize {
        self.status_async().await.map_or(0, |s| s.live_connections)
    }

    /// Stops accepting connections and waits until the listening socket is
    /// closed.
    ///
    /// Connections that are already open stay open and keep receiving
    /// broadcasts until the pool handle is dropped. Sockets still in the
    /// websocket upgrade are dropped.
    pub fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::StopAccepting(ack)).is_ok() {
            let _ = done.blocking_recv();
        }
    }

    pub async fn close_async(&self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::StopAccepting(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

fn bind_first_free(
    host: &str,
    first_port: u16,
    max_attempts: u16,
) -> Result<StdTcpListener, PoolError> {
    for attempt in 0..max_attempts {
        let Some(port) = first_port.checked_add(attempt) else {
            break;
        };
        match StdTcpListener::bind((host, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(host, port, error = %e, "Port unavailable"),
        }
    }
    Err(PoolError::BindExhausted {
        host: host.to_string(),
        first_port,
        attempts: max_attempts,
    })
}

struct Connection {
    peer: SocketAddr,
    state: ConnectionState,
    sink: ConnSink,
}

enum HandshakeError {
    Ws(tungstenite::Error),
    TimedOut(Duration),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Ws(e) => write!(f, "{e}"),
            HandshakeError::TimedOut(after) => write!(f, "no upgrade request within {after:?}"),
        }
    }
}

struct Handshake {
    id: ConnectionId,
    peer: SocketAddr,
    result: Result<WsStream, HandshakeError>,
}

enum Inbound {
    Frame(ConnectionId, Result<Message, tungstenite::Error>),
    Ended(ConnectionId),
}

struct PendingBroadcast {
    payload: Bytes,
    reply: oneshot::Sender<PassReport>,
    deadline: Instant,
}

async fn accept_next(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// The event loop. Owns the listener and the live set.
struct PoolLoop {
    listener: Option<TcpListener>,
    requests: mpsc::Receiver<Request>,
    control: mpsc::UnboundedReceiver<Control>,
    settings: PoolSettings,
    live: BTreeMap<ConnectionId, Connection>,
    handshakes: FuturesUnordered<BoxFuture<'static, Handshake>>,
    inbound: SelectAll<BoxStream<'static, Inbound>>,
    pending: Option<PendingBroadcast>,
    next_id: u64,
}

impl PoolLoop {
    fn new(
        listener: TcpListener,
        requests: mpsc::Receiver<Request>,
        control: mpsc::UnboundedReceiver<Control>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            listener: Some(listener),
            requests,
            control,
            settings,
            live: BTreeMap::new(),
            handshakes: FuturesUnordered::new(),
            inbound: SelectAll::new(),
            pending: None,
            next_id: 1,
        }
    }

    async fn run(mut self) {
        let mut poll = time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = accept_next(self.listener.as_ref()) => self.on_accept(accepted),
                Some(handshake) = self.handshakes.next(), if !self.handshakes.is_empty() => {
                    self.on_handshake(handshake)
                }
                Some(event) = self.inbound.next(), if !self.inbound.is_empty() => {
                    self.on_inbound(event)
                }
                Some(control) = self.control.recv() => self.on_control(control),
                request = self.requests.recv(), if self.pending.is_none() => match request {
                    Some(Request::Broadcast { payload, reply }) => {
                        self.on_broadcast(payload, reply).await
                    }
                    None => break,
                },
                _ = poll.tick(), if self.pending.is_some() => self.poll_pending().await,
            }
        }

        info!(live = self.live.len(), "Broadcast pool stopped");
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        match accepted {
            Ok((stream, peer)) => {
                let id = ConnectionId(self.next_id);
                self.next_id += 1;
                debug!(connection = %id, %peer, state = ?ConnectionState::Connecting, "Accepted");
                let limit = self.settings.handshake_timeout;
                self.handshakes.push(
                    async move {
                        let result = match time::timeout(limit, accept_async(stream)).await {
                            Ok(upgraded) => upgraded.map_err(HandshakeError::Ws),
                            Err(_) => Err(HandshakeError::TimedOut(limit)),
                        };
                        Handshake { id, peer, result }
                    }
                    .boxed(),
                );
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }

    fn on_handshake(&mut self, handshake: Handshake) {
        let Handshake { id, peer, result } = handshake;
        match result {
            Ok(ws) => {
                let (sink, stream) = ws.split();
                self.inbound.push(
                    stream
                        .map(move |frame| Inbound::Frame(id, frame))
                        .chain(stream::once(async move { Inbound::Ended(id) }))
                        .boxed(),
                );
                self.insert_live(id, peer, Box::pin(sink));
            }
            Err(e) => debug!(connection = %id, %peer, error = %e, "Websocket handshake failed"),
        }
    }

    fn insert_live(&mut self, id: ConnectionId, peer: SocketAddr, sink: ConnSink) {
        self.live.insert(
            id,
            Connection {
                peer,
                state: ConnectionState::Open,
                sink,
            },
        );
        info!(connection = %id, %peer, live = self.live.len(), "Connection open");
    }

    fn on_inbound(&mut self, event: Inbound) {
        match event {
            Inbound::Frame(id, Ok(Message::Close(_))) | Inbound::Ended(id) => {
                self.remove(id, Departure::ClosedByPeer)
            }
            Inbound::Frame(id, Ok(frame)) => {
                trace!(connection = %id, len = frame.len(), "Discarding inbound frame")
            }
            Inbound::Frame(id, Err(e)) => {
                debug!(connection = %id, error = %e, "Read failed");
                self.remove(id, Departure::ConnectionLost)
            }
        }
    }

    fn on_control(&mut self, control: Control) {
        match control {
            Control::StopAccepting(ack) => {
                if let Some(listener) = self.listener.take() {
                    let addr = listener.local_addr().ok();
                    drop(listener);
                    info!(?addr, "Stopped accepting connections");
                }
                // Sockets still upgrading never join the live set.
                if !self.handshakes.is_empty() {
                    debug!(dropped = self.handshakes.len(), "Abandoning pending handshakes");
                    self.handshakes.clear();
                }
                let _ = ack.send(());
            }
            Control::Status(reply) => {
                let _ = reply.send(PoolStatus {
                    live_connections: self.live.len(),
                    pending_handshakes: self.handshakes.len(),
                    accepting: self.listener.is_some(),
                });
            }
        }
    }

    async fn on_broadcast(&mut self, payload: Bytes, reply: oneshot::Sender<PassReport>) {
        if self.live.is_empty() {
            debug!(
                timeout = ?self.settings.connect_timeout,
                "No live connections; waiting for one"
            );
            self.pending = Some(PendingBroadcast {
                payload,
                reply,
                deadline: Instant::now() + self.settings.connect_timeout,
            });
            return;
        }
        let report = self.broadcast_pass(&payload).await;
        let _ = reply.send(report);
    }

    async fn poll_pending(&mut self) {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| Instant::now() >= p.deadline);
        if self.live.is_empty() && !expired {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if self.live.is_empty() {
            warn!(
                timeout = ?self.settings.connect_timeout,
                "No connection before timeout; broadcasting to nobody"
            );
        }
        let report = self.broadcast_pass(&pending.payload).await;
        let _ = pending.reply.send(report);
    }

    /// Sends `payload` to every connection live now, then removes the ones
    /// that failed.
    async fn broadcast_pass(&mut self, payload: &Bytes) -> PassReport {
        let mut report = PassReport {
            recipients: self.live.len(),
            ..Default::default()
        };

        for (id, conn) in self.live.iter_mut() {
            match conn.sink.send(Message::binary(payload.clone())).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(connection = %id, peer = %conn.peer, error = %e, "Send failed");
                    conn.state = ConnectionState::Closed;
                    report.dropped += 1;
                }
            }
        }

        let failed: Vec<ConnectionId> = self
            .live
            .iter()
            .filter(|(_, c)| c.state == ConnectionState::Closed)
            .map(|(id, _)| *id)
            .collect();
        for id in failed {
            self.remove(id, Departure::SendFailure);
        }

        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            bytes = payload.len(),
            "Broadcast pass complete"
        );
        report
    }

    fn remove(&mut self, id: ConnectionId, why: Departure) {
        if let Some(conn) = self.live.remove(&id) {
            info!(
                connection = %id,
                peer = %conn.peer,
                reason = %why,
                live = self.live.len(),
                "Connection closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn bind_exhausted_when_range_is_taken() {
        init_tracing();
        let taken = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        match BroadcastPool::start("127.0.0.1", port, 1) {
            Err(PoolError::BindExhausted {
                first_port,
                attempts,
                ..
            }) => {
                assert_eq!(first_port, port);
                assert_eq!(attempts, 1);
            }
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("bound a taken port"),
        }
    }

    #[test]
    fn zero_attempts_never_binds() {
        assert!(matches!(
            bind_first_free("127.0.0.1", 0, 0),
            Err(PoolError::BindExhausted { .. })
        ));
    }

    #[test]
    fn bind_error_names_the_range() {
        let err = PoolError::BindExhausted {
            host: "127.0.0.1".into(),
            first_port: 7000,
            attempts: 10,
        };
        assert_eq!(
            err.to_string(),
            "no free port on 127.0.0.1 after 10 attempts starting at 7000"
        );
    }

    #[test]
    fn empty_submit_times_out_with_zero_sends() {
        init_tracing();
        let pool = BroadcastPool::with_config(&PoolConfig {
            first_port: 0,
            max_attempts: 1,
            poll_interval_ms: 10,
            connect_timeout_ms: 50,
            ..Default::default()
        })
        .unwrap();

        let started = std::time::Instant::now();
        let report = pool.submit(&b"hello"[..]);
        assert_eq!(report, PassReport::default());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.connection_count(), 0);
    }

    async fn idle_loop() -> PoolLoop {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_requests_tx, requests) = mpsc::channel(1);
        let (_control_tx, control) = mpsc::unbounded_channel();
        PoolLoop::new(
            listener,
            requests,
            control,
            PoolSettings::from(&PoolConfig::default()),
        )
    }

    fn recording_sink() -> (ConnSink, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, frame: Message| async move {
            let _ = tx.send(frame);
            Ok::<_, tungstenite::Error>(tx)
        });
        (Box::pin(sink), rx)
    }

    fn failing_sink() -> ConnSink {
        Box::pin(futures_util::sink::unfold((), |(), _frame: Message| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        }))
    }

    #[tokio::test]
    async fn failed_send_is_removed_after_the_pass() {
        init_tracing();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut pool_loop = idle_loop().await;
        let (first, mut first_rx) = recording_sink();
        let (last, mut last_rx) = recording_sink();
        pool_loop.insert_live(ConnectionId(1), peer, first);
        pool_loop.insert_live(ConnectionId(2), peer, failing_sink());
        pool_loop.insert_live(ConnectionId(3), peer, last);

        let report = pool_loop.broadcast_pass(&Bytes::from_static(b"m1")).await;
        assert_eq!(
            report,
            PassReport {
                recipients: 3,
                delivered: 2,
                dropped: 1
            }
        );
        // The connection after the failed one still got this pass's message.
        assert_eq!(first_rx.try_recv().unwrap(), Message::binary(Bytes::from_static(b"m1")));
        assert_eq!(last_rx.try_recv().unwrap(), Message::binary(Bytes::from_static(b"m1")));
        let live: Vec<_> = pool_loop.live.keys().copied().collect();
        assert_eq!(live, [ConnectionId(1), ConnectionId(3)]);

        let report = pool_loop.broadcast_pass(&Bytes::from_static(b"m2")).await;
        assert_eq!(
            report,
            PassReport {
                recipients: 2,
                delivered: 2,
                dropped: 0
            }
        );
        assert_eq!(last_rx.try_recv().unwrap(), Message::binary(Bytes::from_static(b"m2")));
    }

    #[tokio::test]
    async fn every_failed_send_is_counted() {
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut pool_loop = idle_loop().await;
        pool_loop.insert_live(ConnectionId(1), peer, failing_sink());
        pool_loop.insert_live(ConnectionId(2), peer, failing_sink());

        let report = pool_loop.broadcast_pass(&Bytes::from_static(b"x")).await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.dropped, 2);
        assert!(pool_loop.live.is_empty());
    }

    #[test]
    fn url_uses_bound_port() {
        let pool = BroadcastPool::start("127.0.0.1", 0, 1).unwrap();
        assert_ne!(pool.port(), 0);
        assert_eq!(pool.ws_url(), format!("ws://127.0.0.1:{}", pool.port()));
    }
}
