//! Live fan-out of encoded entries to TCP subscribers.
//!
//! The hub runs its own tokio runtime: one task accepts connections and one
//! task per subscriber drains that subscriber's bounded queue into its socket.
//! The producer side ([`BroadcastHub::publish`]) is plain synchronous code
//! that takes one short lock and never waits on the network.
//!
//! Delivery is best effort. A subscriber whose queue is full or whose socket
//! stalls past the send timeout is dropped rather than throttled.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{LogError, Result};
use crate::ring_buffer::{Capacity, RingBuffer};

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Settings for a [`BroadcastHub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub addr: SocketAddr,
    /// Backlog replayed to each new subscriber.
    pub replay: Capacity,
    /// Per-subscriber queue length, not counting the replayed backlog.
    pub send_queue: usize,
    pub send_timeout: Duration,
}

struct Slot {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
}

struct HubState {
    replay: RingBuffer<Bytes>,
    subscribers: Vec<Slot>,
    next_id: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<HubState>,
    dropped: AtomicU64,
    send_queue: usize,
    send_timeout: Duration,
}

impl Shared {
    /// Registers a connection and queues the replay backlog ahead of any
    /// later publish. Runs under the state lock, so the join is atomic.
    fn register(&self, stream: TcpStream, peer: SocketAddr, shutdown: watch::Receiver<bool>) {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            let (tx, rx) = mpsc::channel(self.send_queue + state.replay.len());
            for frame in state.replay.iter() {
                // capacity covers the whole backlog
                let _ = tx.try_send(frame.clone());
            }

            let id = state.next_id;
            state.next_id += 1;
            debug!(id, %peer, backlog = state.replay.len(), "subscriber joined");
            state.subscribers.push(Slot { id, peer, tx });
            rx
        };

        tokio::spawn(send_loop(stream, rx, peer, self.send_timeout, shutdown));
    }
}

/// Multi-subscriber broadcaster with a bounded replay backlog.
///
/// # Examples
///
/// ```no_run
/// # use exp_logger::broadcast_hub::{BroadcastHub, HubConfig};
/// # use exp_logger::Capacity;
/// # use std::time::Duration;
/// let mut hub = BroadcastHub::start(HubConfig {
///     addr: "127.0.0.1:0".parse().unwrap(),
///     replay: Capacity::Bounded(100),
///     send_queue: 1024,
///     send_timeout: Duration::from_secs(1),
/// })?;
/// println!("listening on {}", hub.local_addr());
/// hub.publish(br#"{"step":1}"#);
/// hub.close();
/// # Ok::<(), exp_logger::LogError>(())
/// ```
pub struct BroadcastHub {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    runtime: Option<Runtime>,
}

impl BroadcastHub {
    /// Starts the runtime, binds the listener and begins accepting.
    ///
    /// The hub drives its own runtime, so it cannot be started from inside
    /// another one; that case is reported as [`LogError::Bind`].
    pub fn start(config: HubConfig) -> Result<Self> {
        if Handle::try_current().is_ok() {
            return Err(LogError::Bind(io::Error::new(
                io::ErrorKind::Other,
                "broadcast hub cannot be started from within an async runtime",
            )));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("exp-logger-hub")
            .enable_all()
            .build()
            .map_err(LogError::Bind)?;

        let listener = runtime
            .block_on(TcpListener::bind(config.addr))
            .map_err(LogError::Bind)?;
        let local_addr = listener.local_addr().map_err(LogError::Bind)?;

        let shared = Arc::new(Shared {
            state: Mutex::new(HubState {
                replay: RingBuffer::new(config.replay),
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
            }),
            dropped: AtomicU64::new(0),
            send_queue: config.send_queue.max(1),
            send_timeout: config.send_timeout,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        runtime.spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx));

        info!(%local_addr, replay = ?config.replay, "broadcast hub listening");

        Ok(Self {
            shared,
            local_addr,
            shutdown_tx,
            runtime: Some(runtime),
        })
    }

    /// Records `record` in the replay backlog and offers it to every subscriber.
    ///
    /// Never blocks on a subscriber: a full or closed queue removes that
    /// subscriber from the set.
    pub fn publish(&self, record: &[u8]) {
        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record);
        line.push(b'\n');
        let frame = Bytes::from(line);

        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.replay.push(frame.clone());

        let dropped = &self.shared.dropped;
        state.subscribers.retain(|slot| match slot.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(id = slot.id, peer = %slot.peer, "subscriber queue full, dropping");
                dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(id = slot.id, peer = %slot.peer, "subscriber disconnected");
                dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribers currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Subscribers removed so far because they fell behind or went away.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn replay_len(&self) -> usize {
        self.shared.state.lock().replay.len()
    }

    pub fn is_closed(&self) -> bool {
        self.runtime.is_none()
    }

    /// Stops accepting, closes every subscriber connection and shuts the
    /// runtime down. Safe to call more than once.
    pub fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.subscribers.clear();
            state.replay.clear();
        }
        let _ = self.shutdown_tx.send(true);
        // blocking on shutdown is not allowed from inside a runtime
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
        }

        info!(local_addr = %self.local_addr, "broadcast hub closed");
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    shared.register(stream, peer, shutdown.clone());
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("accept loop stopped");
}

async fn send_loop(
    mut stream: TcpStream,
    mut rx: mpsc::Receiver<Bytes>,
    peer: SocketAddr,
    send_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            next = rx.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        match tokio::time::timeout(send_timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "subscriber write failed");
                break;
            }
            Err(_) => {
                debug!(%peer, "subscriber write timed out");
                break;
            }
        }
    }
    let _ = stream.shutdown().await;
}
