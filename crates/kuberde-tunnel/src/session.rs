//! Yamux session setup over a framed byte stream (spec §6 "Wire
//! framing", §4.1 "Multiplexed tunnel semantics").
//!
//! The Relay Server always dials (`Mode::Client`) and the Agent always
//! accepts (`Mode::Server`) — an application-level convention recorded
//! as an Open Question resolution in DESIGN.md, not a library
//! restriction (yamux itself allows either side to open streams).
//!
//! `yamux::Connection` exposes only a poll-based API
//! (`poll_new_outbound`/`poll_next_inbound`/`poll_close`) on `&mut
//! self` — there is no `Control` handle and no `Stream` impl to drive
//! it with. Exactly one task may hold the `&mut Connection`, so
//! [`new_connection`] splits it three ways: a cheaply-cloneable
//! [`Control`] for requesting outbound streams from any task, an
//! [`Inbound`] for receiving accepted streams, and a [`Driver`] future
//! that owns the `Connection` and must be polled continuously for the
//! life of the tunnel — nothing else (window updates, pings, stream
//! acceptance) progresses otherwise.
//!
//! Keep-alive and write-timeout are not yamux-level configuration: they
//! are implemented at the WebSocket layer (a periodic ping on the
//! underlying socket, and a `tokio::time::timeout` around each stream
//! write) by the callers in `kuberde-server`/`kuberde-agent`, since the
//! multiplexer itself is agnostic to transport-level liveness.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::{mpsc, oneshot};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use yamux::{Config, Connection, ConnectionError, Mode, Stream as YamuxStream};

/// Maximum concurrent streams per tunnel. Generous: a single workspace
/// rarely needs more than a handful of simultaneous CLI/proxy streams,
/// but IDEs opening many small HTTP-proxied subresource requests in
/// quick succession should never be stream-starved.
const MAX_STREAMS_PER_TUNNEL: usize = 512;

fn base_config() -> Config {
    let mut config = Config::default();
    config.set_max_num_streams(MAX_STREAMS_PER_TUNNEL);
    config
}

type DialReply = oneshot::Sender<Result<YamuxStream, ConnectionError>>;

/// Clone-able handle for opening outbound streams on a [`Connection`]
/// driven elsewhere. Each call enqueues a request on the [`Driver`]
/// and awaits its reply; concurrent callers never contend for a lock
/// since the channel itself serializes access to the underlying
/// `poll_new_outbound` call.
#[derive(Clone)]
pub struct Control {
    dial_tx: mpsc::UnboundedSender<DialReply>,
}

impl Control {
    pub async fn open_stream(&self) -> Result<YamuxStream, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.dial_tx.unbounded_send(tx).map_err(|_| ConnectionError::Closed)?;
        rx.await.map_err(|_| ConnectionError::Closed)?
    }
}

/// Receives streams accepted by the peer. The Relay Server never reads
/// from this (it only ever dials); the Agent's accept loop (spec §4.3)
/// drains it directly.
pub struct Inbound {
    rx: mpsc::UnboundedReceiver<Result<YamuxStream, ConnectionError>>,
}

impl Inbound {
    pub async fn accept(&mut self) -> Option<Result<YamuxStream, ConnectionError>> {
        self.rx.next().await
    }
}

/// Owns one yamux [`Connection`] and drives it to completion. Must be
/// spawned (or otherwise polled) for the lifetime of the tunnel: every
/// call into `Connection` requires `&mut self`, so this is the sole
/// owner, and services both [`Control`] dial requests and inbound
/// stream acceptance from a single poll loop. Resolves once the
/// underlying connection is closed.
pub struct Driver<IO> {
    connection: Connection<IO>,
    dial_rx: mpsc::UnboundedReceiver<DialReply>,
    pending_dial: Option<DialReply>,
    inbound_tx: mpsc::UnboundedSender<Result<YamuxStream, ConnectionError>>,
}

impl<IO> Future for Driver<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        loop {
            let mut made_progress = false;

            if this.pending_dial.is_none() {
                if let Poll::Ready(Some(reply)) = this.dial_rx.poll_next_unpin(cx) {
                    this.pending_dial = Some(reply);
                }
            }
            if let Some(reply) = this.pending_dial.take() {
                match this.connection.poll_new_outbound(cx) {
                    Poll::Ready(result) => {
                        let _ = reply.send(result);
                        made_progress = true;
                    }
                    Poll::Pending => this.pending_dial = Some(reply),
                }
            }

            match this.connection.poll_next_inbound(cx) {
                Poll::Ready(Some(result)) => {
                    let _ = this.inbound_tx.unbounded_send(result);
                    made_progress = true;
                }
                Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => {}
            }

            if !made_progress {
                return Poll::Pending;
            }
        }
    }
}

fn new_connection<IO>(io: IO, mode: Mode) -> (Control, Inbound, Driver<IO>)
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let connection = Connection::new(io, base_config(), mode);
    let (dial_tx, dial_rx) = mpsc::unbounded();
    let (inbound_tx, inbound_rx) = mpsc::unbounded();
    (Control { dial_tx }, Inbound { rx: inbound_rx }, Driver { connection, dial_rx, pending_dial: None, inbound_tx })
}

/// Builds the Server-side multiplexed connection (dialer). The
/// returned [`Inbound`] is unused on this side (the Server only ever
/// dials) but returned for symmetry with [`agent_connection`].
pub fn server_connection<IO>(io: IO) -> (Control, Inbound, Driver<IO>)
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    new_connection(io, Mode::Client)
}

/// Builds the Agent-side multiplexed connection (listener). The
/// returned [`Control`] is unused on this side (the Agent only ever
/// accepts) but returned for symmetry with [`server_connection`].
pub fn agent_connection<IO>(io: IO) -> (Control, Inbound, Driver<IO>)
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    new_connection(io, Mode::Server)
}
