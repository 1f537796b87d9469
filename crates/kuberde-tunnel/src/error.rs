//! Stream- and tunnel-local errors (spec §7: "Stream errors — terminate
//! just that stream; log and continue"). These never escape to the
//! Server's or Agent's top-level error taxonomy; callers log and drop.

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("yamux connection error: {0}")]
    Connection(#[from] yamux::ConnectionError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no tunnel for agent")]
    NoTunnel,
}
