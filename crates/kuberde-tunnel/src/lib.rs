//! Tunnel wire framing, Yamux multiplexing, byte accounting and the
//! tunnel registry shared by the Relay Server and the Agent (spec §3,
//! §5, §6, §9).

pub mod accounting;
pub mod bridge;
pub mod error;
pub mod registry;
pub mod session;
pub mod wire;

pub use accounting::{ByteCounters, CountedStream};
pub use error::TunnelError;
pub use registry::{AgentTunnel, TunnelRegistry};
pub use wire::{AgentWsStream, ServerWsStream};
