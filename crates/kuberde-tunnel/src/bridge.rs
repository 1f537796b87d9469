//! Bidirectional byte copy between two independent streams — the core
//! of both the Server's user-connection relay (spec §4.1 item 2/3) and
//! the Agent's stream-to-local-service relay (spec §4.3 "Per stream").

use tokio::io::{AsyncRead, AsyncWrite};

/// Copies bytes in both directions until either side closes. Mirrors
/// the teacher's two-subtask relay shape (`client/src-tauri/src/relay.rs`)
/// but operates on raw byte streams via `tokio::io::copy_bidirectional`
/// instead of base64-encoded JSON frames, now that both endpoints speak
/// a real multiplexed byte stream rather than a WebSocket-JSON protocol.
pub async fn copy_bidirectional<A, B>(a: &mut A, b: &mut B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    tokio::io::copy_bidirectional(a, b).await
}
