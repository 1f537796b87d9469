//! Per-stream local dial and bidirectional copy (spec §4.3 "Per
//! stream"), generalizing the teacher's `client/src-tauri/src/relay.rs`
//! base64/JSON relay into a byte-oriented bridge between a Yamux
//! stream and a local TCP connection — each stream is handled
//! independently and concurrently.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const DIAL_RETRY_BOUND: Duration = Duration::from_secs(60);

/// Dials `local_target`, retrying every 500 ms for up to 60 s to
/// accommodate a workload container that is still starting up.
pub async fn dial_with_retry(local_target: &str) -> std::io::Result<TcpStream> {
    let deadline = Instant::now() + DIAL_RETRY_BOUND;
    loop {
        match TcpStream::connect(local_target).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(e);
                }
                debug!(local_target, error = %e, "local dial failed, retrying");
                tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
            }
        }
    }
}

/// Handles one accepted Yamux stream end to end: dial the local
/// target, then bridge bytes until either side closes. A local dial
/// failure (or a mid-stream error) closes only this stream; the tunnel
/// itself is left intact (spec §4.3 failure semantics).
pub async fn handle_stream(mut stream: yamux::Stream, local_target: String) {
    let mut local = match dial_with_retry(&local_target).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(local_target, error = %e, "giving up dialing local target for this stream");
            return;
        }
    };

    match kuberde_tunnel::bridge::copy_bidirectional(&mut stream, &mut local).await {
        Ok((from_local, from_remote)) => {
            debug!(local_target, bytes_from_local = from_local, bytes_from_remote = from_remote, "stream closed");
        }
        Err(e) => {
            debug!(local_target, error = %e, "stream ended with an error");
        }
    }
}
