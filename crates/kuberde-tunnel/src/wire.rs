//! Wire framing: wraps a WebSocket as a reliable byte stream so a Yamux
//! session can be opened over it (spec §6 "Wire framing", §4.1
//! "Multiplexed tunnel semantics").
//!
//! Each binary WebSocket message is one chunk of the byte stream;
//! non-binary messages are dropped; a close frame (either direction)
//! maps to EOF. Two concrete wrappers exist rather than one generic
//! type because the Server (`axum::extract::ws::WebSocket`) and the
//! Agent (`tokio_tungstenite`'s client stream) use distinct, unrelated
//! `Message`/`Error` types from two different crates.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::{Buf, BytesMut};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::Message as TtMessage;
use tokio_tungstenite::MaybeTlsStream;

/// Server-side wrapper around an upgraded axum WebSocket.
pub struct ServerWsStream {
    inner: WebSocket,
    read_buf: BytesMut,
    eof: bool,
}

impl ServerWsStream {
    pub fn new(inner: WebSocket) -> Self {
        Self { inner, read_buf: BytesMut::new(), eof: false }
    }
}

impl AsyncRead for ServerWsStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = buf.remaining().min(self.read_buf.len());
                buf.put_slice(&self.read_buf[..n]);
                self.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            if self.eof {
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    self.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)));
                }
                Poll::Ready(Some(Ok(AxumMessage::Binary(data)))) => {
                    self.read_buf.extend_from_slice(&data);
                    continue;
                }
                Poll::Ready(Some(Ok(AxumMessage::Close(_)))) => {
                    self.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(_))) => continue, // drop non-binary frames
            }
        }
    }
}

impl AsyncWrite for ServerWsStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match Pin::new(&mut self.inner).poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
            Poll::Ready(Ok(())) => {}
        }
        match Pin::new(&mut self.inner).start_send(AxumMessage::Binary(buf.to_vec().into())) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Agent-side wrapper around the client WebSocket stream.
pub struct AgentWsStream {
    inner: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    read_buf: BytesMut,
    eof: bool,
}

impl AgentWsStream {
    pub fn new(inner: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>) -> Self {
        Self { inner, read_buf: BytesMut::new(), eof: false }
    }
}

impl AsyncRead for AgentWsStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = buf.remaining().min(self.read_buf.len());
                buf.put_slice(&self.read_buf[..n]);
                self.read_buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            if self.eof {
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    self.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e)));
                }
                Poll::Ready(Some(Ok(TtMessage::Binary(data)))) => {
                    self.read_buf.extend_from_slice(&data);
                    continue;
                }
                Poll::Ready(Some(Ok(TtMessage::Close(_)))) => {
                    self.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(_))) => continue,
            }
        }
    }
}

impl AsyncWrite for AgentWsStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match Pin::new(&mut self.inner).poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
            Poll::Ready(Ok(())) => {}
        }
        match Pin::new(&mut self.inner).start_send(TtMessage::Binary(buf.to_vec().into())) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
