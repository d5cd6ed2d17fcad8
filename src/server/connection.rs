//! Connection handling for individual clients.

use crate::commands::Engine;
use crate::protocol::{Frame, RespParser};
use crate::server::Session;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One client connection: reads requests, runs them through the
/// engine, writes replies. Pipelined requests inside one read are
/// answered in a single write.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    parser: RespParser,
    session: Arc<Session>,
    engine: Arc<Engine>,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    /// Wrap an accepted socket.
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        session: Arc<Session>,
        engine: Arc<Engine>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        debug!(%peer_addr, "client connected");
        Self {
            stream,
            peer_addr,
            parser: RespParser::new(),
            session,
            engine,
            shutdown,
        }
    }

    /// Serve the connection until the peer disconnects, a protocol
    /// error occurs, or the server shuts down.
    pub async fn run(&mut self) -> crate::error::Result<()> {
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut write_buf = BytesMut::with_capacity(4096);

        loop {
            let n = tokio::select! {
                read = self.stream.read(&mut read_buf) => read?,
                _ = self.shutdown.changed() => {
                    debug!(peer_addr = %self.peer_addr, "closing for shutdown");
                    return Ok(());
                }
            };
            if n == 0 {
                debug!(peer_addr = %self.peer_addr, "client disconnected");
                return Ok(());
            }
            self.parser.extend(&read_buf[..n]);

            loop {
                match self.parser.parse() {
                    Ok(Some(frame)) => {
                        if let Some(tokens) = request_tokens(frame) {
                            trace!(peer_addr = %self.peer_addr, command = %String::from_utf8_lossy(&tokens[0]), "dispatch");
                            let reply = self.engine.exec(&self.session, &tokens).await;
                            reply.serialize(&mut write_buf);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Parse errors terminate the connection after
                        // the error text is sent.
                        Frame::error(format!("ERR protocol error: {e}")).serialize(&mut write_buf);
                        let _ = self.stream.write_all(&write_buf).await;
                        let _ = self.stream.flush().await;
                        return Ok(());
                    }
                }
            }

            if !write_buf.is_empty() {
                self.stream.write_all(&write_buf).await?;
                self.stream.flush().await?;
                write_buf.clear();
            }
        }
    }
}

/// Flatten a request frame into command tokens. Requests are
/// multi-bulk arrays; anything else is ignored.
fn request_tokens(frame: Frame) -> Option<Vec<Bytes>> {
    match frame {
        Frame::Array(items) if !items.is_empty() => Some(
            items
                .iter()
                .map(|item| item.to_bytes().unwrap_or_default())
                .collect(),
        ),
        _ => None,
    }
}
