//! Connection to a rate server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ratewire_common::{RatewireError, Result};
use ratewire_protocol::{ClientMessage, FrameReader, FrameWriter, ServerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handler::ServerEvent;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pending rate queries keyed by request id.
type PendingMap = DashMap<u64, oneshot::Sender<ServerMessage>>;

/// One open session with the server.
///
/// A reader task routes replies to the query waiting on their request id
/// and forwards everything else to the event channel.
pub struct ServerConnection {
    peer: Option<SocketAddr>,
    writer: Mutex<FrameWriter<BoxedWriter>>,
    pending: Arc<PendingMap>,
    reader: JoinHandle<()>,
}

impl ServerConnection {
    /// Open a TCP connection.
    pub async fn open(
        addr: impl ToSocketAddrs,
        connect_timeout: Duration,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                RatewireError::Io(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
            })??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();

        let mut connection = Self::from_stream(stream, events);
        connection.peer = peer;
        info!(peer = ?peer, "Connected to rate server");
        Ok(connection)
    }

    /// Run a session over an already established stream.
    pub fn from_stream<S>(stream: S, events: mpsc::Sender<ServerEvent>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending = Arc::new(PendingMap::new());
        let reader = tokio::spawn(read_loop(
            FrameReader::new(read_half),
            pending.clone(),
            events,
        ));

        Self {
            peer: None,
            writer: Mutex::new(FrameWriter::new(Box::new(write_half) as BoxedWriter)),
            pending,
            reader,
        }
    }

    /// Send a frame that expects no direct reply.
    pub async fn send(&self, message: &ClientMessage) -> Result<()> {
        self.writer.lock().await.write_frame(message).await?;
        Ok(())
    }

    /// Send a frame and wait for the reply carrying `request_id`.
    pub async fn request(
        &self,
        request_id: u64,
        message: &ClientMessage,
        timeout: Duration,
    ) -> Result<ServerMessage> {
        if !self.is_connected() {
            return Err(RatewireError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if let Err(e) = self.send(message).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Reader has gone and dropped every pending sender.
            Ok(Err(_)) => Err(RatewireError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(RatewireError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no reply to request {} within {:?}", request_id, timeout),
                )))
            }
        }
    }

    /// Close the write side and wait briefly for the server to hang up.
    pub async fn close(mut self, timeout: Duration) -> Result<()> {
        self.writer.lock().await.shutdown().await?;

        if tokio::time::timeout(timeout, &mut self.reader).await.is_err() {
            self.reader.abort();
        }

        debug!(peer = ?self.peer, "Connection closed");
        Ok(())
    }

    /// Check if the server side is still open.
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut reader: FrameReader<R>,
    pending: Arc<PendingMap>,
    events: mpsc::Sender<ServerEvent>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match reader.read_frame::<ServerMessage>().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Server closed connection");
                break;
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Ignoring malformed frame from server");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Unable to read from server");
                break;
            }
        };

        match frame {
            ServerMessage::Rate { request_id, .. }
            | ServerMessage::Error {
                request_id: Some(request_id),
                ..
            } => match pending.remove(&request_id) {
                Some((_, waiter)) => {
                    // The caller may have timed out already.
                    let _ = waiter.send(frame);
                }
                None => debug!(request_id, "Reply for unknown request"),
            },
            ServerMessage::RateUpdate { .. } => {
                if let Some(update) = frame.response() {
                    forward(&events, ServerEvent::Update(update));
                }
            }
            ServerMessage::Error {
                request_id: None,
                code,
                message,
            } => forward(&events, ServerEvent::Rejected { code, message }),
        }
    }

    // Wake every waiting query with a closed channel.
    pending.clear();
}

fn forward(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Update buffer full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
