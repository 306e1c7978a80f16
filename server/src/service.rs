//! Per-connection rate sessions.

use std::sync::Arc;
use std::time::Duration;

use ratewire_common::{ConnectionId, Currency, RateRequest, RateResponse, RatewireError, Result};
use ratewire_protocol::{ClientMessage, FrameReader, FrameWriter, ServerMessage};
use ratewire_rates::RateStore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::metrics::Metrics;
use crate::registry::{SubscriptionGuard, SubscriptionRegistry, UpdateSender};

/// Answers rate queries and runs subscription sessions.
pub struct RateService {
    store: Arc<RateStore>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
    /// Outbound frames buffered per connection.
    subscriber_buffer: usize,
    /// How long a closing connection may spend flushing queued frames.
    shutdown_grace: Duration,
}

impl RateService {
    pub fn new(
        store: Arc<RateStore>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<Metrics>,
        subscriber_buffer: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            subscriber_buffer,
            shutdown_grace,
        }
    }

    /// Compute one rate against the current table.
    pub fn get_rate(&self, request: RateRequest) -> Result<RateResponse> {
        let rate = self.store.get(request.base, request.destination)?;
        Ok(RateResponse::new(request, rate))
    }

    /// Parse a pair of currency codes received from a client.
    ///
    /// Codes outside the supported set are unknown currencies, the same as
    /// a supported code the current table does not quote.
    pub fn resolve(&self, base: &str, destination: &str) -> Result<RateRequest> {
        let base: Currency = base
            .parse()
            .map_err(|_| RatewireError::UnknownCurrency(base.trim().to_string()))?;
        let destination: Currency = destination
            .parse()
            .map_err(|_| RatewireError::UnknownCurrency(destination.trim().to_string()))?;
        Ok(RateRequest::new(base, destination))
    }

    /// Run one client session until EOF, a fatal stream error, a failed
    /// write, or server shutdown.
    ///
    /// The connection is registered with an empty subscription for the
    /// whole session and unregistered on every exit path. A client that
    /// closes its side ends the session with `Ok(())`.
    pub async fn serve_connection<S>(&self, stream: S, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection_id = ConnectionId::new();
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        let guard = self.registry.register(connection_id, tx.clone());
        self.metrics.connection_opened();
        info!(connection_id = %connection_id, "Connection opened");

        let mut writer = tokio::spawn(write_loop(
            connection_id,
            FrameWriter::new(write_half),
            rx,
            self.metrics.clone(),
        ));
        let mut writer_finished = false;
        let mut reader = FrameReader::new(read_half);

        let result = loop {
            tokio::select! {
                frame = reader.read_frame::<ClientMessage>() => match frame {
                    Ok(Some(message)) => {
                        if let Err(e) = self.handle_message(&guard, &tx, message).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => {
                        info!(connection_id = %connection_id, "Client has closed connection");
                        break Ok(());
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(connection_id = %connection_id, error = %e, "Discarding malformed frame");
                        let reply = ServerMessage::error(None, &RatewireError::from(e));
                        if let Err(e) = self.reply(connection_id, &tx, reply).await {
                            break Err(e);
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Unable to read from connection");
                        break Err(e.into());
                    }
                },
                _ = &mut writer => {
                    writer_finished = true;
                    break Err(RatewireError::SendFailed(connection_id));
                }
                _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                    debug!(connection_id = %connection_id, "Closing connection for shutdown");
                    break Ok(());
                }
            }
        };

        // Unregister before the writer drains so no new updates are queued.
        drop(guard);
        drop(tx);

        if !writer_finished && tokio::time::timeout(self.shutdown_grace, &mut writer).await.is_err() {
            warn!(connection_id = %connection_id, "Writer did not drain in time");
            writer.abort();
        }

        self.metrics.connection_closed();
        info!(connection_id = %connection_id, "Connection closed");
        result
    }

    #[instrument(skip(self, guard, tx), fields(connection_id = %guard.connection_id()))]
    async fn handle_message(
        &self,
        guard: &SubscriptionGuard,
        tx: &UpdateSender,
        message: ClientMessage,
    ) -> Result<()> {
        match message {
            ClientMessage::GetRate {
                request_id,
                base,
                destination,
            } => {
                let reply = match self
                    .resolve(&base, &destination)
                    .and_then(|request| self.get_rate(request))
                {
                    Ok(response) => {
                        self.metrics.rate_request(true);
                        debug!(request_id, rate = %response, "Rate answered");
                        ServerMessage::rate(request_id, response)
                    }
                    Err(e) => {
                        self.metrics.rate_request(false);
                        debug!(request_id, error = %e, "Rate request rejected");
                        ServerMessage::error(Some(request_id), &e)
                    }
                };
                self.reply(guard.connection_id(), tx, reply).await
            }
            ClientMessage::Subscribe { base, destination } => {
                let validated = self
                    .resolve(&base, &destination)
                    .and_then(|request| self.get_rate(request).map(|_| request));

                match validated {
                    Ok(request) => {
                        if guard.add_request(request) {
                            self.metrics.subscription_added();
                            info!(pair = %request, "Subscription added");
                        }
                        Ok(())
                    }
                    Err(e) => {
                        warn!(base = %base, destination = %destination, error = %e, "Subscription rejected");
                        self.reply(guard.connection_id(), tx, ServerMessage::error(None, &e))
                            .await
                    }
                }
            }
        }
    }

    /// Queue a direct reply, waiting at most the grace period for room.
    async fn reply(
        &self,
        connection_id: ConnectionId,
        tx: &UpdateSender,
        frame: ServerMessage,
    ) -> Result<()> {
        tx.send_timeout(frame, self.shutdown_grace)
            .await
            .map_err(|_| {
                self.metrics.send_failed();
                RatewireError::SendFailed(connection_id)
            })
    }
}

/// Drain queued frames to the socket.
///
/// Returns false if a write failed; the receiver is dropped with it, which
/// the broadcaster sees as a closed subscriber.
async fn write_loop<W>(
    connection_id: ConnectionId,
    mut writer: FrameWriter<W>,
    mut rx: mpsc::Receiver<ServerMessage>,
    metrics: Arc<Metrics>,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_frame(&frame).await {
            warn!(connection_id = %connection_id, error = %e, "Unable to write frame");
            metrics.send_failed();
            return false;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(connection_id = %connection_id, error = %e, "Unable to close write side");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::NotificationBroadcaster;
    use ratewire_protocol::{StatusCode, MAX_FRAME_LEN};
    use ratewire_rates::RateTable;
    use std::collections::HashMap;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    struct Harness {
        service: Arc<RateService>,
        registry: Arc<SubscriptionRegistry>,
        store: Arc<RateStore>,
        metrics: Arc<Metrics>,
        shutdown: watch::Sender<bool>,
    }

    struct TestClient {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
        session: JoinHandle<Result<()>>,
    }

    impl TestClient {
        async fn send(&mut self, message: ClientMessage) {
            self.writer.write_frame(&message).await.unwrap();
        }

        async fn recv(&mut self) -> ServerMessage {
            self.reader.read_frame().await.unwrap().unwrap()
        }
    }

    fn usd_table(eur: f64) -> RateTable {
        RateTable::new(
            Currency::Usd,
            HashMap::from([(Currency::Eur, eur), (Currency::Gbp, 0.8)]),
        )
        .unwrap()
    }

    /// Stream whose reads come from a duplex and whose writes always fail.
    struct BrokenPipeStream {
        inner: DuplexStream,
    }

    impl AsyncRead for BrokenPipeStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenPipeStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn harness() -> Harness {
        harness_with(16, Duration::from_secs(1))
    }

    fn harness_with(subscriber_buffer: usize, shutdown_grace: Duration) -> Harness {
        let store = Arc::new(RateStore::new(usd_table(0.9)));
        let registry = Arc::new(SubscriptionRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let service = Arc::new(RateService::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
            subscriber_buffer,
            shutdown_grace,
        ));
        let (shutdown, _) = watch::channel(false);
        Harness {
            service,
            registry,
            store,
            metrics,
            shutdown,
        }
    }

    fn connect(harness: &Harness) -> TestClient {
        connect_with(harness, 4096)
    }

    fn connect_with(harness: &Harness, capacity: usize) -> TestClient {
        let (client, server) = tokio::io::duplex(capacity);
        let service = harness.service.clone();
        let shutdown = harness.shutdown.subscribe();
        let session = tokio::spawn(async move { service.serve_connection(server, shutdown).await });

        let (read_half, write_half) = tokio::io::split(client);
        TestClient {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            session,
        }
    }

    #[test]
    fn test_get_rate() {
        let harness = harness();
        let service = &harness.service;

        let response = service
            .get_rate(RateRequest::new(Currency::Eur, Currency::Gbp))
            .unwrap();
        assert!((response.rate - 0.8 / 0.9).abs() < 1e-12);

        let identity = service
            .get_rate(RateRequest::new(Currency::Jpy, Currency::Jpy))
            .unwrap();
        assert_eq!(identity.rate, 1.0);

        let err = service
            .get_rate(RateRequest::new(Currency::Eur, Currency::Jpy))
            .unwrap_err();
        assert!(matches!(err, RatewireError::UnknownCurrency(_)));
    }

    #[test]
    fn test_resolve_rejects_unknown_codes() {
        let harness = harness();
        let request = harness.service.resolve("eur", " GBP ").unwrap();
        assert_eq!(request, RateRequest::new(Currency::Eur, Currency::Gbp));

        let err = harness.service.resolve("EUR", "XYZ").unwrap_err();
        assert!(matches!(err, RatewireError::UnknownCurrency(ref code) if code == "XYZ"));
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_unary_request_over_session() {
        let harness = harness();
        let mut client = connect(&harness);

        client
            .send(ClientMessage::get_rate(7, Currency::Usd, Currency::Gbp))
            .await;
        match client.recv().await {
            ServerMessage::Rate {
                request_id, rate, ..
            } => {
                assert_eq!(request_id, 7);
                assert!((rate - 0.8).abs() < 1e-12);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        client
            .send(ClientMessage::get_rate(8, Currency::Usd, Currency::Jpy))
            .await;
        match client.recv().await {
            ServerMessage::Error {
                request_id, code, ..
            } => {
                assert_eq!(request_id, Some(8));
                assert_eq!(code, StatusCode::InvalidArgument);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        assert_eq!(harness.metrics.snapshot().rate_request_errors, 1);
    }

    #[tokio::test]
    async fn test_subscription_receives_broadcasts() {
        let harness = harness();
        let broadcaster = NotificationBroadcaster::new(
            harness.registry.clone(),
            harness.store.clone(),
            harness.metrics.clone(),
        );
        let mut client = connect(&harness);

        client
            .send(ClientMessage::subscribe(Currency::Eur, Currency::Gbp))
            .await;
        // Frames are handled in order, so the reply proves the subscription
        // is registered.
        client
            .send(ClientMessage::get_rate(1, Currency::Eur, Currency::Eur))
            .await;
        assert!(matches!(client.recv().await, ServerMessage::Rate { .. }));

        harness.store.replace(usd_table(0.95));
        broadcaster.broadcast();

        match client.recv().await {
            ServerMessage::RateUpdate {
                base,
                destination,
                rate,
            } => {
                assert_eq!((base, destination), (Currency::Eur, Currency::Gbp));
                assert!((rate - 0.8 / 0.95).abs() < 1e-12);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_subscription_keeps_session_open() {
        let harness = harness();
        let mut client = connect(&harness);

        client
            .send(ClientMessage::Subscribe {
                base: "EUR".to_string(),
                destination: "XYZ".to_string(),
            })
            .await;
        match client.recv().await {
            ServerMessage::Error { code, .. } => assert_eq!(code, StatusCode::InvalidArgument),
            other => panic!("unexpected frame: {:?}", other),
        }

        // Parses, but the table has no JPY.
        client
            .send(ClientMessage::subscribe(Currency::Eur, Currency::Jpy))
            .await;
        assert!(matches!(client.recv().await, ServerMessage::Error { .. }));

        client
            .send(ClientMessage::get_rate(2, Currency::Gbp, Currency::Eur))
            .await;
        assert!(matches!(
            client.recv().await,
            ServerMessage::Rate { request_id: 2, .. }
        ));
        assert_eq!(harness.metrics.snapshot().subscriptions_added, 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_reply() {
        let harness = harness();
        let (client, server) = tokio::io::duplex(4096);
        let service = harness.service.clone();
        let shutdown = harness.shutdown.subscribe();
        let session = tokio::spawn(async move { service.serve_connection(server, shutdown).await });

        let (read_half, mut write_half) = tokio::io::split(client);
        let mut reader = FrameReader::new(read_half);
        tokio::io::AsyncWriteExt::write_all(&mut write_half, b"{\"type\":\"unsubscribe\"}\n")
            .await
            .unwrap();

        let reply: ServerMessage = reader.read_frame().await.unwrap().unwrap();
        assert!(matches!(
            reply,
            ServerMessage::Error {
                request_id: None,
                code: StatusCode::InvalidArgument,
                ..
            }
        ));

        tokio::io::AsyncWriteExt::shutdown(&mut write_half).await.unwrap();
        tokio_test::assert_ok!(session.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_unregisters_connection() {
        let harness = harness();
        let mut client = connect(&harness);

        client
            .send(ClientMessage::subscribe(Currency::Eur, Currency::Gbp))
            .await;
        client
            .send(ClientMessage::get_rate(1, Currency::Eur, Currency::Gbp))
            .await;
        client.recv().await;
        assert_eq!(harness.registry.len(), 1);

        let TestClient {
            reader,
            mut writer,
            session,
        } = client;
        writer.shutdown().await.unwrap();

        tokio_test::assert_ok!(session.await.unwrap());
        assert!(harness.registry.is_empty());
        assert_eq!(harness.metrics.active_connections(), 0);
        drop(reader);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let harness = harness();
        let client = connect(&harness);
        tokio::task::yield_now().await;

        harness.shutdown.send_replace(true);
        tokio_test::assert_ok!(client.session.await.unwrap());
        assert!(harness.registry.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_ends_session() {
        let harness = harness();
        let (client, server) = tokio::io::duplex(4096);
        let service = harness.service.clone();
        let shutdown = harness.shutdown.subscribe();
        let session = tokio::spawn(async move {
            service
                .serve_connection(BrokenPipeStream { inner: server }, shutdown)
                .await
        });

        let mut writer = FrameWriter::new(client);
        writer
            .write_frame(&ClientMessage::subscribe(Currency::Eur, Currency::Gbp))
            .await
            .unwrap();
        writer
            .write_frame(&ClientMessage::get_rate(1, Currency::Eur, Currency::Gbp))
            .await
            .unwrap();

        let result = session.await.unwrap();
        assert!(matches!(result, Err(RatewireError::SendFailed(_))));
        assert!(harness.registry.is_empty());
        assert!(harness.metrics.snapshot().send_failures >= 1);
        assert_eq!(harness.metrics.active_connections(), 0);
        drop(writer);
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_session() {
        let harness = harness();
        let (client, server) = tokio::io::duplex(4096);
        let service = harness.service.clone();
        let shutdown = harness.shutdown.subscribe();
        let session = tokio::spawn(async move { service.serve_connection(server, shutdown).await });

        let (read_half, mut write_half) = tokio::io::split(client);
        // The server stops reading once the limit is hit, so the tail of
        // the write may never be consumed.
        let flood = tokio::spawn(async move {
            let _ = write_half.write_all(&vec![b'x'; MAX_FRAME_LEN + 10]).await;
        });

        let result = session.await.unwrap();
        assert!(matches!(result, Err(RatewireError::Protocol(_))));
        assert!(harness.registry.is_empty());
        assert_eq!(harness.metrics.active_connections(), 0);

        flood.await.unwrap();
        drop(read_half);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_writer_aborted_after_grace() {
        let grace = Duration::from_millis(200);
        let harness = harness_with(16, grace);
        // Smaller than one reply frame, so the writer blocks mid-frame.
        let mut client = connect_with(&harness, 32);

        for request_id in 1..=3 {
            client
                .send(ClientMessage::get_rate(request_id, Currency::Usd, Currency::Gbp))
                .await;
        }
        // Paused time only advances once every task is blocked.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(harness.registry.len(), 1);

        let started = tokio::time::Instant::now();
        harness.shutdown.send_replace(true);

        let TestClient {
            reader,
            writer,
            session,
        } = client;
        tokio_test::assert_ok!(session.await.unwrap());
        assert!(started.elapsed() >= grace);
        assert!(harness.registry.is_empty());
        assert_eq!(harness.metrics.active_connections(), 0);
        drop((reader, writer));
    }
}
