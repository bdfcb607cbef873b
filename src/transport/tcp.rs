use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::frame::EnvelopeCodec;
use super::outbound::OutboundQueue;
use super::{CloseHandle, Publisher, Result, Subscriber, TransportError};
use crate::config::TransportConfig;
use crate::models::Envelope;

/// Fan-out publisher over plain TCP
///
/// Envelopes go through a bounded outbound queue (depth = HWM) to a fan-out
/// task, then to one writer task per connected subscriber. A subscriber that
/// falls more than HWM envelopes behind loses the oldest ones. Dropping the
/// publisher discards anything still queued.
pub struct TcpPublisher {
    outbound: OutboundQueue,
    fanout: broadcast::Sender<Envelope>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TcpPublisher {
    /// Bind the publish endpoint. Failure here is fatal for the relay.
    pub async fn bind(config: &TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.publish_endpoint)
            .await
            .map_err(|source| TransportError::Bind {
                endpoint: config.publish_endpoint.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let hwm = config.send_hwm.max(1);
        let (outbound, outbound_rx) = OutboundQueue::new(hwm, config.send_timeout());
        let (fanout, _) = broadcast::channel(hwm);
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            fanout.clone(),
            EnvelopeCodec::new(config.max_frame_bytes),
            shutdown.clone(),
        ));
        tokio::spawn(fanout_loop(outbound_rx, fanout.clone(), shutdown.clone()));

        tracing::info!(
            endpoint = %local_addr,
            hwm,
            send_timeout_ms = config.send_timeout_ms,
            "📡 TCP publisher bound"
        );

        // Give early subscribers a chance to connect before the first send
        if config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
        }

        Ok(Self {
            outbound,
            fanout,
            local_addr,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.fanout.receiver_count()
    }
}

impl Publisher for TcpPublisher {
    fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound.send(envelope)
    }
}

impl Drop for TcpPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    fanout: broadcast::Sender<Envelope>,
    codec: EnvelopeCodec,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                tracing::info!(%peer, "✅ Subscriber connected");
                tokio::spawn(serve_subscriber(
                    stream,
                    peer,
                    fanout.subscribe(),
                    codec.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "⚠️  Accept failed");
            }
        }
    }
}

async fn fanout_loop(
    mut outbound: mpsc::Receiver<Envelope>,
    fanout: broadcast::Sender<Envelope>,
    shutdown: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            envelope = outbound.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        // No subscribers: the envelope is discarded, same as any pub/sub fabric
        if fanout.send(envelope).is_err() {
            tracing::trace!("No subscribers connected, envelope discarded");
        }
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut envelopes: broadcast::Receiver<Envelope>,
    codec: EnvelopeCodec,
    shutdown: CancellationToken,
) {
    let mut sink = FramedWrite::new(stream, codec);

    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = envelopes.recv() => match received {
                Ok(envelope) => envelope,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%peer, skipped, "⚠️  Subscriber lagging, envelopes dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = sink.send(envelope).await {
            tracing::warn!(%peer, error = %e, "Subscriber disconnected");
            return;
        }
    }

    tracing::debug!(%peer, "Subscriber writer stopped");
}

/// Subscriber over plain TCP with automatic reconnect
///
/// A background task keeps a connection to the publisher, decodes envelopes
/// and forwards them to `recv`. Connection loss is logged and retried with
/// exponential backoff; it never surfaces as an error to the caller.
pub struct TcpSubscriber {
    envelopes: mpsc::Receiver<Envelope>,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl TcpSubscriber {
    /// Must be called from within a tokio runtime
    pub fn connect(config: &TransportConfig) -> Result<Self> {
        let endpoint = config.subscribe_endpoint.clone();
        let valid = endpoint
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(TransportError::InvalidEndpoint(endpoint));
        }

        let (tx, rx) = mpsc::channel(config.send_hwm.max(1));
        let shutdown = CancellationToken::new();
        let backoff = Backoff::new(
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        );

        tokio::spawn(read_loop(
            endpoint.clone(),
            EnvelopeCodec::new(config.max_frame_bytes),
            tx,
            backoff,
            shutdown.clone(),
        ));

        tracing::info!(%endpoint, "📡 TCP subscriber started");

        Ok(Self {
            envelopes: rx,
            runtime: Handle::current(),
            shutdown,
        })
    }
}

impl Subscriber for TcpSubscriber {
    fn recv(&mut self) -> Result<Option<Envelope>> {
        let shutdown = self.shutdown.clone();
        let envelopes = &mut self.envelopes;

        Ok(self.runtime.block_on(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                envelope = envelopes.recv() => envelope,
            }
        }))
    }

    fn close_handle(&self) -> CloseHandle {
        let shutdown = self.shutdown.clone();
        CloseHandle::new(move || shutdown.cancel())
    }
}

impl Drop for TcpSubscriber {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_loop(
    endpoint: String,
    codec: EnvelopeCodec,
    envelopes: mpsc::Sender<Envelope>,
    mut backoff: Backoff,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return,
            connected = TcpStream::connect(&endpoint) => connected,
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::debug!(%endpoint, error = %e, delay_ms = delay.as_millis() as u64, "Connect failed, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        tracing::info!(%endpoint, "✅ Connected to publisher");
        backoff.reset();

        let mut frames = FramedRead::new(stream, codec.clone());
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return,
                frame = frames.next() => frame,
            };

            match frame {
                Some(Ok(envelope)) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        sent = envelopes.send(envelope) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(%endpoint, error = %e, "⚠️  Stream desynchronised, reconnecting");
                    break;
                }
                None => {
                    tracing::warn!(%endpoint, "⚠️  Publisher closed the connection, reconnecting");
                    break;
                }
            }
        }
    }
}

/// Exponential reconnect delay, doubling up to a ceiling
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use std::time::Instant;
    use tokio::runtime::Runtime;

    fn pair(runtime: &Runtime) -> (TcpPublisher, TcpSubscriber) {
        let config = TransportConfig {
            publish_endpoint: "127.0.0.1:0".to_string(),
            settle_ms: 0,
            reconnect_initial_ms: 10,
            ..Default::default()
        };
        let publisher = runtime.block_on(TcpPublisher::bind(&config)).unwrap();

        let subscriber_config = TransportConfig {
            subscribe_endpoint: publisher.local_addr().to_string(),
            ..config
        };
        let subscriber = runtime
            .block_on(async { TcpSubscriber::connect(&subscriber_config) })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while publisher.subscriber_count() == 0 {
            assert!(Instant::now() < deadline, "subscriber never connected");
            std::thread::sleep(Duration::from_millis(10));
        }

        (publisher, subscriber)
    }

    #[test]
    fn test_envelopes_arrive_in_order() {
        let runtime = Runtime::new().unwrap();
        let (publisher, mut subscriber) = pair(&runtime);

        for i in 0..20 {
            publisher
                .send(Envelope::new(MessageType::MarketData, format!("tick-{}", i)))
                .unwrap();
        }

        for i in 0..20 {
            let envelope = subscriber.recv().unwrap().unwrap();
            assert_eq!(envelope.type_tag(), "MARKET_DATA");
            assert_eq!(envelope.payload().as_ref(), format!("tick-{}", i).as_bytes());
        }
    }

    #[test]
    fn test_close_wakes_blocked_recv() {
        let runtime = Runtime::new().unwrap();
        let (_publisher, mut subscriber) = pair(&runtime);
        let close = subscriber.close_handle();

        let receiver = std::thread::spawn(move || subscriber.recv());
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        close.close();
        let received = receiver.join().unwrap().unwrap();

        assert!(received.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let runtime = Runtime::new().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = TransportConfig {
            publish_endpoint: taken.local_addr().unwrap().to_string(),
            settle_ms: 0,
            ..Default::default()
        };

        assert!(matches!(
            runtime.block_on(TcpPublisher::bind(&config)),
            Err(TransportError::Bind { .. })
        ));
    }

    #[test]
    fn test_invalid_subscribe_endpoint() {
        let runtime = Runtime::new().unwrap();
        let config = TransportConfig {
            subscribe_endpoint: "localhost".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            runtime.block_on(async { TcpSubscriber::connect(&config) }),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
