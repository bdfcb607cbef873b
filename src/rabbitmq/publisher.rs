use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    ExchangeKind,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::RabbitMQConfig;
use crate::config::TransportConfig;
use crate::models::Envelope;
use crate::transport::outbound::OutboundQueue;
use crate::transport::{Publisher, Result, TransportError};

/// Totals reported when the pump stops
#[derive(Debug, Default)]
struct PumpTotals {
    published: u64,
    confirmed: u64,
    failed: u64,
}

/// Publishes envelopes to a topic exchange, routing key = type tag
///
/// `send` only enqueues onto the bounded outbound queue; a pump task owns the
/// AMQP channel and performs the actual publish.
pub struct RabbitMQPublisher {
    outbound: OutboundQueue,
    shutdown: CancellationToken,
    _connection: Connection,
}

impl RabbitMQPublisher {
    /// Connect, declare the exchange and start the pump task
    pub async fn connect(config: &RabbitMQConfig, transport: &TransportConfig) -> Result<Self> {
        tracing::info!(uri = %config.uri, exchange = %config.exchange, "Connecting to RabbitMQ");

        let connection = open_connection(config).await?;
        let channel = connection.create_channel().await?;
        declare_exchange(&channel, config).await?;

        if config.publisher_confirms {
            channel.confirm_select(ConfirmSelectOptions::default()).await?;
            tracing::info!("Publisher confirms enabled");
        }

        let (outbound, outbound_rx) = OutboundQueue::new(transport.send_hwm, transport.send_timeout());
        let shutdown = CancellationToken::new();

        tokio::spawn(pump(
            channel,
            config.exchange.clone(),
            config.publisher_confirms,
            outbound_rx,
            shutdown.clone(),
        ));

        tracing::info!("✅ Connected to RabbitMQ");

        Ok(Self {
            outbound,
            shutdown,
            _connection: connection,
        })
    }
}

impl Publisher for RabbitMQPublisher {
    fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound.send(envelope)
    }
}

impl Drop for RabbitMQPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub(crate) async fn open_connection(config: &RabbitMQConfig) -> Result<Connection> {
    tokio::time::timeout(
        config.connection_timeout(),
        Connection::connect(&config.uri, ConnectionProperties::default()),
    )
    .await
    .map_err(|_| {
        TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("RabbitMQ connect timed out after {}s", config.connection_timeout_secs),
        ))
    })?
    .map_err(TransportError::from)
}

pub(crate) async fn declare_exchange(channel: &Channel, config: &RabbitMQConfig) -> Result<()> {
    channel
        .exchange_declare(
            &config.exchange,
            parse_exchange_type(&config.exchange_type),
            ExchangeDeclareOptions {
                durable: config.durable,
                auto_delete: false,
                internal: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Parse exchange type from string
fn parse_exchange_type(exchange_type: &str) -> ExchangeKind {
    match exchange_type.to_lowercase().as_str() {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        _ => ExchangeKind::Topic,
    }
}

async fn pump(
    channel: Channel,
    exchange: String,
    confirms: bool,
    mut outbound: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
) {
    let mut totals = PumpTotals::default();
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            envelope = outbound.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let (type_tag, payload) = envelope.into_parts();
        let published = channel
            .basic_publish(
                &exchange,
                &type_tag,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await;

        let confirm = match published {
            Ok(confirm) => confirm,
            Err(e) => {
                totals.failed += 1;
                tracing::error!(routing_key = %type_tag, error = %e, "❌ Publish failed");
                continue;
            }
        };
        totals.published += 1;

        if confirms {
            match confirm.await {
                Ok(_) => {
                    totals.confirmed += 1;
                    tracing::trace!(routing_key = %type_tag, "Message confirmed");
                }
                Err(e) => {
                    totals.failed += 1;
                    tracing::error!(routing_key = %type_tag, error = %e, "❌ Message confirmation failed");
                }
            }
        }
    }

    let _ = channel.close(200, "Normal shutdown").await;
    tracing::info!(
        published = totals.published,
        confirmed = totals.confirmed,
        failed = totals.failed,
        "RabbitMQ publisher stopped"
    );
}
