use futures::StreamExt;
use lapin::{options::*, types::FieldTable, Connection};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::{binding_keys, RabbitMQConfig};
use super::publisher::{declare_exchange, open_connection};
use crate::models::Envelope;
use crate::transport::{CloseHandle, Result, Subscriber};

/// Depth of the hand-off between the consumer task and `recv`
const DELIVERY_BUFFER: usize = 10_000;

/// Consumes envelopes from a queue bound to every known type tag
pub struct RabbitMQSubscriber {
    deliveries: mpsc::Receiver<Envelope>,
    runtime: Handle,
    shutdown: CancellationToken,
    _connection: Connection,
}

impl RabbitMQSubscriber {
    pub async fn connect(config: &RabbitMQConfig) -> Result<Self> {
        let connection = open_connection(config).await?;
        let channel = connection.create_channel().await?;
        declare_exchange(&channel, config).await?;

        let server_named = config.queue.is_empty();
        let queue = channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    exclusive: server_named,
                    auto_delete: server_named,
                    durable: !server_named,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let queue_name = queue.name().as_str().to_string();

        for key in binding_keys() {
            channel
                .queue_bind(
                    &queue_name,
                    &config.exchange,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer = channel
            .basic_consume(
                &queue_name,
                "ctp-tick-recorder",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let shutdown = CancellationToken::new();
        tokio::spawn(forward_deliveries(consumer, tx, shutdown.clone()));

        tracing::info!(queue = %queue_name, exchange = %config.exchange, "📡 RabbitMQ subscriber started");

        Ok(Self {
            deliveries: rx,
            runtime: Handle::current(),
            shutdown,
            _connection: connection,
        })
    }
}

impl Subscriber for RabbitMQSubscriber {
    fn recv(&mut self) -> Result<Option<Envelope>> {
        let shutdown = self.shutdown.clone();
        let deliveries = &mut self.deliveries;

        Ok(self.runtime.block_on(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                envelope = deliveries.recv() => envelope,
            }
        }))
    }

    fn close_handle(&self) -> CloseHandle {
        let shutdown = self.shutdown.clone();
        CloseHandle::new(move || shutdown.cancel())
    }
}

impl Drop for RabbitMQSubscriber {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn forward_deliveries(
    mut consumer: lapin::Consumer,
    deliveries: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = consumer.next() => delivery,
        };

        match delivery {
            Some(Ok(delivery)) => {
                let envelope = Envelope::from_frames(
                    delivery.routing_key.as_str().to_string(),
                    delivery.data.into(),
                );
                if deliveries.send(envelope).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "❌ RabbitMQ consumer error");
                break;
            }
            None => {
                tracing::warn!("⚠️  RabbitMQ consumer stream ended");
                break;
            }
        }
    }
}
