use crate::amqp::{configuration::SessionConfig, ConnectionFactory};
use crate::consumers::Delivery;
use anyhow::Context;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// `Transport` is the narrow set of broker operations a [`Session`](crate::Session) relies on.
///
/// [`AmqpTransport`] implements it on top of a `lapin` connection/channel pair.
/// Everything above this trait (publish path, consume loop, ack/nack policy) is agnostic of
/// the wire protocol.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Declare a queue, creating it if it does not exist yet.
    async fn declare_queue(
        &self,
        queue_name: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error>;

    /// Limit the number of unacknowledged deliveries the broker pushes to this session.
    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), anyhow::Error>;

    /// Submit a message to an exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<PublishOutcome, anyhow::Error>;

    /// Register a consumer on a queue.
    async fn subscribe(
        &self,
        queue_name: &str,
        auto_ack: bool,
    ) -> Result<Subscription, anyhow::Error>;

    /// Ask the broker to stop pushing deliveries for the given consumer.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error>;

    /// Release the channel, then the connection.
    ///
    /// Best-effort: failures are logged and never returned. Safe to call more than once.
    async fn close(&self);
}

/// What the broker told us about a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Publisher confirms are off: the message has been handed over to the broker.
    Sent,
    /// The broker confirmed the message.
    Confirmed,
    /// The broker refused the message.
    Rejected,
}

/// An active consumer on a queue.
pub struct Subscription {
    /// The tag identifying the consumer on the channel.
    pub consumer_tag: String,
    /// Normalized deliveries, in arrival order.
    ///
    /// The stream yields an error (or ends) when the subscription is terminated by the broker
    /// or the connection is lost.
    pub deliveries: BoxStream<'static, Result<Delivery, anyhow::Error>>,
}

/// The handle used to settle a delivery with the broker.
///
/// Each delivery carries exactly one acknowledger and the consume loop uses it at most once.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge this single delivery (not cumulative).
    async fn acknowledge(&self) -> Result<(), anyhow::Error>;

    /// Negatively acknowledge this single delivery, asking the broker to requeue it.
    async fn reject_and_requeue(&self) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Acknowledger for Acker {
    async fn acknowledge(&self) -> Result<(), anyhow::Error> {
        self.ack(BasicAckOptions { multiple: false })
            .await
            .map(drop)
            .map_err(Into::into)
    }

    async fn reject_and_requeue(&self) -> Result<(), anyhow::Error> {
        self.nack(BasicNackOptions {
            multiple: false,
            requeue: true,
        })
        .await
        .map(drop)
        .map_err(Into::into)
    }
}

/// A [`Transport`] owning one `lapin` connection and one channel on top of it.
pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
}

impl AmqpTransport {
    /// Connect to the broker and open a channel.
    ///
    /// If the channel cannot be opened the connection is closed before returning the error.
    pub async fn open(config: &SessionConfig) -> Result<Self, crate::SessionError> {
        let factory = ConnectionFactory::new_from_config(config)
            .map_err(|source| crate::SessionError::Connect {
                address: config.redacted_address(),
                source,
            })?;
        let connection =
            factory
                .new_connection()
                .await
                .map_err(|source| crate::SessionError::Connect {
                    address: factory.redacted_address().to_owned(),
                    source,
                })?;

        let channel = channel_or_close(&connection, config.publisher_confirms).await?;

        Ok(Self {
            connection,
            channel,
        })
    }
}

/// The connection-level steps of opening a session.
#[async_trait::async_trait]
pub(crate) trait ChannelSource: Send + Sync {
    type Channel: Send;

    async fn open_channel(&self, publisher_confirms: bool) -> Result<Self::Channel, anyhow::Error>;

    /// Close the connection, if it is still open. Failures are logged.
    async fn close(&self);
}

#[async_trait::async_trait]
impl ChannelSource for Connection {
    type Channel = Channel;

    async fn open_channel(&self, publisher_confirms: bool) -> Result<Channel, anyhow::Error> {
        let channel = self.create_channel().await?;
        if publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
                .context("Failed to enable publisher confirms on the channel")?;
        }
        Ok(channel)
    }

    async fn close(&self) {
        if self.status().connected() {
            if let Err(e) = Connection::close(self, 200, "Bye").await {
                warn!("Failed to close the RabbitMQ connection: {}", e);
            }
        }
    }
}

/// Open a channel on `connection`. If that fails the connection is closed before returning the
/// error: nothing else would release it.
pub(crate) async fn channel_or_close<C>(
    connection: &C,
    publisher_confirms: bool,
) -> Result<C::Channel, crate::SessionError>
where
    C: ChannelSource + ?Sized,
{
    match connection.open_channel(publisher_confirms).await {
        Ok(channel) => Ok(channel),
        Err(source) => {
            connection.close().await;
            Err(crate::SessionError::OpenChannel(source))
        }
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    async fn declare_queue(
        &self,
        queue_name: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        let queue = self
            .channel
            .queue_declare(queue_name, options, FieldTable::default())
            .await?;
        debug!(
            queue_name,
            message_count = queue.message_count(),
            consumer_count = queue.consumer_count(),
            "queue declared"
        );
        Ok(())
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), anyhow::Error> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(Into::into)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<PublishOutcome, anyhow::Error> {
        // Neither mandatory nor immediate: unroutable messages are silently dropped by the broker.
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        Ok(match confirm {
            Confirmation::Ack(_) => PublishOutcome::Confirmed,
            Confirmation::Nack(_) => PublishOutcome::Rejected,
            Confirmation::NotRequested => PublishOutcome::Sent,
        })
    }

    async fn subscribe(
        &self,
        queue_name: &str,
        auto_ack: bool,
    ) -> Result<Subscription, anyhow::Error> {
        let consumer = self
            .channel
            .basic_consume(
                queue_name,
                &Uuid::new_v4().to_string(),
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let consumer_tag = consumer.tag().as_str().to_owned();
        let tag = consumer_tag.clone();
        let deliveries = consumer
            .map(move |event| {
                event
                    .map(|delivery| Delivery::from_lapin(&tag, delivery))
                    .map_err(anyhow::Error::from)
            })
            .boxed();

        Ok(Subscription {
            consumer_tag,
            deliveries,
        })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(Into::into)
    }

    async fn close(&self) {
        if self.channel.status().connected() {
            if let Err(e) = self.channel.close(200, "Bye").await {
                warn!("Failed to close the RabbitMQ channel: {}", e);
            }
        }
        ChannelSource::close(&self.connection).await;
    }
}
