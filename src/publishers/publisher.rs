use crate::amqp::{
    durable_queue,
    transport::{PublishOutcome, Transport},
};
use crate::publishers::MessageEnvelope;
use std::time::Duration;

/// How long we wait for a message to be handed over to the broker (and confirmed, if publisher
/// confirms are enabled) before giving up.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Error returned when trying to publish a message.
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Failed to declare queue '{queue_name}'")]
    Declare {
        queue_name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("The RabbitMq broker nacked the publishing of the message")]
    NegativeAck,
}

/// Publish a `text/plain` message on an exchange, stamped with the current time.
///
/// No topology is declared: the exchange must already exist.
#[tracing::instrument(level = "debug", skip(transport, body))]
pub(crate) async fn publish<T>(
    transport: &T,
    timeout: Duration,
    exchange: &str,
    routing_key: &str,
    body: &str,
) -> Result<(), PublisherError>
where
    T: Transport + ?Sized,
{
    let MessageEnvelope {
        payload,
        exchange_name,
        routing_key,
        properties,
    } = MessageEnvelope::text(exchange, routing_key, body).with_current_timestamp();

    let publish_future = transport.publish(&exchange_name, &routing_key, &payload, properties);
    let outcome = match tokio::time::timeout(timeout, publish_future).await {
        Ok(result) => result.map_err(PublisherError::GenericError)?,
        Err(_) => return Err(PublisherError::TimeoutError),
    };

    match outcome {
        PublishOutcome::Sent | PublishOutcome::Confirmed => Ok(()),
        PublishOutcome::Rejected => Err(PublisherError::NegativeAck),
    }
}

/// Make sure `queue_name` exists, then publish the message on the default exchange using the
/// queue name as routing key: the broker delivers it straight into the queue.
#[tracing::instrument(level = "debug", skip(transport, body))]
pub(crate) async fn publish_to_queue<T>(
    transport: &T,
    timeout: Duration,
    queue_name: &str,
    body: &str,
) -> Result<(), PublisherError>
where
    T: Transport + ?Sized,
{
    transport
        .declare_queue(queue_name, durable_queue())
        .await
        .map_err(|source| PublisherError::Declare {
            queue_name: queue_name.to_owned(),
            source,
        })?;

    publish(transport, timeout, "", queue_name, body).await
}
