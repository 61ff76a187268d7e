use crate::{
    amqp::{
        configuration::SessionConfig,
        transport::{AmqpTransport, Transport},
    },
    consumers::{self, ConsumeError, ConsumeOptions, ConsumeSummary, Handler},
    publishers::{self, PublisherError, DEFAULT_PUBLISH_TIMEOUT},
};
use futures_util::Future;
use std::time::Duration;

/// Error returned when a [`Session`] cannot be established.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Failed to connect to RabbitMQ at {address}")]
    Connect {
        address: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to open a channel")]
    OpenChannel(#[source] anyhow::Error),
}

/// A connection and a channel to a RabbitMq broker.
///
/// Both are opened by [`Session::open`] and released by [`Session::close`].
///
/// # Concurrency
///
/// A session is meant to drive one operation at a time: either a single publish or a single
/// consume loop. Nothing stops you from sharing it, but running a publish and a consume loop
/// concurrently on the same session is not supported.
pub struct Session<T = AmqpTransport> {
    transport: T,
    publish_timeout: Duration,
}

impl Session<AmqpTransport> {
    /// Connect to the broker described by `config` and open a channel.
    #[tracing::instrument(skip_all, name = "session_open", fields(address = %config.redacted_address()))]
    pub async fn open(config: &SessionConfig) -> Result<Self, SessionError> {
        let transport = AmqpTransport::open(config).await?;
        Ok(Self::with_transport(transport))
    }
}

impl<T: Transport> Session<T> {
    /// Build a session on top of an already established transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Timeout applied when attempting to publish a message.
    /// Defaults to 5 seconds if left unspecified.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Publish a `text/plain` message to `exchange` with `routing_key`.
    ///
    /// The exchange is expected to exist already.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &str,
    ) -> Result<(), PublisherError> {
        publishers::publish(
            &self.transport,
            self.publish_timeout,
            exchange,
            routing_key,
            body,
        )
        .await
    }

    /// Publish a `text/plain` message straight into `queue_name`, declaring the queue as durable
    /// if it does not exist yet.
    pub async fn publish_to_queue(&self, queue_name: &str, body: &str) -> Result<(), PublisherError> {
        publishers::publish_to_queue(&self.transport, self.publish_timeout, queue_name, body).await
    }

    /// Consume messages from `queue_name` (declared as durable if it does not exist yet),
    /// passing them one at a time to `handler`.
    ///
    /// It returns when `options.exit_after` messages have been processed, when `shutdown`
    /// resolves or when the subscription is terminated by the broker.
    pub async fn consume<H>(
        &self,
        queue_name: &str,
        options: &ConsumeOptions,
        handler: &H,
        shutdown: impl Future<Output = ()>,
    ) -> Result<ConsumeSummary, ConsumeError>
    where
        H: Handler + ?Sized,
    {
        consumers::run_until_shutdown(&self.transport, queue_name, options, handler, shutdown).await
    }

    /// Release the channel, then the connection.
    ///
    /// Failures are logged, not returned. Calling `close` more than once is harmless.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}
