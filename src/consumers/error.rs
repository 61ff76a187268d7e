use amq_protocol_types::DeliveryTag;

/// Error returned when [`Session::consume`](crate::Session::consume) stops abnormally.
///
/// Failures of the message handler are not errors of the consume loop: they are settled with
/// the broker (nack + requeue) and the loop moves on to the next message.
#[derive(thiserror::Error, Debug)]
pub enum ConsumeError {
    #[error("Failed to declare queue '{queue_name}'")]
    Declare {
        queue_name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to set the prefetch count to {prefetch_count}")]
    Qos {
        prefetch_count: u16,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to register a consumer on queue '{queue_name}'")]
    Subscribe {
        queue_name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("The subscription was terminated while waiting for messages")]
    Subscription(#[source] anyhow::Error),
    #[error("The broker closed the subscription")]
    SubscriptionClosed,
    #[error("Failed to ack message with delivery tag {delivery_tag}")]
    Ack {
        delivery_tag: DeliveryTag,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to nack message with delivery tag {delivery_tag}")]
    Nack {
        delivery_tag: DeliveryTag,
        #[source]
        source: anyhow::Error,
    },
    #[error("The consume loop panicked or was aborted")]
    Aborted(#[source] tokio::task::JoinError),
}
