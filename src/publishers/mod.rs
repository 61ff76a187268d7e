//! Facilities to publish messages to a RabbitMq exchange or queue. Check out
//! [`Session::publish`](crate::Session::publish) as a starting point.
mod message_envelope;
mod publisher;

pub use message_envelope::MessageEnvelope;
pub use publisher::{PublisherError, DEFAULT_PUBLISH_TIMEOUT};

pub(crate) use publisher::{publish, publish_to_queue};
