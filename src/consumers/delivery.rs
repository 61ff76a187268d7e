use crate::amqp::transport::Acknowledger;
use amq_protocol_types::{AMQPValue, DeliveryTag, ShortString};
use chrono::{DateTime, Utc};
use lapin::BasicProperties;
use std::collections::BTreeMap;
use std::fmt;

/// Delivery mode: Non-persistent (1) or persistent (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
    Persistent,
    /// The property was missing or carried a value outside of the protocol range.
    Unknown(u8),
}

impl From<Option<u8>> for DeliveryMode {
    fn from(value: Option<u8>) -> Self {
        match value {
            Some(1) => Self::NonPersistent,
            Some(2) => Self::Persistent,
            other => Self::Unknown(other.unwrap_or_default()),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPersistent => write!(f, "1 (Non-persistent)"),
            Self::Persistent => write!(f, "2 (Persistent)"),
            Self::Unknown(mode) => write!(f, "{mode} (Unknown)"),
        }
    }
}

/// Routing information carried by the `basic.deliver` method frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMethod {
    /// The tag of the consumer the message was delivered to.
    pub consumer_tag: String,
    /// The sequence number assigned by the broker, scoped to the channel.
    pub delivery_tag: DeliveryTag,
    /// Whether this message was redelivered.
    pub redelivered: bool,
    /// The exchange of the message. Empty if the default exchange was used.
    pub exchange: String,
    /// The routing key of the message. May be empty.
    pub routing_key: String,
}

/// The content header frame of a message.
///
/// Properties that were not set by the publisher are `None` (or empty, for headers).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryHeader {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: BTreeMap<String, AMQPValue>,
    pub delivery_mode: DeliveryMode,
    /// Zero when unset.
    pub priority: u8,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// The `type` property.
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

/// A message received from a queue.
///
/// `Delivery` is the input of [`Handler`](crate::consumers::Handler)s: it is built by the consume
/// loop for every message pushed by the broker, handed over to the handler by reference and
/// dropped once the message has been acked/nacked.
pub struct Delivery {
    pub method: DeliveryMethod,
    pub header: DeliveryHeader,
    /// The payload of the message in binary format.
    pub body: Vec<u8>,
    /// The payload decoded as UTF-8. Invalid sequences are replaced, `body` is always
    /// the source of truth.
    pub text: String,
    /// The acker used to ack/nack the message
    // Hidden from the public interface, to stop a message being acked / rejected inside a handler.
    // A message must not be acked / rejected multiple times:
    // https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.ack.delivery-tag
    pub(crate) acker: Box<dyn Acknowledger>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("method", &self.method)
            .field("header", &self.header)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl Delivery {
    /// Normalize a delivery pushed by `lapin` to one of our consumers.
    pub(crate) fn from_lapin(consumer_tag: &str, delivery: lapin::message::Delivery) -> Self {
        let lapin::message::Delivery {
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties,
            data,
            acker,
            ..
        } = delivery;

        let method = DeliveryMethod {
            consumer_tag: consumer_tag.to_owned(),
            delivery_tag,
            redelivered,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        Self::new(method, &properties, data, Box::new(acker))
    }

    pub(crate) fn new(
        method: DeliveryMethod,
        properties: &BasicProperties,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        let text = String::from_utf8_lossy(&body).into_owned();
        Self {
            method,
            header: DeliveryHeader::from(properties),
            body,
            text,
            acker,
        }
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.method.delivery_tag
    }
}

fn short_string(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|s| s.as_str().to_owned())
}

impl From<&BasicProperties> for DeliveryHeader {
    fn from(properties: &BasicProperties) -> Self {
        let headers = properties
            .headers()
            .as_ref()
            .map(|table| {
                table
                    .inner()
                    .iter()
                    .map(|(key, value)| (key.as_str().to_owned(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            content_type: short_string(properties.content_type()),
            content_encoding: short_string(properties.content_encoding()),
            headers,
            delivery_mode: DeliveryMode::from(*properties.delivery_mode()),
            priority: properties.priority().unwrap_or_default(),
            correlation_id: short_string(properties.correlation_id()),
            reply_to: short_string(properties.reply_to()),
            expiration: short_string(properties.expiration()),
            message_id: short_string(properties.message_id()),
            timestamp: properties
                .timestamp()
                .and_then(|seconds| i64::try_from(seconds).ok())
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            kind: short_string(properties.kind()),
            user_id: short_string(properties.user_id()),
            app_id: short_string(properties.app_id()),
        }
    }
}
