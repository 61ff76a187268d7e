use lapin::BasicProperties;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// A message ready to be handed over to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    // The body of the message - as a sequence of bytes.
    pub payload: Vec<u8>,
    // The name of the exchange we are publishing the message to.
    // Empty for the default exchange, which routes on queue names.
    pub exchange_name: String,
    // The routing key used by the exchange to pick the destination queue(s).
    pub routing_key: String,
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    /// A `text/plain` message.
    pub fn text(exchange_name: &str, routing_key: &str, body: &str) -> Self {
        Self {
            payload: body.as_bytes().to_vec(),
            exchange_name: exchange_name.to_owned(),
            routing_key: routing_key.to_owned(),
            properties: BasicProperties::default().with_content_type("text/plain".into()),
        }
    }

    /// Stamp the message with the current time, unless a timestamp is already set.
    pub fn with_current_timestamp(mut self) -> Self {
        let current_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|ct| ct.as_secs());

        self.properties = match current_timestamp {
            Some(ct) => {
                let ts = *self.properties.timestamp();
                self.properties.with_timestamp(ts.unwrap_or(ct))
            }
            None => {
                warn!("System time is before 1970");
                self.properties
            }
        };
        self
    }
}
