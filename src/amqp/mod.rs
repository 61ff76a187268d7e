//! Helpers for connecting to a rabbitmq broker

pub mod configuration;
mod factory;
pub mod transport;

pub use factory::ConnectionFactory;

use lapin::options::QueueDeclareOptions;

/// Options used every time we make sure a queue exists: durable, shared between connections and
/// kept around when its last consumer goes away.
///
/// Declaring a queue that already exists with the same options is a no-op for the broker.
pub fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        passive: false,
        durable: true,
        exclusive: false,
        auto_delete: false,
        nowait: false,
    }
}
