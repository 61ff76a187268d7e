//! Facilities to consume messages from a RabbitMq queue. Check out
//! [`Session::consume`](crate::Session::consume) as a starting point.
pub use consumer::{ConsumeOptions, ConsumeSummary, StopReason};
pub use delivery::{Delivery, DeliveryHeader, DeliveryMethod, DeliveryMode};
pub use error::ConsumeError;
pub use handler::Handler;

pub(crate) use consumer::run_until_shutdown;

mod consumer;
mod delivery;
mod error;
mod handler;
