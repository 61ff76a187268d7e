//! The `Handler` trait is heavily inspired by `tide`'s approach to endpoint handlers.
use crate::consumers::Delivery;

/// Implementers of the `Handler` trait process the messages retrieved by
/// [`Session::consume`](crate::Session::consume).
///
/// # Scope
///
/// `handle` does not get access to the underlying RabbitMq channel.
/// The consume loop takes care of acking/nacking the message with the broker according to the
/// outcome of processing:
///
/// - `Ok(())` acks the message;
/// - `Err(_)` nacks the message, asking the broker to requeue it.
///
/// Neither happens when consuming in auto-ack mode: the broker considers the message settled as
/// soon as it is pushed to the consumer, therefore **a message whose processing fails is lost**.
///
/// A failure never stops the consume loop.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    type Error: std::fmt::Display + Send;

    async fn handle(&self, delivery: &Delivery) -> Result<(), Self::Error>;
}

/// Implement the [`Handler`] trait for all boxed handlers.
#[async_trait::async_trait]
impl<H> Handler for Box<H>
where
    H: Handler + ?Sized,
{
    type Error = H::Error;

    async fn handle(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        H::handle(self, delivery).await
    }
}
