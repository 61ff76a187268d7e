//! `amqp-cli` publishes text messages to RabbitMq queues and exchanges and consumes
//! messages from queues, built on top of [`lapin`].
//!
//! [`Session`] is the best starting point: it owns a connection and a channel to the broker and
//! exposes the publish path ([`Session::publish`], [`Session::publish_to_queue`]) and the
//! consume loop ([`Session::consume`]).
//!
//! The command line interface and the rendering of consumed messages live in [`cli`] and
//! [`output`]. [`runner`] ties a consume loop to the process signals.

pub mod amqp;
pub mod cli;
pub mod consumers;
pub mod output;
pub mod publishers;
pub mod runner;
mod session;

pub use amqp::configuration::SessionConfig;
pub use session::{Session, SessionError};

#[cfg(test)]
pub(crate) mod test_support;
