use crate::{
    amqp::{
        durable_queue,
        transport::{Subscription, Transport},
    },
    consumers::{ConsumeError, Delivery, Handler},
};
use futures_util::{Future, FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

/// Knobs for a consume loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Let the broker consider every message acknowledged as soon as it is delivered.
    ///
    /// Messages whose processing fails are lost in this mode: they cannot be requeued.
    pub auto_ack: bool,
    /// The maximum number of messages to process before exiting the loop.
    /// The loop processes messages indefinitely if set to `None`.
    pub exit_after: Option<usize>,
    /// Maximum number of unacknowledged messages the broker pushes ahead of processing.
    /// The broker default (unlimited) applies if set to `None`.
    pub prefetch_count: Option<u16>,
}

/// Why a consume loop stopped without errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `exit_after` messages have been processed.
    CountReached,
    /// The shutdown future resolved.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Messages handed to the handler and settled with the broker.
    pub processed: usize,
    pub stop_reason: StopReason,
}

/// Declare `queue_name`, subscribe to it and process incoming messages one at a time, in
/// arrival order, until `options.exit_after` messages have been processed or `shutdown`
/// resolves.
///
/// `shutdown` interrupts the setup steps (declare, qos, subscribe) right away. Once messages
/// are flowing it is only checked between messages: a message being processed when it resolves
/// is still handled and settled with the broker before returning.
///
/// When `exit_after` is set the consumer is cancelled before the last message is settled, so
/// that its settlement cannot make the broker push further messages to us.
#[tracing::instrument(skip_all, name = "consume", fields(queue_name = %queue_name))]
pub(crate) async fn run_until_shutdown<T, H>(
    transport: &T,
    queue_name: &str,
    options: &ConsumeOptions,
    handler: &H,
    shutdown: impl Future<Output = ()>,
) -> Result<ConsumeSummary, ConsumeError>
where
    T: Transport + ?Sized,
    H: Handler + ?Sized,
{
    let shutdown = shutdown.fuse();
    tokio::pin!(shutdown);

    let cancelled_during_setup = Ok(ConsumeSummary {
        processed: 0,
        stop_reason: StopReason::Cancelled,
    });

    let Some(declared) =
        unless_shutdown(&mut shutdown, transport.declare_queue(queue_name, durable_queue())).await
    else {
        info!("consumer received shutdown event while declaring the queue");
        return cancelled_during_setup;
    };
    declared.map_err(|source| ConsumeError::Declare {
        queue_name: queue_name.to_owned(),
        source,
    })?;

    if let Some(prefetch_count) = options.prefetch_count {
        let Some(applied) =
            unless_shutdown(&mut shutdown, transport.set_prefetch(prefetch_count)).await
        else {
            info!("consumer received shutdown event while setting the prefetch count");
            return cancelled_during_setup;
        };
        applied.map_err(|source| ConsumeError::Qos {
            prefetch_count,
            source,
        })?;
    }

    let Some(subscribed) =
        unless_shutdown(&mut shutdown, transport.subscribe(queue_name, options.auto_ack)).await
    else {
        info!("consumer received shutdown event while subscribing");
        return cancelled_during_setup;
    };
    let Subscription {
        consumer_tag,
        mut deliveries,
    } = subscribed.map_err(|source| ConsumeError::Subscribe {
        queue_name: queue_name.to_owned(),
        source,
    })?;
    info!(%consumer_tag, auto_ack = options.auto_ack, "consumer registered");

    let mut processed = 0;
    let mut consumer_cancelled = false;
    let stop_reason = 'event_loop: loop {
        // have we consumed all the messages we want?
        if options.exit_after == Some(processed) {
            break 'event_loop StopReason::CountReached;
        }

        tokio::select! {
            // prefer handling shutdowns over pulling more messages
            biased;

            _ = &mut shutdown => {
                info!("consumer received shutdown event");
                break 'event_loop StopReason::Cancelled;
            }

            event = deliveries.next() => {
                match event {
                    None => return Err(ConsumeError::SubscriptionClosed),
                    Some(Err(e)) => {
                        error!("Consumer error: {:#}", e);
                        return Err(ConsumeError::Subscription(e));
                    }
                    Some(Ok(delivery)) => {
                        let outcome = handler
                            .handle(&delivery)
                            .await
                            .map_err(|e| e.to_string());
                        processed += 1;
                        if options.exit_after == Some(processed) {
                            cancel_consumer(transport, &consumer_tag).await;
                            consumer_cancelled = true;
                        }
                        settle(delivery, outcome, options.auto_ack).await?;
                    }
                }
            }
        }
    };

    // Messages pushed by the broker but never handed to the handler are not settled: they go
    // back to the queue once the channel is closed.
    if !consumer_cancelled {
        cancel_consumer(transport, &consumer_tag).await;
    }

    Ok(ConsumeSummary {
        processed,
        stop_reason,
    })
}

/// Drive `step` to completion, unless `shutdown` resolves first.
async fn unless_shutdown<S, F>(shutdown: &mut S, step: F) -> Option<F::Output>
where
    S: Future<Output = ()> + Unpin,
    F: Future,
{
    tokio::select! {
        biased;

        _ = shutdown => None,
        output = step => Some(output),
    }
}

async fn cancel_consumer<T: Transport + ?Sized>(transport: &T, consumer_tag: &str) {
    if let Err(e) = transport.cancel(consumer_tag).await {
        warn!("Failed to cancel consumer {}: {:#}", consumer_tag, e);
    }
}

/// Ack/nack a processed message according to the outcome of its handler.
#[tracing::instrument(
    name = "settle_message",
    skip_all,
    fields(delivery_tag = delivery.delivery_tag()),
    level = tracing::Level::DEBUG
)]
async fn settle(
    delivery: Delivery,
    outcome: Result<(), String>,
    auto_ack: bool,
) -> Result<(), ConsumeError> {
    let delivery_tag = delivery.delivery_tag();
    let Delivery { acker, .. } = delivery;

    match outcome {
        Ok(()) if auto_ack => debug!("message processed"),
        Ok(()) => acker
            .acknowledge()
            .await
            .map_err(|source| ConsumeError::Ack {
                delivery_tag,
                source,
            })?,
        Err(e) if auto_ack => {
            warn!(
                "Failed to process message, it was auto-acked and will not be redelivered: {}",
                e
            );
        }
        Err(e) => {
            warn!("Failed to process message, requeuing it: {}", e);
            acker
                .reject_and_requeue()
                .await
                .map_err(|source| ConsumeError::Nack {
                    delivery_tag,
                    source,
                })?;
        }
    }
    Ok(())
}
