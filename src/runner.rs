//! Drives a consume loop on behalf of the command line, until it completes or a signal arrives.
use crate::amqp::transport::Transport;
use crate::consumers::{ConsumeError, ConsumeOptions, ConsumeSummary};
use crate::output::Printer;
use crate::Session;
use futures_util::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Consume `queue_name` in a dedicated task, printing every message with `printer`, until the
/// loop stops on its own or `signal` resolves.
///
/// When `signal` wins, the loop is asked to stop and awaited: the message in flight, if any, is
/// settled first. Either way the `Received N message(s)` summary is printed exactly once, after
/// the last message.
pub async fn consume_until_signalled<T, W>(
    session: Arc<Session<T>>,
    queue_name: String,
    options: ConsumeOptions,
    printer: Arc<Printer<W>>,
    signal: impl Future<Output = ()>,
) -> Result<ConsumeSummary, ConsumeError>
where
    T: Transport + 'static,
    W: Write + Send + 'static,
{
    let (cancel, cancelled) = oneshot::channel::<()>();
    let mut consume_loop = tokio::spawn({
        let printer = Arc::clone(&printer);
        async move {
            let shutdown = async move {
                let _ = cancelled.await;
            };
            session
                .consume(&queue_name, &options, printer.as_ref(), shutdown)
                .await
        }
    });

    let outcome = tokio::select! {
        outcome = &mut consume_loop => outcome,
        () = signal => {
            info!("Stopping after the message in flight, if any");
            let _ = cancel.send(());
            consume_loop.await
        }
    };

    if let Err(e) = printer.print_summary() {
        warn!("Failed to print the summary: {}", e);
    }
    outcome.map_err(ConsumeError::Aborted)?
}
