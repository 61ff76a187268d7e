use amqp_cli::{
    cli::{Cli, Command, ConnectionArgs, ConsumeArgs, PublishArgs, PublishTarget},
    output::Printer,
    runner, Session,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{io, sync::Arc};
use tokio::signal;
use tracing::{info, warn};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout is reserved to the messages.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Publish(args) => publish(&cli.connection, &args).await,
        Command::Consume(args) => consume(&cli.connection, args).await,
    }
}

async fn publish(connection: &ConnectionArgs, args: &PublishArgs) -> Result<()> {
    let target = args.target()?;
    let body = args.body()?;

    let session = Session::open(&connection.session_config(args.confirm)?).await?;
    let outcome = match &target {
        PublishTarget::Queue(queue) => session.publish_to_queue(queue, &body).await,
        PublishTarget::Exchange { name, routing_key } => {
            session.publish(name, routing_key, &body).await
        }
    };
    session.close().await;
    outcome.context("Failed to publish the message")?;

    match target {
        PublishTarget::Queue(queue) => println!("Message published to queue '{queue}'"),
        PublishTarget::Exchange { name, routing_key } => println!(
            "Message published to exchange '{name}' with routing key '{routing_key}'"
        ),
    }
    Ok(())
}

async fn consume(connection: &ConnectionArgs, args: ConsumeArgs) -> Result<()> {
    let options = args.consume_options();
    let session = Arc::new(Session::open(&connection.session_config(false)?).await?);
    let printer = Arc::new(Printer::new(io::stdout(), args.output_mode(), args.hex));

    println!(
        "Consuming from queue '{}'... (Press Ctrl+C to stop)",
        args.queue
    );

    let outcome = runner::consume_until_signalled(
        Arc::clone(&session),
        args.queue,
        options,
        printer,
        shutdown_signal(),
    )
    .await;
    session.close().await;

    let summary = outcome.context("Error consuming")?;
    info!(processed = summary.processed, stop_reason = ?summary.stop_reason, "Consume loop stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
