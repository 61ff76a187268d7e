//! Command line interface.
use crate::amqp::configuration::{SessionConfig, TlsSettings};
use crate::consumers::ConsumeOptions;
use crate::output::OutputMode;
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "amqp-cli", version, about = "A CLI tool for RabbitMQ messaging")]
#[command(long_about = "amqp-cli publishes and consumes messages on a RabbitMQ broker.")]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// RabbitMQ host
    #[arg(short = 'H', long, global = true, env = "AMQP_HOST", default_value = "localhost")]
    pub host: String,

    /// RabbitMQ port
    #[arg(short = 'P', long, global = true, env = "AMQP_PORT", default_value_t = 5672)]
    pub port: u16,

    /// RabbitMQ username
    #[arg(short = 'u', long, global = true, env = "AMQP_USERNAME", default_value = "guest")]
    pub username: String,

    /// RabbitMQ password
    #[arg(
        short = 'p',
        long,
        global = true,
        env = "AMQP_PASSWORD",
        default_value = "guest",
        hide_env_values = true
    )]
    pub password: String,

    /// RabbitMQ virtual host
    #[arg(short = 'v', long, global = true, env = "AMQP_VHOST", default_value = "")]
    pub vhost: String,

    /// Seconds to wait for the connection to be established
    #[arg(long, global = true, env = "AMQP_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Connect over TLS (amqps)
    #[arg(long, global = true)]
    pub tls: bool,

    /// Expected domain on the server certificate, defaults to the host
    #[arg(long, global = true, requires = "tls")]
    pub tls_domain: Option<String>,

    /// PEM file with the CA certificate chain to trust
    #[arg(long, global = true, requires = "tls")]
    pub ca_cert: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish a message to a queue or an exchange
    Publish(PublishArgs),
    /// Consume messages from a queue
    Consume(ConsumeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct PublishArgs {
    /// Exchange name
    #[arg(short = 'e', long)]
    pub exchange: Option<String>,

    /// Routing key
    #[arg(short = 'r', long, default_value = "")]
    pub routing_key: String,

    /// Queue name (publishes through the default exchange)
    #[arg(short = 'q', long)]
    pub queue: Option<String>,

    /// Message body, read from stdin when omitted
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Wait for the broker to confirm the publish
    #[arg(long)]
    pub confirm: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConsumeArgs {
    /// Queue name
    #[arg(short = 'q', long)]
    pub queue: String,

    /// Let the broker consider messages settled as soon as they are delivered
    #[arg(long)]
    pub auto_ack: bool,

    /// Stop after this many messages (0 = unlimited)
    #[arg(short = 'n', long, default_value_t = 0)]
    pub count: usize,

    /// Show the method, header and body frames of every message
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Append a hex dump of the body
    #[arg(long)]
    pub hex: bool,
}

/// Invalid invocations, detected before talking to the broker.
#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("either --queue or --exchange must be specified")]
    MissingTarget,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("Failed to read the message from stdin")]
    ReadStdin(#[source] io::Error),
    #[error("Failed to read the CA certificate chain at {}", path.display())]
    ReadCaCertificate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where a message is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    Queue(String),
    Exchange { name: String, routing_key: String },
}

impl ConnectionArgs {
    pub fn session_config(&self, publisher_confirms: bool) -> Result<SessionConfig, CliError> {
        let tls = if self.tls {
            let ca_certificate_chain_pem = self
                .ca_cert
                .as_ref()
                .map(|path| {
                    std::fs::read_to_string(path).map_err(|source| CliError::ReadCaCertificate {
                        path: path.clone(),
                        source,
                    })
                })
                .transpose()?;
            Some(TlsSettings {
                domain: self.tls_domain.clone(),
                ca_certificate_chain_pem,
            })
        } else {
            None
        };

        Ok(SessionConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone().into(),
            vhost: self.vhost.clone(),
            connection_timeout_seconds: Some(self.connect_timeout),
            tls,
            publisher_confirms,
        })
    }
}

impl PublishArgs {
    /// A queue wins over an exchange when both are given.
    pub fn target(&self) -> Result<PublishTarget, CliError> {
        match (&self.queue, &self.exchange) {
            (Some(queue), _) if !queue.is_empty() => Ok(PublishTarget::Queue(queue.clone())),
            (_, Some(exchange)) if !exchange.is_empty() => Ok(PublishTarget::Exchange {
                name: exchange.clone(),
                routing_key: self.routing_key.clone(),
            }),
            _ => Err(CliError::MissingTarget),
        }
    }

    /// The message passed via `--message`, otherwise whatever is piped into stdin.
    ///
    /// An empty `--message` counts as no message.
    pub fn body(&self) -> Result<String, CliError> {
        let stdin = io::stdin();
        let piped = !stdin.is_terminal();
        self.body_from(stdin.lock(), piped)
    }

    fn body_from(&self, stdin: impl BufRead, piped: bool) -> Result<String, CliError> {
        let body = match self.message.as_deref() {
            Some(message) if !message.is_empty() => message.to_owned(),
            _ if piped => read_lines(stdin).map_err(CliError::ReadStdin)?,
            _ => String::new(),
        };
        if body.is_empty() {
            return Err(CliError::EmptyMessage);
        }
        Ok(body)
    }
}

fn read_lines(reader: impl BufRead) -> io::Result<String> {
    let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

impl ConsumeArgs {
    /// With a count limit in manual ack mode the broker pushes one message at a time: settling a
    /// message must not pull in one we are not going to process.
    pub fn consume_options(&self) -> ConsumeOptions {
        let exit_after = (self.count > 0).then_some(self.count);
        let prefetch_count = match exit_after {
            Some(_) if !self.auto_ack => Some(1),
            _ => None,
        };
        ConsumeOptions {
            auto_ack: self.auto_ack,
            exit_after,
            prefetch_count,
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.verbose {
            OutputMode::Verbose
        } else {
            OutputMode::Simple
        }
    }
}
