//! Rendering of consumed messages.
use crate::consumers::{Delivery, Handler};
use amq_protocol_types::AMQPValue;
use chrono::{DateTime, Local, Utc};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Routing information, timestamp and body.
    #[default]
    Simple,
    /// Every field of the method, header and body frames.
    Verbose,
}

/// A [`Handler`] printing every message it receives to `W`.
pub struct Printer<W> {
    writer: Mutex<W>,
    mode: OutputMode,
    hex_dump: bool,
    received: AtomicUsize,
}

impl<W: Write + Send> Printer<W> {
    pub fn new(writer: W, mode: OutputMode, hex_dump: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            mode,
            hex_dump,
            received: AtomicUsize::new(0),
        }
    }

    /// How many messages have been handed to the printer so far.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Write the closing `Received N message(s)` line.
    pub fn print_summary(&self) -> io::Result<()> {
        let mut writer = self.lock_writer()?;
        writeln!(writer, "\nReceived {} message(s)", self.received())?;
        writer.flush()
    }

    fn lock_writer(&self) -> io::Result<std::sync::MutexGuard<'_, W>> {
        self.writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output writer poisoned"))
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn render(&self, number: usize, delivery: &Delivery) -> String {
        let mut out = format!("\n=== Message #{number} ===\n");
        match self.mode {
            OutputMode::Simple => render_simple(&mut out, delivery),
            OutputMode::Verbose => render_verbose(&mut out, delivery),
        }
        if self.hex_dump {
            out.push_str("\n[Hex Dump]\n");
            out.push_str(&hex_dump(&delivery.body));
        }
        out
    }
}

#[async_trait::async_trait]
impl<W: Write + Send> Handler for Printer<W> {
    type Error = io::Error;

    async fn handle(&self, delivery: &Delivery) -> Result<(), io::Error> {
        let number = self.received.fetch_add(1, Ordering::SeqCst) + 1;
        let rendered = self.render(number, delivery);

        let mut writer = self.lock_writer()?;
        writer.write_all(rendered.as_bytes())?;
        writer.flush()
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

// Writing into a `String` never fails: the `fmt::Result`s below are ignored.

fn render_simple(out: &mut String, delivery: &Delivery) {
    let method = &delivery.method;
    if !method.exchange.is_empty() {
        let _ = writeln!(out, "Exchange: {}", method.exchange);
    }
    if !method.routing_key.is_empty() {
        let _ = writeln!(out, "Routing Key: {}", method.routing_key);
    }
    if let Some(timestamp) = &delivery.header.timestamp {
        let _ = writeln!(out, "Timestamp: {}", format_timestamp(timestamp));
    }
    let _ = writeln!(out, "Body:\n{}", delivery.text);
}

fn render_verbose(out: &mut String, delivery: &Delivery) {
    let method = &delivery.method;
    let _ = writeln!(out, "\n[Method Frame] Basic.Deliver");
    let _ = writeln!(out, "  ConsumerTag:  {}", method.consumer_tag);
    let _ = writeln!(out, "  DeliveryTag:  {}", method.delivery_tag);
    let _ = writeln!(out, "  Redelivered:  {}", method.redelivered);
    let _ = writeln!(out, "  Exchange:     {}", method.exchange);
    let _ = writeln!(out, "  RoutingKey:   {}", method.routing_key);

    let header = &delivery.header;
    let not_set = |value: &Option<String>| value.clone().unwrap_or_else(|| "(not set)".into());
    let _ = writeln!(out, "\n[Header Frame] Content Header");
    let _ = writeln!(out, "  ContentType:     {}", not_set(&header.content_type));
    let _ = writeln!(out, "  ContentEncoding: {}", not_set(&header.content_encoding));
    let _ = writeln!(out, "  DeliveryMode:    {}", header.delivery_mode);
    let _ = writeln!(out, "  Priority:        {}", header.priority);
    let optional = [
        ("CorrelationId", &header.correlation_id),
        ("ReplyTo", &header.reply_to),
        ("Expiration", &header.expiration),
        ("MessageId", &header.message_id),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            let _ = writeln!(out, "  {:<17}{}", format!("{name}:"), value);
        }
    }
    if let Some(timestamp) = &header.timestamp {
        let _ = writeln!(out, "  Timestamp:       {}", format_timestamp(timestamp));
    }
    let optional = [
        ("Type", &header.kind),
        ("UserId", &header.user_id),
        ("AppId", &header.app_id),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            let _ = writeln!(out, "  {:<17}{}", format!("{name}:"), value);
        }
    }
    if !header.headers.is_empty() {
        let _ = writeln!(out, "  Headers:");
        for (key, value) in &header.headers {
            let _ = writeln!(out, "    {}: {}", key, display_value(value));
        }
    }

    let _ = writeln!(out, "\n[Body Frame] Content Body");
    let _ = writeln!(out, "  Size: {} bytes", delivery.body.len());
    let _ = writeln!(out, "  Data:\n{}", delivery.text);
}

/// Human-friendly rendering of a header value.
fn display_value(value: &AMQPValue) -> String {
    match value {
        AMQPValue::Boolean(b) => b.to_string(),
        AMQPValue::ShortShortInt(i) => i.to_string(),
        AMQPValue::ShortShortUInt(i) => i.to_string(),
        AMQPValue::ShortInt(i) => i.to_string(),
        AMQPValue::ShortUInt(i) => i.to_string(),
        AMQPValue::LongInt(i) => i.to_string(),
        AMQPValue::LongUInt(i) => i.to_string(),
        AMQPValue::LongLongInt(i) => i.to_string(),
        AMQPValue::Float(f) => f.to_string(),
        AMQPValue::Double(f) => f.to_string(),
        AMQPValue::ShortString(s) => s.as_str().to_owned(),
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::Timestamp(t) => t.to_string(),
        AMQPValue::FieldArray(array) => {
            let items: Vec<_> = array.as_slice().iter().map(display_value).collect();
            format!("[{}]", items.join(" "))
        }
        AMQPValue::FieldTable(table) => {
            let items: Vec<_> = table
                .inner()
                .iter()
                .map(|(k, v)| format!("{}:{}", k.as_str(), display_value(v)))
                .collect();
            format!("map[{}]", items.join(" "))
        }
        AMQPValue::Void => "<nil>".to_owned(),
        other => format!("{other:?}"),
    }
}

/// Canonical hex+ASCII dump: 16 bytes per line, offset first, printable characters on the right.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", line * 16);
        for position in 0..16 {
            match chunk.get(position) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if position == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&byte| {
            if (0x20..=0x7e).contains(&byte) {
                byte as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
