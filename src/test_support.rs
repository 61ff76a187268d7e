//! An in-memory [`Transport`] recording every interaction with the "broker".
use crate::amqp::transport::{Acknowledger, PublishOutcome, Subscription, Transport};
use crate::consumers::{Delivery, DeliveryMethod};
use amq_protocol_types::DeliveryTag;
use futures_util::stream::{self, BoxStream, StreamExt};
use lapin::{options::QueueDeclareOptions, BasicProperties};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DeclareQueue {
        queue_name: String,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    },
    SetPrefetch(u16),
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
        content_type: Option<String>,
        timestamp: Option<u64>,
    },
    Subscribe {
        queue_name: String,
        auto_ack: bool,
    },
    Cancel(String),
    Close,
    Ack(DeliveryTag),
    Nack {
        delivery_tag: DeliveryTag,
        requeue: bool,
    },
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Ack/nack calls only.
    pub fn settlements(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Ack(_) | Call::Nack { .. }))
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct RecordingAcker {
    pub delivery_tag: DeliveryTag,
    pub log: CallLog,
}

#[async_trait::async_trait]
impl Acknowledger for RecordingAcker {
    async fn acknowledge(&self) -> Result<(), anyhow::Error> {
        self.log.push(Call::Ack(self.delivery_tag));
        Ok(())
    }

    async fn reject_and_requeue(&self) -> Result<(), anyhow::Error> {
        self.log.push(Call::Nack {
            delivery_tag: self.delivery_tag,
            requeue: true,
        });
        Ok(())
    }
}

/// A delivery whose acker writes into `log`.
pub fn recorded_delivery(log: &CallLog, delivery_tag: DeliveryTag, body: &str) -> Delivery {
    let method = DeliveryMethod {
        consumer_tag: "test-consumer".into(),
        delivery_tag,
        redelivered: false,
        exchange: String::new(),
        routing_key: "test-queue".into(),
    };
    let acker = RecordingAcker {
        delivery_tag,
        log: log.clone(),
    };
    Delivery::new(
        method,
        &BasicProperties::default().with_content_type("text/plain".into()),
        body.as_bytes().to_vec(),
        Box::new(acker),
    )
}

/// A delivery nobody is going to look at the settlement of.
pub fn delivery(delivery_tag: DeliveryTag, body: &str) -> Delivery {
    recorded_delivery(&CallLog::default(), delivery_tag, body)
}

pub type Deliveries = BoxStream<'static, Result<Delivery, anyhow::Error>>;

/// `count` deliveries tagged from 1, then the subscription stays open forever.
pub fn pending(log: &CallLog, count: u64) -> Deliveries {
    let log = log.clone();
    stream::iter(1..=count)
        .map(move |tag| Ok(recorded_delivery(&log, tag, &format!("message {tag}"))))
        .chain(stream::pending())
        .boxed()
}

/// A never-ending stream of deliveries tagged from 1.
pub fn unbounded(log: &CallLog) -> Deliveries {
    let log = log.clone();
    stream::iter(1..)
        .map(move |tag| Ok(recorded_delivery(&log, tag, &format!("message {tag}"))))
        .boxed()
}

/// A queue holding `messages` pending messages, numbered from 1, pushing them to its consumer
/// within the limits of the prefetch window the way a broker does: every settlement frees a slot,
/// which is refilled with the next pending message unless the consumer has been cancelled.
/// Every push gets a fresh delivery tag, redeliveries included.
#[derive(Clone)]
pub struct SimulatedQueue {
    state: Arc<Mutex<QueueState>>,
    log: CallLog,
}

struct QueueState {
    pending: VecDeque<u64>,
    next_delivery_tag: DeliveryTag,
    /// Zero means unlimited.
    prefetch: usize,
    unacked: usize,
    cancelled: bool,
    pushed: Vec<u64>,
    consumer: Option<mpsc::UnboundedSender<Result<Delivery, anyhow::Error>>>,
}

impl SimulatedQueue {
    pub fn with_messages(log: &CallLog, messages: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: (1..=messages).collect(),
                next_delivery_tag: 1,
                prefetch: 0,
                unacked: 0,
                cancelled: false,
                pushed: vec![],
                consumer: None,
            })),
            log: log.clone(),
        }
    }

    /// Messages pushed to the consumer so far, in order.
    pub fn pushed(&self) -> Vec<u64> {
        self.state.lock().unwrap().pushed.clone()
    }

    /// Messages still sitting in the queue.
    pub fn pending(&self) -> Vec<u64> {
        self.state.lock().unwrap().pending.iter().copied().collect()
    }

    fn set_prefetch(&self, prefetch_count: u16) {
        self.state.lock().unwrap().prefetch = usize::from(prefetch_count);
    }

    fn subscribe(&self) -> Deliveries {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().unwrap().consumer = Some(sender);
        self.refill();
        stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (delivery, receiver))
        })
        .boxed()
    }

    fn cancel(&self) {
        self.state.lock().unwrap().cancelled = true;
    }

    fn settle(&self, message: u64, requeue: bool) {
        {
            let mut state = self.state.lock().unwrap();
            state.unacked -= 1;
            if requeue {
                state.pending.push_front(message);
            }
        }
        self.refill();
    }

    fn refill(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.cancelled && (state.prefetch == 0 || state.unacked < state.prefetch) {
            let Some(message) = state.pending.pop_front() else {
                break;
            };
            let delivery_tag = state.next_delivery_tag;
            state.next_delivery_tag += 1;
            state.unacked += 1;
            state.pushed.push(message);
            let delivery = Delivery::new(
                DeliveryMethod {
                    consumer_tag: "test-consumer".into(),
                    delivery_tag,
                    redelivered: false,
                    exchange: String::new(),
                    routing_key: "test-queue".into(),
                },
                &BasicProperties::default(),
                format!("message {message}").into_bytes(),
                Box::new(QueueAcker {
                    delivery_tag,
                    message,
                    queue: self.clone(),
                }),
            );
            if let Some(consumer) = &state.consumer {
                let _ = consumer.send(Ok(delivery));
            }
        }
    }
}

struct QueueAcker {
    delivery_tag: DeliveryTag,
    message: u64,
    queue: SimulatedQueue,
}

#[async_trait::async_trait]
impl Acknowledger for QueueAcker {
    async fn acknowledge(&self) -> Result<(), anyhow::Error> {
        self.queue.log.push(Call::Ack(self.delivery_tag));
        self.queue.settle(self.message, false);
        Ok(())
    }

    async fn reject_and_requeue(&self) -> Result<(), anyhow::Error> {
        self.queue.log.push(Call::Nack {
            delivery_tag: self.delivery_tag,
            requeue: true,
        });
        self.queue.settle(self.message, true);
        Ok(())
    }
}

pub struct FakeTransport {
    pub log: CallLog,
    deliveries: Mutex<Option<Deliveries>>,
    queue: Option<SimulatedQueue>,
    /// `declare_queue` never completes.
    pub stall_declare: bool,
    pub fail_declare: bool,
    pub fail_subscribe: bool,
    pub publish_delay: Option<Duration>,
    pub publish_outcome: PublishOutcome,
}

impl FakeTransport {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            deliveries: Mutex::new(None),
            queue: None,
            stall_declare: false,
            fail_declare: false,
            fail_subscribe: false,
            publish_delay: None,
            publish_outcome: PublishOutcome::Sent,
        }
    }

    pub fn with_deliveries(self, deliveries: Deliveries) -> Self {
        *self.deliveries.lock().unwrap() = Some(deliveries);
        self
    }

    /// Subscriptions are fed by `queue`.
    pub fn with_queue(mut self, queue: &SimulatedQueue) -> Self {
        self.queue = Some(queue.clone());
        self
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn declare_queue(
        &self,
        queue_name: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), anyhow::Error> {
        if self.stall_declare {
            futures_util::future::pending::<()>().await;
        }
        if self.fail_declare {
            anyhow::bail!("ACCESS_REFUSED - queue '{queue_name}' in vhost '/' not allowed");
        }
        self.log.push(Call::DeclareQueue {
            queue_name: queue_name.to_owned(),
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
        });
        Ok(())
    }

    async fn set_prefetch(&self, prefetch_count: u16) -> Result<(), anyhow::Error> {
        self.log.push(Call::SetPrefetch(prefetch_count));
        if let Some(queue) = &self.queue {
            queue.set_prefetch(prefetch_count);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<PublishOutcome, anyhow::Error> {
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }
        self.log.push(Call::Publish {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            body: payload.to_vec(),
            content_type: properties
                .content_type()
                .as_ref()
                .map(|c| c.as_str().to_owned()),
            timestamp: *properties.timestamp(),
        });
        Ok(self.publish_outcome)
    }

    async fn subscribe(
        &self,
        queue_name: &str,
        auto_ack: bool,
    ) -> Result<Subscription, anyhow::Error> {
        if self.fail_subscribe {
            anyhow::bail!("NOT_FOUND - no queue '{queue_name}'");
        }
        self.log.push(Call::Subscribe {
            queue_name: queue_name.to_owned(),
            auto_ack,
        });
        let deliveries = match &self.queue {
            Some(queue) => queue.subscribe(),
            None => self
                .deliveries
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| stream::empty().boxed()),
        };
        Ok(Subscription {
            consumer_tag: "test-consumer".into(),
            deliveries,
        })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        self.log.push(Call::Cancel(consumer_tag.to_owned()));
        if let Some(queue) = &self.queue {
            queue.cancel();
        }
        Ok(())
    }

    async fn close(&self) {
        self.log.push(Call::Close);
    }
}
