use amqp_cli::consumers::{Delivery, Handler};
use amqp_cli::{Session, SessionConfig};
use std::sync::Mutex;
use uuid::Uuid;

pub fn get_session_config() -> SessionConfig {
    SessionConfig::default()
}

pub async fn get_session() -> Session {
    Session::open(&get_session_config()).await.unwrap()
}

/// A queue name nobody else is using.
pub fn queue_name() -> String {
    format!("amqp-cli-test-{}", Uuid::new_v4())
}

/// What the broker pushed to a [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub body: Vec<u8>,
    pub text: String,
    pub redelivered: bool,
}

/// Remembers every message it is handed, failing the first `failures` of them.
#[derive(Default)]
pub struct Recorder {
    pub received: Mutex<Vec<Received>>,
    pub failures: usize,
}

impl Recorder {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Handler for Recorder {
    type Error = String;

    async fn handle(&self, delivery: &Delivery) -> Result<(), String> {
        let mut received = self.received.lock().unwrap();
        received.push(Received {
            body: delivery.body.clone(),
            text: delivery.text.clone(),
            redelivered: delivery.method.redelivered,
        });
        if received.len() <= self.failures {
            Err(format!("failure #{}", received.len()))
        } else {
            Ok(())
        }
    }
}
