use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Mutex;

use reelz_api::{BackendError, OutboxMessage, Producer, ProducerFactory};

/// One `Producer::send` call as observed by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct SendCall {
    pub producer: String,
    pub topic: String,
    pub messages: Vec<OutboxMessage>,
    pub delivered: bool,
}

/// Scripted send failures. Failures are transient I/O errors unless
/// `permanent` is set.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    /// Fail this many sends (to any topic) before succeeding.
    pub fail_first: usize,
    /// Fail every send to a topic not in `healthy_topics`.
    pub always: bool,
    /// Topics that are always down.
    pub down_topics: HashSet<String>,
    /// Topics exempt from `always`.
    pub healthy_topics: HashSet<String>,
    pub permanent: bool,
}

#[derive(Default)]
struct BrokerState {
    calls: Mutex<Vec<SendCall>>,
    plan: Mutex<FailurePlan>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_connect: AtomicBool,
}

/// In-memory broker: `ProducerFactory` whose producers record every call.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_plan(&self, plan: FailurePlan) {
        *self.state.plan.lock().await = plan;
    }

    pub async fn fail_first(&self, n: usize) {
        self.state.plan.lock().await.fail_first = n;
    }

    pub async fn fail_always(&self) {
        self.state.plan.lock().await.always = true;
    }

    pub async fn fail_topic(&self, topic: &str) {
        self.state.plan.lock().await.down_topics.insert(topic.to_string());
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::Release);
    }

    pub async fn calls(&self) -> Vec<SendCall> {
        self.state.calls.lock().await.clone()
    }

    pub async fn calls_to(&self, topic: &str) -> Vec<SendCall> {
        self.state.calls.lock().await.iter().filter(|c| c.topic == topic).cloned().collect()
    }

    /// Messages successfully delivered to `topic`, in delivery order.
    pub async fn delivered(&self, topic: &str) -> Vec<OutboxMessage> {
        self.state
            .calls
            .lock()
            .await
            .iter()
            .filter(|c| c.delivered && c.topic == topic)
            .flat_map(|c| c.messages.iter().cloned())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::Acquire)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::Acquire)
    }
}

impl ProducerFactory for MemoryBroker {
    fn connect<'a>(&'a self, name: &'a str)
        -> Pin<Box<dyn Future<Output = Result<Arc<dyn Producer>, BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            if self.state.fail_connect.load(Ordering::Acquire) {
                return Err(BackendError::config(format!("producer '{name}': no brokers reachable")));
            }
            self.state.connects.fetch_add(1, Ordering::AcqRel);
            let producer: Arc<dyn Producer> = Arc::new(MemoryProducer {
                name: name.to_string(),
                state: self.state.clone(),
            });
            Ok(producer)
        })
    }
}

struct MemoryProducer {
    name: String,
    state: Arc<BrokerState>,
}

impl Producer for MemoryProducer {
    fn send<'a>(&'a self, topic: &'a str, messages: &'a [OutboxMessage])
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>
    {
        Box::pin(async move {
            let failure = {
                let mut plan = self.state.plan.lock().await;
                let fail = if plan.down_topics.contains(topic) {
                    true
                } else if plan.always && !plan.healthy_topics.contains(topic) {
                    true
                } else if plan.fail_first > 0 {
                    plan.fail_first -= 1;
                    true
                } else {
                    false
                };
                fail.then(|| {
                    let msg = format!("{topic}: leader not available");
                    if plan.permanent { BackendError::format_err(msg) } else { BackendError::io(msg) }
                })
            };

            self.state.calls.lock().await.push(SendCall {
                producer: self.name.clone(),
                topic: topic.to_string(),
                messages: messages.to_vec(),
                delivered: failure.is_none(),
            });
            match failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.state.disconnects.fetch_add(1, Ordering::AcqRel);
            Ok(())
        })
    }
}
