#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpc_consumer::{
    Consumer, ConsumerContext, FnHandler, HandlerArgs, HandlerFuture, HandlerRegistry,
    HandlerResult, RpcHandler, TopicBindings, rpc_handler,
};
use rpc_core::{
    ConsumerConfig, Envelope, EnvelopeId, JsonEncoder, MessageQueue, QueueDirectory, RpcError,
    SchemaKind, Subscription, TopicConfig, TransactionalResource,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub const PRICE_TOPIC: &str = "catalog.price.get";
pub const REQUESTS: &str = "catalog.requests";
pub const REPLIES: &str = "catalog.replies";
pub const CONNECTION: &str = "default";

/// Side effects observed by the fakes, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Begin,
    Commit,
    Rollback,
    Push { queue: String, body: Vec<u8> },
    Acknowledge(EnvelopeId),
    Reject { id: EnvelopeId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Subscribe,
    Begin,
    Commit,
    Push,
    Acknowledge,
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    ConnectionLost,
    Other,
}

/// Shared journal of effects plus injected faults.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    effects: Arc<Mutex<Vec<Effect>>>,
    faults: Arc<Mutex<HashMap<Step, Fault>>>,
}

impl Recorder {
    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.effects.lock().unwrap().clear();
    }

    pub fn fail(&self, step: Step, fault: Fault) {
        self.faults.lock().unwrap().insert(step, fault);
    }

    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
    }

    pub fn acknowledged(&self) -> usize {
        self.count(|e| matches!(e, Effect::Acknowledge(_)))
    }

    pub fn rejected(&self) -> usize {
        self.count(|e| matches!(e, Effect::Reject { .. }))
    }

    pub fn pushed(&self) -> usize {
        self.count(|e| matches!(e, Effect::Push { .. }))
    }

    pub fn committed(&self) -> usize {
        self.count(|e| matches!(e, Effect::Commit))
    }

    pub fn rolled_back(&self) -> usize {
        self.count(|e| matches!(e, Effect::Rollback))
    }

    fn count(&self, predicate: impl Fn(&Effect) -> bool) -> usize {
        self.effects.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    fn check(&self, step: Step) -> Result<(), RpcError> {
        match self.faults.lock().unwrap().get(&step) {
            Some(Fault::ConnectionLost) => {
                Err(RpcError::ConnectionLost(format!("{:?} lost the connection", step)))
            }
            Some(Fault::Other) => Err(RpcError::queue("fake", "test", format!("{:?} failed", step))),
            None => Ok(()),
        }
    }

    fn record(&self, effect: Effect) {
        self.effects.lock().unwrap().push(effect);
    }
}

/// In-memory queue recording everything done to it.
#[derive(Debug, Clone)]
pub struct RecordingQueue {
    name: String,
    recorder: Recorder,
    inbox: Arc<Mutex<VecDeque<Envelope>>>,
}

impl RecordingQueue {
    pub fn new(name: &str, recorder: Recorder) -> Self {
        Self {
            name: name.to_string(),
            recorder,
            inbox: Arc::default(),
        }
    }

    pub fn publish(&self, envelope: Envelope) {
        self.inbox.lock().unwrap().push_back(envelope);
    }

    pub fn remaining(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }
}

impl MessageQueue for RecordingQueue {
    fn name(&self) -> &str {
        &self.name
    }

    /// Delivers everything queued so far, then closes.
    async fn subscribe(&self) -> Result<Subscription, RpcError> {
        self.recorder.check(Step::Subscribe)?;
        let pending: Vec<_> = self.inbox.lock().unwrap().drain(..).collect();
        let (tx, rx) = mpsc::channel(pending.len().max(1));
        for envelope in pending {
            tx.try_send(envelope).unwrap();
        }
        Ok(Subscription::new(self.name.clone(), rx))
    }

    async fn dequeue(&self) -> Result<Option<Envelope>, RpcError> {
        Ok(self.inbox.lock().unwrap().pop_front())
    }

    async fn push(&self, _request: &Envelope, reply_body: Vec<u8>) -> Result<(), RpcError> {
        self.recorder.check(Step::Push)?;
        self.recorder.record(Effect::Push {
            queue: self.name.clone(),
            body: reply_body,
        });
        Ok(())
    }

    async fn acknowledge(&self, envelope: &Envelope) -> Result<(), RpcError> {
        self.recorder.check(Step::Acknowledge)?;
        self.recorder.record(Effect::Acknowledge(envelope.id()));
        Ok(())
    }

    async fn reject(&self, envelope: &Envelope, reason: &str) -> Result<(), RpcError> {
        self.recorder.record(Effect::Reject {
            id: envelope.id(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// Resolves any queue name on one connection to a recording queue.
#[derive(Debug, Clone)]
pub struct RecordingDirectory {
    connection: String,
    recorder: Recorder,
}

impl RecordingDirectory {
    pub fn new(connection: &str, recorder: Recorder) -> Self {
        Self {
            connection: connection.to_string(),
            recorder,
        }
    }
}

impl QueueDirectory for RecordingDirectory {
    type Queue = RecordingQueue;

    async fn resolve(&self, connection: &str, queue: &str) -> Result<RecordingQueue, RpcError> {
        if connection != self.connection {
            return Err(RpcError::QueueNotFound {
                connection: connection.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(RecordingQueue::new(queue, self.recorder.clone()))
    }
}

/// Transaction resource recording begin, commit and rollback.
#[derive(Debug, Clone)]
pub struct RecordingResource {
    recorder: Recorder,
}

impl RecordingResource {
    pub fn new(recorder: Recorder) -> Self {
        Self { recorder }
    }
}

impl TransactionalResource for RecordingResource {
    async fn begin(&self) -> Result<(), RpcError> {
        self.recorder.record(Effect::Begin);
        self.recorder.check(Step::Begin)
    }

    async fn commit(&self) -> Result<(), RpcError> {
        self.recorder.check(Step::Commit)?;
        self.recorder.record(Effect::Commit);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), RpcError> {
        self.recorder.record(Effect::Rollback);
        Ok(())
    }
}

/// Wraps a real resource, failing begin or commit on the recorder's faults.
#[derive(Debug, Clone)]
pub struct FaultyResource<T> {
    inner: T,
    recorder: Recorder,
}

impl<T> FaultyResource<T> {
    pub fn new(inner: T, recorder: Recorder) -> Self {
        Self { inner, recorder }
    }
}

impl<T: TransactionalResource> TransactionalResource for FaultyResource<T> {
    async fn begin(&self) -> Result<(), RpcError> {
        self.recorder.check(Step::Begin)?;
        self.inner.begin().await
    }

    async fn commit(&self) -> Result<(), RpcError> {
        self.recorder.check(Step::Commit)?;
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<(), RpcError> {
        self.inner.rollback().await
    }
}

pub type TestConsumer = Consumer<RecordingQueue, RecordingDirectory, JsonEncoder, RecordingResource>;

/// Counts handler invocations by name.
#[derive(Debug, Clone, Default)]
pub struct Invocations(Arc<Mutex<HashMap<String, usize>>>);

impl Invocations {
    pub fn get(&self, handler: &str) -> usize {
        self.0.lock().unwrap().get(handler).copied().unwrap_or(0)
    }

    fn bump(&self, handler: &str) {
        *self.0.lock().unwrap().entry(handler.to_string()).or_default() += 1;
    }
}

fn counted<F>(name: &'static str, invocations: &Invocations, respond: F) -> impl RpcHandler
where
    F: Fn(HandlerArgs) -> HandlerResult + Send + Sync + 'static,
{
    let calls = invocations.clone();
    FnHandler::new(name, move |args: HandlerArgs| -> HandlerFuture {
        calls.bump(name);
        let result = respond(args);
        Box::pin(async move { result })
    })
}

/// Handlers used across the tests.
///
/// - `catalog.price`: 19.99 for sku `A1`, nothing for any other sku
/// - `null`: answers JSON null
/// - `fail`: always errors
/// - `sum`: adds its positional arguments
/// - `echo`: returns its arguments
/// - `slow`: sleeps for ten seconds
pub fn test_handlers(invocations: &Invocations) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();

    handlers.register(counted("catalog.price", invocations, |args| {
        let sku = args.arg(0).and_then(|v| v.get("sku")).and_then(Value::as_str);
        match sku {
            Some("A1") => Ok(Some(json!({ "price": 19.99 }))),
            _ => Ok(None),
        }
    }));

    handlers.register(counted("null", invocations, |_| Ok(Some(Value::Null))));

    handlers.register(counted("fail", invocations, |_| {
        Err("inventory service refused".to_string())
    }));

    handlers.register(counted("sum", invocations, |args| {
        let HandlerArgs::Positional(values) = args else {
            return Err("expected positional arguments".to_string());
        };
        let total: i64 = values.iter().filter_map(Value::as_i64).sum();
        Ok(Some(json!(total)))
    }));

    handlers.register(counted("echo", invocations, |args| Ok(Some(args.into_value()))));

    handlers.register(rpc_handler!("slow", |args| {
        let _ = args;
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(Some(json!("too late")))
    }));

    handlers
}

/// Consumer config with the price topic and a few helper topics.
pub fn catalog_config() -> ConsumerConfig {
    ConsumerConfig::new("catalog-consumer", CONNECTION, REQUESTS)
        .with_poll_interval(10)
        .with_topic(TopicConfig::new(PRICE_TOPIC, SchemaKind::Single, "catalog.price"))
        .with_topic(TopicConfig::new("catalog.null", SchemaKind::Single, "null"))
        .with_topic(TopicConfig::new("catalog.fail", SchemaKind::Single, "fail"))
        .with_topic(TopicConfig::new("math.sum", SchemaKind::Positional, "sum"))
        .with_topic(TopicConfig::new("echo.single", SchemaKind::Single, "echo"))
        .with_topic(TopicConfig::new("echo.positional", SchemaKind::Positional, "echo"))
        .with_topic(TopicConfig::new("slow", SchemaKind::Single, "slow"))
        .with_topic(TopicConfig::new("elsewhere", SchemaKind::Single, "echo").with_connection("remote"))
}

pub struct Harness {
    pub consumer: TestConsumer,
    pub queue: RecordingQueue,
    pub recorder: Recorder,
    pub invocations: Invocations,
}

pub fn harness(config: ConsumerConfig) -> Harness {
    let recorder = Recorder::default();
    let invocations = Invocations::default();
    let queue = RecordingQueue::new(&config.queue, recorder.clone());

    let bindings = TopicBindings::resolve(&config, &test_handlers(&invocations)).unwrap();
    let context = ConsumerContext::new(
        bindings,
        JsonEncoder::new(),
        RecordingDirectory::new(CONNECTION, recorder.clone()),
        RecordingResource::new(recorder.clone()),
    );

    Harness {
        consumer: Consumer::new(&config, queue.clone(), context),
        queue,
        recorder,
        invocations,
    }
}

pub fn request(topic: &str, body: Value) -> Envelope {
    Envelope::request(topic, REPLIES, serde_json::to_vec(&body).unwrap())
}

pub fn price_request(sku: &str) -> Envelope {
    request(PRICE_TOPIC, json!({ "sku": sku }))
}
