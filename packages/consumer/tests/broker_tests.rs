#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::num::NonZeroU32;
use std::time::Duration;

use common::{
    CONNECTION, Fault, FaultyResource, PRICE_TOPIC, REPLIES, REQUESTS, Recorder, Step, price_request,
};
use rpc_consumer::{
    BrokerHandle, BrokerTransaction, Consumer, ConsumerContext, ConsumerMessage, MemoryQueue,
    MessageOutcome, ProcessReport, QueueAddress, TopicBindings, start_consumer,
};
use rpc_core::{
    JsonEncoder, MessageQueue, QueueConfig, QueueDirectory, RpcError, TransactionalResource,
};
use serde_json::json;

async fn recv_within(
    subscription: &mut rpc_core::Subscription,
    wait: Duration,
) -> Option<rpc_core::Envelope> {
    tokio::time::timeout(wait, subscription.recv()).await.ok().flatten()
}

#[tokio::test]
async fn test_declare_and_resolve_queues() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;

    let first = broker.declare_queue("default", "a", QueueConfig::default()).await?;
    first.publish(price_request("A1")).await?;

    // Declaring again returns the same queue.
    let again = broker.declare_queue("default", "a", QueueConfig::default()).await?;
    assert_eq!(again.stats().await?.pending, 1);

    broker.declare_queue("other", "a", QueueConfig::default()).await?;
    assert_eq!(
        broker.list_queues().await?,
        vec![QueueAddress::new("default", "a"), QueueAddress::new("other", "a")]
    );

    let resolved = broker.resolve("default", "a").await?;
    assert_eq!(resolved.name(), "a");
    assert!(matches!(
        broker.resolve("default", "missing").await,
        Err(RpcError::QueueNotFound { .. })
    ));

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_dequeue_acknowledge_and_reject() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let queue = broker.declare_queue(CONNECTION, REQUESTS, QueueConfig::default()).await?;

    let first = price_request("A1");
    let second = price_request("B2");
    queue.publish(first.clone()).await?;
    queue.publish(second.clone()).await?;

    let delivered = queue.dequeue().await?.ok_or("empty")?;
    assert_eq!(delivered, first);
    queue.acknowledge(&delivered).await?;

    let delivered = queue.dequeue().await?.ok_or("empty")?;
    assert_eq!(delivered, second);
    queue.reject(&delivered, "no price").await?;

    assert!(queue.dequeue().await?.is_none());

    let stats = queue.stats().await?;
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.active(), 0);

    let dead = queue.dead_letters().await?;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope, second);
    assert_eq!(dead[0].reason, "no price");

    // Settling twice is an error, not a lost connection.
    assert!(matches!(
        queue.acknowledge(&delivered).await,
        Err(RpcError::Queue { .. })
    ));

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_push_publishes_correlated_reply() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let replies = broker.declare_queue(CONNECTION, REPLIES, QueueConfig::default()).await?;

    let request = price_request("A1");
    replies.push(&request, b"{\"price\":19.99}".to_vec()).await?;

    let reply = replies.dequeue().await?.ok_or("no reply")?;
    assert_eq!(reply.body(), b"{\"price\":19.99}");
    assert_eq!(reply.topic_name()?, PRICE_TOPIC);
    let correlation = request.id().to_string();
    assert_eq!(reply.correlation_id(), Some(correlation.as_str()));

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_recover_redelivers_and_dead_letters() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let config = QueueConfig {
        max_deliveries: Some(2),
        ..QueueConfig::default()
    };
    let queue = broker.declare_queue(CONNECTION, REQUESTS, config).await?;
    let envelope = price_request("A1");
    queue.publish(envelope.clone()).await?;

    queue.dequeue().await?.ok_or("empty")?;
    assert_eq!(queue.recover().await?, 1);
    assert_eq!(queue.stats().await?.redelivered, 1);

    // Second delivery is the last one allowed.
    let redelivered = queue.dequeue().await?.ok_or("not redelivered")?;
    assert_eq!(redelivered.id(), envelope.id());
    queue.recover().await?;

    assert!(queue.dequeue().await?.is_none());
    let dead = queue.dead_letters().await?;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].deliveries, 2);

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_visibility_timeout_redelivers() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let config = QueueConfig {
        visibility_timeout_secs: 1,
        ..QueueConfig::default()
    };
    let queue = broker.declare_queue(CONNECTION, REQUESTS, config).await?;
    queue.publish(price_request("A1")).await?;
    queue.dequeue().await?.ok_or("empty")?;

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let stats = queue.stats().await?;
    assert_eq!(stats.redelivered, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.in_flight, 0);

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_subscription_respects_prefetch() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let config = QueueConfig {
        prefetch: 1,
        ..QueueConfig::default()
    };
    let queue = broker.declare_queue(CONNECTION, REQUESTS, config).await?;
    let mut subscription = queue.subscribe().await?;

    queue.publish(price_request("A1")).await?;
    queue.publish(price_request("A1")).await?;

    let first = recv_within(&mut subscription, Duration::from_secs(2))
        .await
        .ok_or("nothing delivered")?;
    assert!(recv_within(&mut subscription, Duration::from_millis(200)).await.is_none());

    queue.acknowledge(&first).await?;
    assert!(recv_within(&mut subscription, Duration::from_secs(2)).await.is_some());

    // Shutting the queue down closes the subscription.
    broker.shutdown();
    let closed = tokio::time::timeout(Duration::from_secs(2), subscription.recv()).await?;
    assert!(closed.is_none());

    Ok(())
}

#[tokio::test]
async fn test_stopped_queue_counts_as_connection_lost() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let queue = broker.declare_queue(CONNECTION, REQUESTS, QueueConfig::default()).await?;

    broker.shutdown();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(
        queue.dequeue().await,
        Err(RpcError::ConnectionLost(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_broker_transaction_holds_back_reply_and_acknowledge() -> Result<(), Box<dyn Error>> {
    let transaction = BrokerTransaction::new();
    let (broker, _handle) = BrokerHandle::start().await?;
    let broker = broker.with_transaction(&transaction);
    let requests = broker.declare_queue(CONNECTION, REQUESTS, QueueConfig::default()).await?;
    let replies = broker.declare_queue(CONNECTION, REPLIES, QueueConfig::default()).await?;

    requests.publish(price_request("A1")).await?;
    let delivered = requests.dequeue().await?.ok_or("empty")?;

    transaction.begin().await?;
    replies.push(&delivered, b"{\"price\":19.99}".to_vec()).await?;
    requests.acknowledge(&delivered).await?;
    assert_eq!(transaction.staged_len().await, 2);
    assert_eq!(replies.stats().await?.pending, 0);
    assert_eq!(requests.stats().await?.acknowledged, 0);

    transaction.rollback().await?;
    assert!(!transaction.is_open().await);
    assert_eq!(replies.stats().await?.pending, 0);
    assert_eq!(requests.stats().await?.in_flight, 1);

    // Redelivered after the rollback, this time committed.
    assert_eq!(requests.recover().await?, 1);
    let delivered = requests.dequeue().await?.ok_or("not redelivered")?;
    transaction.begin().await?;
    replies.push(&delivered, b"{\"price\":19.99}".to_vec()).await?;
    requests.acknowledge(&delivered).await?;
    transaction.commit().await?;

    assert_eq!(replies.stats().await?.pending, 1);
    let stats = requests.stats().await?;
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.in_flight, 0);

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_reject_and_publish_skip_the_open_unit() -> Result<(), Box<dyn Error>> {
    let transaction = BrokerTransaction::new();
    let (broker, _handle) = BrokerHandle::start().await?;
    let queue = broker
        .clone()
        .with_transaction(&transaction)
        .declare_queue(CONNECTION, REQUESTS, QueueConfig::default())
        .await?;

    queue.publish(price_request("A1")).await?;
    let delivered = queue.dequeue().await?.ok_or("empty")?;

    transaction.begin().await?;
    queue.publish(price_request("B2")).await?;
    queue.reject(&delivered, "no price").await?;
    assert_eq!(transaction.staged_len().await, 0);
    transaction.rollback().await?;

    let stats = queue.stats().await?;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.rejected, 1);

    broker.shutdown();
    Ok(())
}

type BrokerConsumer =
    Consumer<MemoryQueue, BrokerHandle, JsonEncoder, FaultyResource<BrokerTransaction>>;

struct BrokerSetup {
    consumer: BrokerConsumer,
    requests: MemoryQueue,
    replies: MemoryQueue,
    recorder: Recorder,
}

async fn broker_consumer(broker: &BrokerHandle) -> Result<BrokerSetup, Box<dyn Error>> {
    let config = common::catalog_config();
    let transaction = BrokerTransaction::new();
    let broker = broker.clone().with_transaction(&transaction);
    let requests = broker.declare_queue(CONNECTION, REQUESTS, QueueConfig::default()).await?;
    let replies = broker.declare_queue(CONNECTION, REPLIES, QueueConfig::default()).await?;

    let recorder = Recorder::default();
    let invocations = common::Invocations::default();
    let bindings = TopicBindings::resolve(&config, &common::test_handlers(&invocations))?;
    let context = ConsumerContext::new(
        bindings,
        JsonEncoder::new(),
        broker,
        FaultyResource::new(transaction, recorder.clone()),
    );

    Ok(BrokerSetup {
        consumer: Consumer::new(&config, requests.clone(), context),
        requests,
        replies,
        recorder,
    })
}

#[tokio::test]
async fn test_failed_commit_rejects_without_reply() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let s = broker_consumer(&broker).await?;
    s.recorder.fail(Step::Commit, Fault::Other);

    let request = price_request("A1");
    s.requests.publish(request.clone()).await?;
    let delivered = s.requests.dequeue().await?.ok_or("empty")?;
    assert_eq!(s.consumer.consume(&delivered).await, MessageOutcome::Rejected);

    assert!(s.replies.dequeue().await?.is_none());
    let stats = s.requests.stats().await?;
    assert_eq!(stats.acknowledged, 0);
    assert_eq!(stats.rejected, 1);
    let dead = s.requests.dead_letters().await?;
    assert_eq!(dead[0].envelope.id(), request.id());

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_commit_losing_connection_leaves_request_for_redelivery() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let s = broker_consumer(&broker).await?;
    s.recorder.fail(Step::Commit, Fault::ConnectionLost);

    s.requests.publish(price_request("A1")).await?;
    let report = s.consumer.process(NonZeroU32::new(1)).await?;
    assert_eq!(report.redelivered, 1);

    assert!(s.replies.dequeue().await?.is_none());
    let stats = s.requests.stats().await?;
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.acknowledged, 0);
    assert_eq!(stats.rejected, 0);

    // Once healed, the redelivered request commits normally.
    s.recorder.heal();
    assert_eq!(s.requests.recover().await?, 1);
    let report = s.consumer.process(NonZeroU32::new(1)).await?;
    assert_eq!(report.committed, 1);
    assert!(s.replies.dequeue().await?.is_some());

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_consumer_over_broker_queues() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let BrokerSetup {
        consumer,
        requests,
        replies,
        ..
    } = broker_consumer(&broker).await?;

    requests.publish(price_request("A1")).await?;
    requests.publish(price_request("B2")).await?;

    let report = consumer.process(NonZeroU32::new(2)).await?;
    assert_eq!(report.committed, 1);
    assert_eq!(report.rejected, 1);

    let reply = replies.dequeue().await?.ok_or("no reply")?;
    let body: serde_json::Value = serde_json::from_slice(reply.body())?;
    assert_eq!(body, json!({ "price": 19.99 }));
    assert!(replies.dequeue().await?.is_none());

    let stats = requests.stats().await?;
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.rejected, 1);

    broker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_consumer_actor_processes_subscription() -> Result<(), Box<dyn Error>> {
    let (broker, _handle) = BrokerHandle::start().await?;
    let BrokerSetup {
        consumer,
        requests,
        replies,
        ..
    } = broker_consumer(&broker).await?;
    let mut reply_subscription = replies.subscribe().await?;

    let (actor, actor_handle) = start_consumer(consumer).await?;

    requests.publish(price_request("A1")).await?;
    let reply = recv_within(&mut reply_subscription, Duration::from_secs(5))
        .await
        .ok_or("no reply")?;
    assert_eq!(reply.topic_name()?, PRICE_TOPIC);

    requests.publish(price_request("B2")).await?;
    let mut report = ProcessReport::default();
    for _ in 0..50 {
        let result = ractor::rpc::call(
            &actor,
            |reply| ConsumerMessage::GetReport { reply },
            Some(Duration::from_secs(1)),
        )
        .await;
        let Ok(ractor::rpc::CallResult::Success(current)) = result else {
            return Err("report unavailable".into());
        };
        report = current;
        if report.rejected == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(report.committed, 1);
    assert_eq!(report.rejected, 1);

    actor.send_message(ConsumerMessage::Shutdown)?;
    tokio::time::timeout(Duration::from_secs(5), actor_handle).await??;

    broker.shutdown();
    Ok(())
}
