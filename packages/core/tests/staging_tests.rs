#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::time::Duration;

use rpc_core::{Envelope, RpcError, StagedUnit, Subscription};
use tokio::sync::mpsc;

#[tokio::test]
async fn test_writes_pass_through_without_open_unit() {
    let unit = StagedUnit::new();
    assert_eq!(unit.stage("reply").await, Some("reply"));
    assert_eq!(unit.staged_len().await, 0);
    assert_eq!(unit.close().await, None);
    assert!(matches!(unit.drain().await, Err(RpcError::Transaction(_))));
}

#[tokio::test]
async fn test_drain_keeps_unit_open_until_closed() -> Result<(), Box<dyn Error>> {
    let unit = StagedUnit::new();
    unit.open().await?;
    assert_eq!(unit.stage("reply").await, None);
    assert_eq!(unit.stage("ack").await, None);
    assert_eq!(unit.staged_len().await, 2);

    assert_eq!(unit.drain().await?, vec!["reply", "ack"]);
    assert!(unit.is_open().await);
    assert_eq!(unit.stage("late").await, None);

    assert_eq!(unit.close().await, Some(1));
    assert!(!unit.is_open().await);
    Ok(())
}

#[tokio::test]
async fn test_open_waits_for_current_unit() -> Result<(), Box<dyn Error>> {
    let unit: StagedUnit<u32> = StagedUnit::new();
    unit.open().await?;
    unit.stage(1).await;

    let other = unit.clone();
    let waiting = tokio::spawn(async move { other.open().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    assert_eq!(unit.close().await, Some(1));
    tokio::time::timeout(Duration::from_secs(5), waiting).await???;
    assert!(unit.is_open().await);
    assert_eq!(unit.staged_len().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_on_demand_subscription_asks_before_waiting() -> Result<(), Box<dyn Error>> {
    let (tx, rx) = mpsc::channel(1);
    let (demand_tx, mut demand_rx) = mpsc::channel(1);
    let mut subscription = Subscription::on_demand("requests", rx, demand_tx);

    // Nothing is asked for until someone receives.
    assert!(demand_rx.try_recv().is_err());

    let request = Envelope::request("catalog.price.get", "catalog.replies", b"{}".to_vec());
    let expected = request.id();
    let feeder = tokio::spawn(async move {
        if demand_rx.recv().await.is_some() {
            let _ = tx.send(request).await;
        }
        demand_rx
    });

    let delivered = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await?
        .ok_or("subscription closed")?;
    assert_eq!(delivered.id(), expected);

    // Exactly one request per recv.
    let mut demand_rx = feeder.await?;
    assert!(demand_rx.try_recv().is_err());
    Ok(())
}
