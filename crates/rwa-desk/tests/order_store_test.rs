//! Order store integration tests.
//!
//! Snapshot views over the desk's ledger, background refresh after
//! mutations, and failure handling.

mod integration;
use integration::common::world::World;

use std::time::Duration;

use rwa_core::OrderStatus;
use rwa_ledger::OperationSigner;
use tokio::time::timeout;

#[tokio::test]
async fn test_views_filter_without_network() {
    let world = World::new();
    let alice = world.investor(10_000);
    let bob = world.investor(10_000);
    let admin = world.admin(1_000);
    let desk = world.desk();

    let a1 = desk.create(&alice, world.asset, 10, 10).await.unwrap();
    let a2 = desk.create(&alice, world.asset, 20, 10).await.unwrap();
    let b1 = desk.create(&bob, world.asset, 30, 10).await.unwrap();
    desk.approve(&admin, a1.order_address).await.unwrap();
    desk.cancel(&bob, b1.order_address).await.unwrap();

    assert_eq!(desk.store().refresh().await.unwrap(), 3);

    // Views read the snapshot only.
    world.ledger.set_list_failure(true);
    let pending = desk.store().get_by_status(OrderStatus::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].address, a2.order_address);
    assert_eq!(desk.store().get_by_status(OrderStatus::Approved).len(), 1);
    assert_eq!(desk.store().get_by_status(OrderStatus::Cancelled).len(), 1);
    assert_eq!(desk.store().get_by_requester(&alice.address()).len(), 2);
    assert_eq!(desk.store().get_by_requester(&bob.address()).len(), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_snapshot_and_flags_error() {
    let world = World::new();
    let investor = world.investor(10_000);
    let desk = world.desk();
    desk.create(&investor, world.asset, 10, 10).await.unwrap();
    desk.store().refresh().await.unwrap();

    world.ledger.set_list_failure(true);
    assert!(desk.store().refresh().await.is_err());
    assert_eq!(desk.store().snapshot().len(), 1);
    assert!(desk.store().last_error().is_some());

    world.ledger.set_list_failure(false);
    desk.store().refresh().await.unwrap();
    assert!(desk.store().last_error().is_none());
}

#[tokio::test]
async fn test_mutations_schedule_refresh() {
    let world = World::with_config(|c| c.refresh.auto_refresh = true);
    let investor = world.investor(10_000);
    let admin = world.admin(1_000);
    let desk = world.desk();

    let created = desk.create(&investor, world.asset, 10, 10).await.unwrap();
    let seen = timeout(Duration::from_secs(2), async {
        while desk.store().snapshot().get(&created.order_address).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(seen.is_ok(), "store should pick up the created order");

    desk.approve(&admin, created.order_address).await.unwrap();
    let approved = timeout(Duration::from_secs(2), async {
        loop {
            if desk.store().get_by_status(OrderStatus::Approved).len() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(approved.is_ok(), "store should pick up the approval");
}

#[tokio::test]
async fn test_failed_operation_does_not_refresh() {
    let world = World::with_config(|c| c.refresh.auto_refresh = true);
    let investor = world.investor(10);
    let desk = world.desk();

    assert!(desk.create(&investor, world.asset, 10, 10).await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(desk.store().snapshot().fetched_at().is_none());
}
