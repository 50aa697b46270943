//! Integration tests for the inventory service.
//!
//! These run the full command cycle against the in-memory event store:
//! replay, decision, conditional append and retry on conflicts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{
    Aggregate, CommandContext, CommitReservation, DomainError, ExpireReservations, FulfillAllocation,
    InitializeInventory, InventoryConfig, InventoryError, InventoryEvent, InventoryService,
    OrderId, ReceiveStock, ReleaseReservation, ReservationId, ReservationStatus, ReserveStock,
    Restock, RetryPolicy, StockLocation,
};
use event_store::{EventStore, InMemoryEventStore, Version};

fn location() -> StockLocation {
    StockLocation::new("SKU-001", "WH-01")
}

fn create_service() -> InventoryService<InMemoryEventStore> {
    InventoryService::new(InMemoryEventStore::new())
}

async fn initialized(quantity: u32) -> InventoryService<InMemoryEventStore> {
    let service = create_service();
    service
        .initialize_inventory(
            InitializeInventory::new(location(), quantity),
            &CommandContext::new(),
        )
        .await
        .unwrap();
    service
}

async fn reserve(
    service: &InventoryService<InMemoryEventStore>,
    quantity: u32,
) -> Result<ReservationId, DomainError> {
    let cmd = ReserveStock::new(ReservationId::new(), OrderId::new(), location(), quantity);
    let reservation_id = cmd.reservation_id;
    service
        .reserve_stock(cmd, &CommandContext::new())
        .await
        .map(|_| reservation_id)
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn reserve_then_commit() {
        let service = initialized(10).await;

        let reservation_id = reserve(&service, 6).await.unwrap();
        let inventory = service.get_inventory(&location()).await.unwrap().unwrap();
        assert_eq!(inventory.available(), 4);
        assert_eq!(inventory.reserved(), 6);

        let result = service
            .commit_reservation(
                CommitReservation::new(reservation_id, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        let inventory = result.aggregate;
        assert_eq!(inventory.reserved(), 0);
        assert_eq!(inventory.committed(), 6);
        assert_eq!(inventory.available() + inventory.committed(), 10);
        assert_eq!(result.new_version, Version::new(3));
    }

    #[tokio::test]
    async fn reserve_then_release() {
        let service = initialized(10).await;
        let reservation_id = reserve(&service, 5).await.unwrap();

        let result = service
            .release_reservation(
                ReleaseReservation::new(reservation_id, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.aggregate.available(), 10);
        assert_eq!(result.aggregate.reserved(), 0);
        assert_eq!(result.aggregate.reservation_status(reservation_id), None);
    }

    #[tokio::test]
    async fn over_reservation_leaves_state_unchanged() {
        let service = initialized(3).await;
        let before = service.get_inventory(&location()).await.unwrap().unwrap();

        let err = reserve(&service, 4).await.unwrap_err();
        assert_eq!(
            err.as_inventory(),
            Some(&InventoryError::InsufficientStock {
                requested: 4,
                available: 3
            })
        );

        let after = service.get_inventory(&location()).await.unwrap().unwrap();
        assert_eq!(after.version(), before.version());
        assert_eq!(after.available(), 3);
        assert_eq!(after.reserved(), 0);
    }

    #[tokio::test]
    async fn commit_of_unknown_reservation_fails() {
        let service = initialized(3).await;
        let unknown = ReservationId::new();

        let err = service
            .commit_reservation(
                CommitReservation::new(unknown, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.as_inventory(),
            Some(&InventoryError::ReservationNotFound(unknown))
        );
    }

    #[tokio::test]
    async fn release_of_committed_reservation_fails() {
        let service = initialized(3).await;
        let reservation_id = reserve(&service, 2).await.unwrap();
        service
            .commit_reservation(
                CommitReservation::new(reservation_id, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        let err = service
            .release_reservation(
                ReleaseReservation::new(reservation_id, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.as_inventory(),
            Some(&InventoryError::AlreadyCommitted(reservation_id))
        );
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let service = initialized(3).await;

        let err = service
            .initialize_inventory(
                InitializeInventory::new(location(), 5),
                &CommandContext::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.as_inventory(),
            Some(&InventoryError::AlreadyExists(location()))
        );
    }

    #[tokio::test]
    async fn commands_before_initialize_fail() {
        let service = create_service();

        let err = service
            .receive_stock(ReceiveStock::new(location(), 5), &CommandContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_inventory(),
            Some(&InventoryError::InventoryNotInitialized)
        );
        assert!(service.get_inventory(&location()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_and_restock_grow_available() {
        let service = initialized(2).await;
        service
            .receive_stock(ReceiveStock::new(location(), 5), &CommandContext::new())
            .await
            .unwrap();
        let result = service
            .restock(Restock::new(location(), 3), &CommandContext::new())
            .await
            .unwrap();

        assert_eq!(result.aggregate.available(), 10);
        assert_eq!(result.aggregate.total_on_hand(), 10);
    }

    #[tokio::test]
    async fn fulfilled_allocation_leaves_the_warehouse() {
        let service = initialized(10).await;
        let reservation_id = reserve(&service, 4).await.unwrap();
        service
            .commit_reservation(
                CommitReservation::new(reservation_id, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        let result = service
            .fulfill_allocation(
                FulfillAllocation::new(reservation_id, location()),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.aggregate.committed(), 0);
        assert_eq!(result.aggregate.total_on_hand(), 6);
        assert!(matches!(
            result.events.as_slice(),
            [InventoryEvent::AllocationFulfilled(_)]
        ));
    }

    #[tokio::test]
    async fn inventory_ids_lists_initialized_streams() {
        let service = initialized(1).await;
        let other = StockLocation::new("SKU-002", "WH-01");
        service
            .initialize_inventory(InitializeInventory::new(other.clone(), 1), &CommandContext::new())
            .await
            .unwrap();

        let mut ids = service.inventory_ids().await.unwrap();
        ids.sort();
        let mut expected = vec![location().aggregate_id(), other.aggregate_id()];
        expected.sort();
        assert_eq!(ids, expected);
    }
}

mod invariants {
    use super::*;

    /// Deterministic pseudo-random walk over reserve, commit and release.
    #[tokio::test]
    async fn total_is_constant_across_reservation_commands() {
        let service = initialized(50).await;
        let mut soft_holds: Vec<ReservationId> = Vec::new();
        let mut seed: u64 = 0x5eed;

        for _ in 0..200 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let choice = (seed >> 33) % 3;
            let quantity = ((seed >> 40) % 7) as u32 + 1;
            let ctx = CommandContext::new();

            match choice {
                0 => {
                    if let Ok(reservation_id) = reserve(&service, quantity).await {
                        soft_holds.push(reservation_id);
                    }
                }
                1 if !soft_holds.is_empty() => {
                    let reservation_id = soft_holds.remove(0);
                    service
                        .commit_reservation(CommitReservation::new(reservation_id, location()), &ctx)
                        .await
                        .unwrap();
                }
                _ => {
                    if let Some(reservation_id) = soft_holds.pop() {
                        service
                            .release_reservation(
                                ReleaseReservation::new(reservation_id, location()),
                                &ctx,
                            )
                            .await
                            .unwrap();
                    }
                }
            }

            let inventory = service.get_inventory(&location()).await.unwrap().unwrap();
            assert_eq!(
                u64::from(inventory.available())
                    + u64::from(inventory.reserved())
                    + u64::from(inventory.committed()),
                50
            );
        }
    }

    #[tokio::test]
    async fn snapshot_and_replay_agree() {
        let store = InMemoryEventStore::new();
        let service = InventoryService::new(store.clone());
        service
            .initialize_inventory(InitializeInventory::new(location(), 500), &CommandContext::new())
            .await
            .unwrap();

        for _ in 0..120 {
            let reservation_id = reserve(&service, 1).await.unwrap();
            service
                .commit_reservation(
                    CommitReservation::new(reservation_id, location()),
                    &CommandContext::new(),
                )
                .await
                .unwrap();
        }

        let id = location().aggregate_id();
        assert!(store.get_snapshot(id).await.unwrap().is_some());

        let loaded = service.get_inventory(&location()).await.unwrap().unwrap();
        assert_eq!(loaded.available(), 380);
        assert_eq!(loaded.committed(), 120);
        assert_eq!(loaded.version(), Version::new(241));
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_reservations_race_for_the_last_unit() {
        let service = Arc::new(initialized(1).await);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { reserve(&service, 1).await })
            })
            .collect();

        let mut successes = 0;
        let mut rejections = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(DomainError::Inventory(InventoryError::InsufficientStock { .. })) => {
                    rejections += 1
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(rejections, 1);

        let inventory = service.get_inventory(&location()).await.unwrap().unwrap();
        assert_eq!(inventory.available(), 0);
        assert_eq!(inventory.reserved(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_receipts_are_all_applied() {
        let config = InventoryConfig::default().with_command_retry(RetryPolicy::new(50));
        let service = Arc::new(InventoryService::with_config(
            InMemoryEventStore::new(),
            config,
        ));
        service
            .initialize_inventory(InitializeInventory::new(location(), 0), &CommandContext::new())
            .await
            .unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .receive_stock(ReceiveStock::new(location(), 1), &CommandContext::new())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let inventory = service.get_inventory(&location()).await.unwrap().unwrap();
        assert_eq!(inventory.available(), 10);
        assert_eq!(inventory.version(), Version::new(11));
    }
}

mod expiry {
    use super::*;

    #[tokio::test]
    async fn expired_reservations_return_stock() {
        let config = InventoryConfig::default().with_reservation_ttl(Duration::from_secs(60));
        let service = InventoryService::with_config(InMemoryEventStore::new(), config);
        service
            .initialize_inventory(InitializeInventory::new(location(), 10), &CommandContext::new())
            .await
            .unwrap();
        let reservation_id = reserve(&service, 4).await.unwrap();

        let inventory = service.get_inventory(&location()).await.unwrap().unwrap();
        assert!(inventory.expiry_of(reservation_id).is_some());

        let not_yet = service
            .expire_reservations(
                ExpireReservations::new(location(), Utc::now()),
                &CommandContext::new(),
            )
            .await
            .unwrap();
        assert!(not_yet.events.is_empty());

        let later = Utc::now() + chrono::Duration::seconds(120);
        let result = service
            .expire_reservations(
                ExpireReservations::new(location(), later),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.aggregate.available(), 10);
        assert_eq!(result.aggregate.reservation_status(reservation_id), None);
    }

    #[tokio::test]
    async fn without_ttl_nothing_expires() {
        let service = initialized(10).await;
        let reservation_id = reserve(&service, 4).await.unwrap();

        let far_future = Utc::now() + chrono::Duration::days(365);
        let result = service
            .expire_reservations(
                ExpireReservations::new(location(), far_future),
                &CommandContext::new(),
            )
            .await
            .unwrap();

        assert!(result.events.is_empty());
        assert_eq!(
            result.aggregate.reservation_status(reservation_id),
            Some(ReservationStatus::Reserved)
        );
    }
}

mod idempotency {
    use super::*;

    #[tokio::test]
    async fn repeated_key_replays_the_first_acceptance() {
        let service = initialized(10).await;
        let cmd = ReserveStock::for_order_line(OrderId::new(), location(), 3);
        let ctx = CommandContext::new().with_idempotency_key("order-1:SKU-001");

        let first = service.reserve_stock(cmd.clone(), &ctx).await.unwrap();
        let again = service.reserve_stock(cmd, &ctx).await.unwrap();

        assert_eq!(first.events, again.events);
        assert_eq!(first.new_version, again.new_version);
        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(again.aggregate.reserved(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_of_one_key_share_the_acceptance() {
        let service = Arc::new(initialized(10).await);
        let cmd = ReserveStock::for_order_line(OrderId::new(), location(), 3);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                let cmd = cmd.clone();
                tokio::spawn(async move {
                    let ctx = CommandContext::new().with_idempotency_key("order-4:SKU-001");
                    service.reserve_stock(cmd, &ctx).await
                })
            })
            .collect();

        let mut decided = 0;
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.events.len(), 1);
            if !result.replayed {
                decided += 1;
            }
        }

        assert_eq!(decided, 1);
        let inventory = service.get_inventory(&location()).await.unwrap().unwrap();
        assert_eq!(inventory.reserved(), 3);
        assert_eq!(inventory.available(), 7);
    }

    #[tokio::test]
    async fn repeated_key_replays_the_first_rejection() {
        let service = initialized(2).await;
        let cmd = ReserveStock::for_order_line(OrderId::new(), location(), 5);
        let ctx = CommandContext::new().with_idempotency_key("order-2:SKU-001");

        let first = service.reserve_stock(cmd.clone(), &ctx).await.unwrap_err();

        // Enough stock now, but the recorded outcome still applies.
        service
            .receive_stock(ReceiveStock::new(location(), 10), &CommandContext::new())
            .await
            .unwrap();
        let again = service.reserve_stock(cmd, &ctx).await.unwrap_err();

        assert_eq!(first.as_inventory(), again.as_inventory());
    }

    #[tokio::test]
    async fn without_idempotency_a_redelivery_is_a_duplicate() {
        let config = InventoryConfig::default().with_idempotency(false);
        let service = InventoryService::with_config(InMemoryEventStore::new(), config);
        service
            .initialize_inventory(InitializeInventory::new(location(), 10), &CommandContext::new())
            .await
            .unwrap();
        let cmd = ReserveStock::for_order_line(OrderId::new(), location(), 3);
        let ctx = CommandContext::new().with_idempotency_key("order-3:SKU-001");

        service.reserve_stock(cmd.clone(), &ctx).await.unwrap();
        let err = service.reserve_stock(cmd.clone(), &ctx).await.unwrap_err();

        assert_eq!(
            err.as_inventory(),
            Some(&InventoryError::DuplicateReservation(cmd.reservation_id))
        );
    }
}
