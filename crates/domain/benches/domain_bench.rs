use common::AggregateId;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, CommandContext, CommitReservation, DomainEvent, InitializeInventory,
    InventoryEvent, InventoryService, OrderId, ProductInventory, ReservationId, ReserveStock,
    StockLocation,
};
use event_store::{AppendOptions, EventEnvelope, InMemoryEventStore, Version, store::EventStore};

fn make_envelope(aggregate_id: AggregateId, version: i64, event: &InventoryEvent) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type(ProductInventory::AGGREGATE_TYPE)
        .event_type(event.event_type())
        .version(Version::new(version))
        .payload(event)
        .unwrap()
        .build()
        .unwrap()
}

fn location() -> StockLocation {
    StockLocation::new("SKU-BENCH", "WH-01")
}

fn bench_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = InventoryService::new(InMemoryEventStore::new());
    rt.block_on(async {
        service
            .initialize_inventory(
                InitializeInventory::new(location(), u32::MAX / 2),
                &CommandContext::new(),
            )
            .await
            .unwrap()
    });

    c.bench_function("domain/reserve_stock", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cmd =
                    ReserveStock::new(ReservationId::new(), OrderId::new(), location(), 1);
                service
                    .reserve_stock(cmd, &CommandContext::new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_reserve_commit_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/initialize_reserve_commit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let service = InventoryService::new(InMemoryEventStore::new());
                let ctx = CommandContext::new();
                service
                    .initialize_inventory(InitializeInventory::new(location(), 10), &ctx)
                    .await
                    .unwrap();
                let cmd = ReserveStock::for_order_line(OrderId::new(), location(), 4);
                let reservation_id = cmd.reservation_id;
                service.reserve_stock(cmd, &ctx).await.unwrap();
                service
                    .commit_reservation(CommitReservation::new(reservation_id, location()), &ctx)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/replay");

    for count in [10, 100, 1000] {
        let aggregate_id = location().aggregate_id();
        let mut events = vec![InventoryEvent::inventory_initialized(&location(), count)];
        for _ in 1..count {
            events.push(InventoryEvent::stock_reserved(
                ReservationId::new(),
                OrderId::new(),
                1,
                None,
            ));
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter(|| {
                let mut inventory = ProductInventory::default();
                inventory.apply_events(events.iter().cloned());
                inventory
            });
        });

        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = InMemoryEventStore::new();
        let envelopes: Vec<_> = events
            .iter()
            .enumerate()
            .map(|(i, event)| make_envelope(aggregate_id, i as i64 + 1, event))
            .collect();
        rt.block_on(async {
            store
                .append(envelopes, AppendOptions::expect_new())
                .await
                .unwrap()
        });
        let service = InventoryService::new(store);

        group.bench_with_input(
            BenchmarkId::new("load_from_store", count),
            &count,
            |b, _| {
                b.iter(|| {
                    rt.block_on(async { service.get_inventory(&location()).await.unwrap() })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_reserve, bench_reserve_commit_cycle, bench_replay);
criterion_main!(benches);
