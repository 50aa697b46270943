use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    DomainEvent, InventoryEvent, OrderId, ProductInventory, ReservationId, Sku, StockLocation,
};
use event_store::{
    AppendOptions, EventEnvelope, GlobalPosition, InMemoryEventStore, Version, store::EventStore,
};
use projections::{Projection, ProjectionProcessor, ReservationsView, StockLevelsView};

fn make_envelope(location: &StockLocation, version: i64, event: &InventoryEvent) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(location.aggregate_id())
        .aggregate_type(ProductInventory::AGGREGATE_TYPE)
        .event_type(DomainEvent::event_type(event))
        .version(Version::new(version))
        .payload(event)
        .unwrap()
        .build()
        .unwrap()
}

/// Populate a store with N inventories, each with 3 events (initialized + reserved + committed).
async fn populate_store(store: &InMemoryEventStore, n: usize) {
    for i in 0..n {
        let location = StockLocation::new(format!("SKU-{i:05}"), "WH-01");
        let reservation_id = ReservationId::new();
        let order_id = OrderId::new();

        let events = vec![
            make_envelope(
                &location,
                1,
                &InventoryEvent::inventory_initialized(&location, 100),
            ),
            make_envelope(
                &location,
                2,
                &InventoryEvent::stock_reserved(reservation_id, order_id, 5, None),
            ),
            make_envelope(
                &location,
                3,
                &InventoryEvent::reservation_committed(reservation_id, order_id, 5),
            ),
        ];
        store
            .append(events, AppendOptions::expect_new())
            .await
            .unwrap();
    }
}

fn bench_catch_up(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    for inventories in [100, 1000] {
        let store = InMemoryEventStore::new();
        rt.block_on(populate_store(&store, inventories));

        c.bench_function(
            &format!("projections/catch_up_{}_events", inventories * 3),
            |b| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut processor = ProjectionProcessor::new(store.clone());
                        processor.register(Arc::new(StockLevelsView::new()));
                        processor.register(Arc::new(ReservationsView::new()));
                        processor.run_catch_up().await.unwrap();
                    });
                });
            },
        );
    }
}

fn bench_process_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let view = StockLevelsView::new();
    let location = StockLocation::new("SKU-BENCH", "WH-01");

    let mut init = make_envelope(
        &location,
        1,
        &InventoryEvent::inventory_initialized(&location, 10),
    );
    init.position = GlobalPosition::new(1);
    rt.block_on(view.handle(&init)).unwrap();

    let mut position = 1;
    c.bench_function("projections/process_single_event", |b| {
        b.iter(|| {
            position += 1;
            let mut envelope =
                make_envelope(&location, position, &InventoryEvent::stock_received(1));
            envelope.position = GlobalPosition::new(position);
            rt.block_on(view.handle(&envelope)).unwrap();
        });
    });
}

fn bench_query_for_sku(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let view = StockLevelsView::new();

    rt.block_on(async {
        populate_store(&store, 1000).await;
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Arc::new(view.clone()));
        processor.run_catch_up().await.unwrap();
    });

    let sku = Sku::new("SKU-00042");
    c.bench_function("projections/available_for_sku_1000_locations", |b| {
        b.iter(|| rt.block_on(view.available_for_sku(&sku)));
    });
}

fn bench_rebuild(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    rt.block_on(populate_store(&store, 100));

    let mut processor = ProjectionProcessor::new(store);
    processor.register(Arc::new(StockLevelsView::new()));
    processor.register(Arc::new(ReservationsView::new()));

    c.bench_function("projections/rebuild_300_events", |b| {
        b.iter(|| rt.block_on(processor.rebuild_all()).unwrap());
    });
}

criterion_group!(
    benches,
    bench_catch_up,
    bench_process_single_event,
    bench_query_for_sku,
    bench_rebuild,
);
criterion_main!(benches);
