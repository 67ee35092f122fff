use std::sync::Arc;
use std::time::Duration;

use bus::JsonCodec;
use criterion::{Criterion, criterion_group, criterion_main};
use saga_store::{
    InMemorySagaStore, InstanceFilter, InstanceId, InstanceMutex, LocalInstanceMutex,
    SagaInstance, SagaState, SagaStore,
};
use tokio_util::sync::CancellationToken;

fn make_instance(id: InstanceId) -> SagaInstance {
    SagaInstance::new(
        id,
        "OrderSaga",
        serde_json::json!({
            "order_id": "00000000-0000-0000-0000-000000000001",
            "paid": false,
            "shipped": false
        }),
    )
}

fn store() -> InMemorySagaStore {
    InMemorySagaStore::new(Arc::new(JsonCodec::new()))
}

fn bench_save_new_instance(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga_store/save_new_instance", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = store();
                store.save(&make_instance(InstanceId::new())).await.unwrap();
            });
        });
    });
}

fn bench_load_modify_save(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = store();
    let id = InstanceId::new();
    rt.block_on(async {
        store.save(&make_instance(id.clone())).await.unwrap();
    });

    c.bench_function("saga_store/load_modify_save", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut instance = store.load(&id).await.unwrap().unwrap();
                instance.status = SagaState::Running;
                store.save(&instance).await.unwrap();
            });
        });
    });
}

fn bench_list_by_status(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = store();
    rt.block_on(async {
        for i in 0..100 {
            let mut instance = make_instance(InstanceId::new());
            if i % 2 == 0 {
                instance.status = SagaState::Completed;
            }
            store.save(&instance).await.unwrap();
        }
    });

    c.bench_function("saga_store/list_100_by_status", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .list(InstanceFilter::new().status(SagaState::Completed))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_local_mutex_uncontended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mutex = LocalInstanceMutex::new();
    let id = InstanceId::new();
    let cancel = CancellationToken::new();

    c.bench_function("saga_store/local_mutex_acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let lock = mutex
                    .acquire(&id, Duration::from_secs(1), &cancel)
                    .await
                    .unwrap();
                mutex.release(lock).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_save_new_instance,
    bench_load_modify_save,
    bench_list_by_status,
    bench_local_mutex_uncontended,
);
criterion_main!(benches);
