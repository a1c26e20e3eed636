#![allow(clippy::needless_return)]
mod store;

use cutover_store::MemoryStore;

#[tokio_shared_rt::test]
async fn create() {
    let store = MemoryStore::create();
    store::test_create(&store).await.unwrap();
}

#[tokio_shared_rt::test]
async fn concurrency() {
    let store = MemoryStore::create();
    store::test_concurrency(&store).await.unwrap();
}

#[tokio_shared_rt::test]
async fn delete() {
    let store = MemoryStore::create();
    store::test_delete(&store).await.unwrap();
}

#[tokio_shared_rt::test]
async fn events() {
    let store = MemoryStore::create();
    store::test_events(&store).await.unwrap();
}

#[tokio_shared_rt::test]
async fn list() {
    let store = MemoryStore::create();
    store::test_list(&store).await.unwrap();
}
