use cutover_store::{
    MigrationEvent, MigrationEventType, MigrationRecord, MigrationStatus, Store, StoreError,
};
use futures_util::future::join_all;
use serde_json::json;

pub async fn test_create(store: &Store) -> anyhow::Result<()> {
    let record = MigrationRecord::new("ws-create", "leads", "leads_v2", 500);

    let created = store
        .create(
            record.clone(),
            MigrationEvent::new("ws-create", MigrationEventType::MigrationCreated),
        )
        .await?;

    assert_eq!(created.version, 1);

    let stored = store.get("ws-create").await?.unwrap();
    assert_eq!(stored.status, MigrationStatus::Idle);
    assert_eq!(stored.source_table, "leads");
    assert_eq!(stored.target_table, "leads_v2");
    assert_eq!(stored.backfill_batch_size, 500);
    assert_eq!(stored.version, 1);

    let duplicate = store
        .create(
            record,
            MigrationEvent::new("ws-create", MigrationEventType::MigrationCreated),
        )
        .await;

    assert!(matches!(
        duplicate,
        Err(StoreError::UnexpectedOriginalVersion)
    ));

    assert!(store.get("ws-unknown").await?.is_none());

    Ok(())
}

pub async fn test_concurrency(store: &Store) -> anyhow::Result<()> {
    let record = store
        .create(
            MigrationRecord::new("ws-race", "leads", "leads_v2", 100),
            MigrationEvent::new("ws-race", MigrationEventType::MigrationCreated),
        )
        .await?;

    let mut first = record.clone();
    first.backfill_processed_rows = 10;

    let mut second = record.clone();
    second.backfill_processed_rows = 20;

    let results = join_all(vec![
        store.save(first, record.version, vec![]),
        store.save(second, record.version, vec![]),
    ])
    .await;

    let succeeded = results.iter().filter(|res| res.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .any(|res| matches!(res, Err(StoreError::UnexpectedOriginalVersion))));

    let stored = store.get("ws-race").await?.unwrap();
    assert_eq!(stored.version, 2);
    assert!(stored.backfill_processed_rows == 10 || stored.backfill_processed_rows == 20);

    Ok(())
}

pub async fn test_delete(store: &Store) -> anyhow::Result<()> {
    let record = store
        .create(
            MigrationRecord::new("ws-delete", "leads", "leads_v2", 100),
            MigrationEvent::new("ws-delete", MigrationEventType::MigrationCreated),
        )
        .await?;

    let stale = store
        .delete(
            "ws-delete",
            record.version + 1,
            MigrationEvent::new("ws-delete", MigrationEventType::Deleted),
        )
        .await;

    assert!(matches!(stale, Err(StoreError::UnexpectedOriginalVersion)));

    store
        .delete(
            "ws-delete",
            record.version,
            MigrationEvent::new("ws-delete", MigrationEventType::Deleted),
        )
        .await?;

    assert!(store.get("ws-delete").await?.is_none());

    let events = store.events("ws-delete").await?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, MigrationEventType::Deleted);

    Ok(())
}

pub async fn test_events(store: &Store) -> anyhow::Result<()> {
    store
        .create(
            MigrationRecord::new("ws-events", "leads", "leads_v2", 100),
            MigrationEvent::new("ws-events", MigrationEventType::MigrationCreated),
        )
        .await?;

    for n in 0..5 {
        store
            .append(
                MigrationEvent::new("ws-events", MigrationEventType::Error)
                    .detail(json!({ "message": format!("boom {n}") }))?,
            )
            .await?;
    }

    store
        .append(MigrationEvent::new("ws-other", MigrationEventType::Error))
        .await?;

    let events = store.events("ws-events").await?;
    assert_eq!(events.len(), 6);
    assert_eq!(events[0].event_type, MigrationEventType::MigrationCreated);
    assert!(events
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));

    let recent = store.recent_events("ws-events", 2).await?;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].detail, json!({ "message": "boom 4" }));
    assert_eq!(recent[0].detail, json!({ "message": "boom 3" }));

    Ok(())
}

pub async fn test_list(store: &Store) -> anyhow::Result<()> {
    let first = store
        .create(
            MigrationRecord::new("ws-list-1", "leads", "leads_v2", 100),
            MigrationEvent::new("ws-list-1", MigrationEventType::MigrationCreated),
        )
        .await?;

    store
        .create(
            MigrationRecord::new("ws-list-2", "deals", "deals_v2", 100),
            MigrationEvent::new("ws-list-2", MigrationEventType::MigrationCreated),
        )
        .await?;

    let mut failed = first.clone();
    failed.status = MigrationStatus::Failed;
    store.save(failed, first.version, vec![]).await?;

    let all = store.list(None).await?;
    assert!(all.iter().any(|r| r.workspace_id == "ws-list-1"));
    assert!(all.iter().any(|r| r.workspace_id == "ws-list-2"));

    let failed = store.list(Some(MigrationStatus::Failed)).await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].workspace_id, "ws-list-1");

    let idle = store.list(Some(MigrationStatus::Idle)).await?;
    assert!(idle.iter().all(|r| r.status == MigrationStatus::Idle));
    assert!(idle.iter().any(|r| r.workspace_id == "ws-list-2"));

    Ok(())
}
