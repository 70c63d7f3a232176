use chrono::{Duration, Utc};

use crate::common::{target, Harness};

#[tokio::test]
async fn due_targets_skip_inactive_and_order_unset_first() {
    let h = Harness::new(0, 0, 10);
    let now = Utc::now();

    let mut oldest = target("https://a.example/1");
    oldest.next_scrape = Some(now - Duration::hours(3));
    let mut recent = target("https://a.example/2");
    recent.next_scrape = Some(now - Duration::minutes(5));
    let never = target("https://b.example/1");
    let mut inactive = target("https://c.example/1");
    inactive.active = false;
    let mut future = target("https://d.example/1");
    future.next_scrape = Some(now + Duration::hours(1));

    let expected = vec![never.id, oldest.id, recent.id];
    for t in [recent, inactive, future, oldest, never] {
        h.targets.insert(t);
    }

    let due = h.scheduler.due_targets(10).await.unwrap();
    assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), expected);
    assert!(due.iter().all(|t| t.active));
    assert!(due.windows(2).all(|w| match (w[0].next_scrape, w[1].next_scrape) {
        (Some(a), Some(b)) => a <= b,
        (Some(_), None) => false,
        _ => true,
    }));

    let capped = h.scheduler.due_targets(2).await.unwrap();
    assert_eq!(capped.len(), 2);
}

#[tokio::test]
async fn explicit_update_is_idempotent() {
    let h = Harness::new(0, 0, 10);
    let t = target("https://a.example/1");
    let id = t.id;
    h.targets.insert(t);

    let x = Utc::now() + Duration::minutes(30);
    h.scheduler.update_schedule(id, None, Some(x)).await.unwrap();
    let once = h.targets.get(id);
    h.scheduler.update_schedule(id, None, Some(x)).await.unwrap();
    let twice = h.targets.get(id);

    assert_eq!(once, twice);
    assert_eq!(twice.next_scrape, Some(x));
    assert_eq!(twice.last_scraped, None);
}

#[tokio::test]
async fn derived_update_uses_override() {
    let h = Harness::new(0, 0, 10);
    let mut t = target("https://a.example/1");
    t.frequency_override = Some("PT12H".into());
    let id = t.id;
    h.targets.insert(t);

    let last = Utc::now();
    h.scheduler.update_schedule(id, Some(last), None).await.unwrap();

    let stored = h.targets.get(id);
    assert_eq!(stored.last_scraped, Some(last));
    assert_eq!(stored.next_scrape, Some(last + Duration::hours(12)));
}

#[tokio::test]
async fn update_for_deleted_target_is_tolerated() {
    let h = Harness::new(0, 0, 10);
    let result = h
        .scheduler
        .update_schedule(uuid::Uuid::new_v4(), Some(Utc::now()), None)
        .await;
    tokio_test::assert_ok!(result);
    assert!(h.events().is_empty());
}
