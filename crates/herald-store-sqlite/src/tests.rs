//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use herald_core::{
  notification::{
    DedupKey, NotificationKind, NotificationStatus, ScheduledNotification,
    StatusUpdate,
  },
  recurrence::Recurrence,
  store::{NotificationQuery, ScheduleStore},
  subject::{
    Broadcast, BroadcastStatus, Customer, Payment, Subject, SubjectStatus,
  },
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn subject(tenant_id: Uuid, customer_id: Option<Uuid>, due: NaiveDate) -> Subject {
  Subject {
    subject_id: Uuid::new_v4(),
    tenant_id,
    customer_id,
    reference: "INV-1".into(),
    amount_minor: Some(12_500),
    currency: "EUR".into(),
    due_date: Some(due),
    status: SubjectStatus::Open,
    fields: BTreeMap::from([("plan".to_owned(), "Gold".to_owned())]),
  }
}

fn customer(tenant_id: Uuid) -> Customer {
  Customer {
    customer_id: Uuid::new_v4(),
    tenant_id,
    name: "Ana".into(),
    chat_ref: Some("chat-ana".into()),
  }
}

fn row(tenant_id: Uuid, subject_id: Uuid, offset_days: i32) -> ScheduledNotification {
  let anchor = date(2024, 3, 10);
  let key = DedupKey::new(subject_id, NotificationKind::for_offset(offset_days), offset_days);
  let scheduled_for = at(2024, 3, 10, 9) + Duration::days(i64::from(offset_days));
  ScheduledNotification::pending(tenant_id, key, anchor, scheduled_for, at(2024, 3, 1, 0))
}

// ─── Tenants and settings ────────────────────────────────────────────────────

#[tokio::test]
async fn list_tenants_returns_all() {
  let s = store().await;
  let a = s.add_tenant("A").await.unwrap();
  let b = s.add_tenant("B").await.unwrap();

  let tenants = s.list_tenants().await.unwrap();
  assert_eq!(tenants.len(), 2);
  assert!(tenants.contains(&a));
  assert!(tenants.contains(&b));
}

#[tokio::test]
async fn tenant_settings_filters_keys_and_overwrites() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  s.put_setting(t, "payment_reminder.enabled", "false").await.unwrap();
  s.put_setting(t, "payment_reminder.enabled", "true").await.unwrap();
  s.put_setting(t, "unrelated", "x").await.unwrap();

  let settings = s
    .tenant_settings(t, vec!["payment_reminder.enabled".into(), "missing".into()])
    .await
    .unwrap();
  assert_eq!(settings.len(), 1);
  assert_eq!(settings["payment_reminder.enabled"], "true");
}

// ─── Subjects ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_and_get_subject() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  let c = customer(t);
  s.add_customer(&c).await.unwrap();
  let item = subject(t, Some(c.customer_id), date(2024, 3, 10));
  s.put_subject(&item).await.unwrap();

  let fetched = s.get_subject(item.subject_id).await.unwrap().unwrap();
  assert_eq!(fetched, item);
  assert!(s.get_subject(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn put_subject_overwrites_existing() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  let first = customer(t);
  let second = customer(t);
  s.add_customer(&first).await.unwrap();
  s.add_customer(&second).await.unwrap();

  let mut item = subject(t, Some(first.customer_id), date(2024, 3, 10));
  s.put_subject(&item).await.unwrap();
  item.customer_id = Some(second.customer_id);
  item.due_date = Some(date(2024, 4, 1));
  s.put_subject(&item).await.unwrap();

  assert_eq!(s.get_subject(item.subject_id).await.unwrap().unwrap(), item);
}

#[tokio::test]
async fn upcoming_subjects_respects_window_and_tenant() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  let other = s.add_tenant("B").await.unwrap();

  let inside = subject(t, None, date(2024, 3, 10));
  let edge = subject(t, None, date(2024, 3, 20));
  let outside = subject(t, None, date(2024, 4, 30));
  let foreign = subject(other, None, date(2024, 3, 10));
  let mut undated = subject(t, None, date(2024, 3, 10));
  undated.due_date = None;
  for item in [&inside, &edge, &outside, &foreign, &undated] {
    s.put_subject(item).await.unwrap();
  }

  let found = s
    .upcoming_subjects(t, date(2024, 3, 1), date(2024, 3, 20))
    .await
    .unwrap();
  let ids: Vec<_> = found.iter().map(|x| x.subject_id).collect();
  assert_eq!(ids, vec![inside.subject_id, edge.subject_id]);
}

#[tokio::test]
async fn terminal_subjects_covers_items_and_broadcasts() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();

  let open = subject(t, None, date(2024, 3, 10));
  let paid = subject(t, None, date(2024, 3, 10));
  s.put_subject(&open).await.unwrap();
  s.put_subject(&paid).await.unwrap();
  assert!(s.set_subject_status(paid.subject_id, SubjectStatus::Paid).await.unwrap());

  let broadcast = Broadcast {
    broadcast_id:  Uuid::new_v4(),
    tenant_id:     t,
    name:          "Group".into(),
    chat_ref:      "chat-group".into(),
    message:       "Hello".into(),
    image_urls:    vec!["https://img/1.png".into()],
    first_send_at: at(2024, 1, 1, 9),
    recurrence:    Recurrence::Weekly,
    status:        BroadcastStatus::Active,
  };
  s.add_broadcast(&broadcast).await.unwrap();
  s.set_broadcast_status(broadcast.broadcast_id, BroadcastStatus::Paused)
    .await
    .unwrap();

  let terminal = s
    .terminal_subjects(vec![
      open.subject_id,
      paid.subject_id,
      broadcast.broadcast_id,
      Uuid::new_v4(),
    ])
    .await
    .unwrap();
  assert_eq!(terminal.len(), 2);
  assert!(terminal.contains(&paid.subject_id));
  assert!(terminal.contains(&broadcast.broadcast_id));
}

#[tokio::test]
async fn active_broadcasts_skip_paused() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  let mut broadcast = Broadcast {
    broadcast_id:  Uuid::new_v4(),
    tenant_id:     t,
    name:          "Group".into(),
    chat_ref:      "chat-group".into(),
    message:       "Hello".into(),
    image_urls:    Vec::new(),
    first_send_at: at(2024, 1, 1, 9),
    recurrence:    Recurrence::None,
    status:        BroadcastStatus::Active,
  };
  s.add_broadcast(&broadcast).await.unwrap();
  let active_id = broadcast.broadcast_id;

  broadcast.broadcast_id = Uuid::new_v4();
  broadcast.status = BroadcastStatus::Paused;
  s.add_broadcast(&broadcast).await.unwrap();

  let active = s.active_broadcasts(t).await.unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].broadcast_id, active_id);
  assert_eq!(s.get_broadcast(broadcast.broadcast_id).await.unwrap(), Some(broadcast));
}

// ─── Customers, payments, templates ──────────────────────────────────────────

#[tokio::test]
async fn latest_payments_picks_most_recent_since() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  let ana = customer(t);
  let bob = customer(t);
  s.add_customer(&ana).await.unwrap();
  s.add_customer(&bob).await.unwrap();

  for paid_at in [at(2024, 3, 1, 0), at(2024, 3, 5, 0), at(2024, 2, 1, 0)] {
    s.record_payment(&Payment {
      payment_id: Uuid::new_v4(),
      tenant_id: t,
      customer_id: ana.customer_id,
      subject_id: None,
      amount_minor: 100,
      paid_at,
    })
    .await
    .unwrap();
  }
  s.record_payment(&Payment {
    payment_id:   Uuid::new_v4(),
    tenant_id:    t,
    customer_id:  bob.customer_id,
    subject_id:   None,
    amount_minor: 100,
    paid_at:      at(2024, 1, 1, 0),
  })
  .await
  .unwrap();

  let latest = s
    .latest_payments(vec![ana.customer_id, bob.customer_id], at(2024, 2, 15, 0))
    .await
    .unwrap();
  assert_eq!(latest.len(), 1);
  assert_eq!(latest[&ana.customer_id], at(2024, 3, 5, 0));
}

#[tokio::test]
async fn customer_and_template_lookup() {
  let s = store().await;
  let t = s.add_tenant("A").await.unwrap();
  let c = customer(t);
  s.add_customer(&c).await.unwrap();
  assert_eq!(s.get_customer(c.customer_id).await.unwrap(), Some(c));

  s.put_template(t, "gentle", "Hi {{ customer_name }}").await.unwrap();
  assert_eq!(
    s.get_template(t, "gentle".into()).await.unwrap().as_deref(),
    Some("Hi {{ customer_name }}")
  );
  assert!(s.delete_template(t, "gentle").await.unwrap());
  assert!(s.get_template(t, "gentle".into()).await.unwrap().is_none());
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_if_absent_enforces_dedup() {
  let s = store().await;
  let t = Uuid::new_v4();
  let subject_id = Uuid::new_v4();

  let first = row(t, subject_id, -3);
  assert!(s.insert_if_absent(first.clone()).await.unwrap());
  assert!(!s.insert_if_absent(row(t, subject_id, -3)).await.unwrap());
  assert!(s.insert_if_absent(row(t, subject_id, 1)).await.unwrap());

  let all = s
    .list_notifications(NotificationQuery {
      subject_id: Some(subject_id),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].notification_id, first.notification_id);
  assert_eq!(all[0].offset_days, -3);
  assert_eq!(all[0].scheduled_for, first.scheduled_for);
}

#[tokio::test]
async fn cancelled_row_frees_its_slot() {
  let s = store().await;
  let t = Uuid::new_v4();
  let subject_id = Uuid::new_v4();

  let first = row(t, subject_id, 0);
  s.insert_if_absent(first.clone()).await.unwrap();
  assert!(
    s.update_status(StatusUpdate::cancelled(first.notification_id, "paid", at(2024, 3, 2, 0)))
      .await
      .unwrap()
  );

  assert!(s.blocking_dedup_keys(subject_id).await.unwrap().is_empty());
  assert!(s.insert_if_absent(row(t, subject_id, 0)).await.unwrap());
}

#[tokio::test]
async fn failed_rows_block_regeneration_but_not_requeue() {
  let s = store().await;
  let t = Uuid::new_v4();
  let subject_id = Uuid::new_v4();

  let first = row(t, subject_id, 1);
  s.insert_if_absent(first.clone()).await.unwrap();
  s.update_status(StatusUpdate::failed(
    first.notification_id,
    "boom",
    Some("chat-ana".into()),
    at(2024, 3, 11, 9),
  ))
  .await
  .unwrap();

  let keys = s.blocking_dedup_keys(subject_id).await.unwrap();
  assert!(keys.contains(&first.dedup_key()));

  let failed = s.get_notification(first.notification_id).await.unwrap().unwrap();
  assert_eq!(failed.status, NotificationStatus::Failed);
  assert_eq!(failed.last_error.as_deref(), Some("boom"));
  assert_eq!(failed.recipient_ref.as_deref(), Some("chat-ana"));

  let retry = failed.requeue(at(2024, 3, 12, 0)).unwrap();
  assert!(s.insert_if_absent(retry).await.unwrap());
}

#[tokio::test]
async fn update_status_only_moves_pending_rows() {
  let s = store().await;
  let first = row(Uuid::new_v4(), Uuid::new_v4(), 0);
  s.insert_if_absent(first.clone()).await.unwrap();
  let id = first.notification_id;

  assert!(
    s.update_status(StatusUpdate::sent(id, "chat".into(), at(2024, 3, 10, 9)))
      .await
      .unwrap()
  );
  assert!(
    !s.update_status(StatusUpdate::cancelled(id, "late", at(2024, 3, 10, 10)))
      .await
      .unwrap()
  );

  let stored = s.get_notification(id).await.unwrap().unwrap();
  assert_eq!(stored.status, NotificationStatus::Sent);
  assert_eq!(stored.updated_at, at(2024, 3, 10, 9));
}

#[tokio::test]
async fn update_status_rejects_pending_target() {
  let s = store().await;
  let update = StatusUpdate {
    notification_id: Uuid::new_v4(),
    status:          NotificationStatus::Pending,
    last_error:      None,
    recipient_ref:   None,
    at:              at(2024, 3, 10, 9),
  };
  assert!(matches!(
    s.update_status(update).await,
    Err(Error::NonTerminalUpdate(_))
  ));
}

#[tokio::test]
async fn claim_holds_a_lease() {
  let s = store().await;
  let first = row(Uuid::new_v4(), Uuid::new_v4(), 0);
  s.insert_if_absent(first.clone()).await.unwrap();
  let id = first.notification_id;
  let lease = Duration::minutes(5);
  let now = at(2024, 3, 10, 9);

  assert!(s.claim(id, now, lease).await.unwrap());
  assert!(!s.claim(id, now + Duration::minutes(1), lease).await.unwrap());
  assert!(s.claim(id, now + Duration::minutes(6), lease).await.unwrap());

  s.update_status(StatusUpdate::sent(id, "chat".into(), now)).await.unwrap();
  assert!(!s.claim(id, now + Duration::hours(1), lease).await.unwrap());
}

#[tokio::test]
async fn list_pending_filters_due_and_orders() {
  let s = store().await;
  let t = Uuid::new_v4();
  let subject_id = Uuid::new_v4();
  for offset in [7, -3, 1] {
    s.insert_if_absent(row(t, subject_id, offset)).await.unwrap();
  }

  let due = s.list_pending(Some(at(2024, 3, 11, 9)), None).await.unwrap();
  let offsets: Vec<_> = due.iter().map(|r| r.offset_days).collect();
  assert_eq!(offsets, vec![-3, 1]);

  let limited = s.list_pending(None, Some(1)).await.unwrap();
  assert_eq!(limited.len(), 1);
  assert_eq!(limited[0].offset_days, -3);

  let paged = s
    .list_notifications(NotificationQuery {
      tenant_id: Some(t),
      limit: Some(10),
      offset: Some(2),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(paged.len(), 1);
  assert_eq!(paged[0].offset_days, 7);
}
