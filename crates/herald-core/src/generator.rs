//! Schedule Generator: computes the notification rows that should exist for
//! one subject and do not yet.
//!
//! Both entry points are pure: they read nothing and write nothing. Callers
//! persist the result with
//! [`ScheduleStore::insert_if_absent`](crate::store::ScheduleStore::insert_if_absent),
//! which is what actually closes the race between concurrent runs.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{
  notification::{DedupKey, NotificationKind, ScheduledNotification},
  policy::NotificationPolicy,
  subject::{Broadcast, Subject},
};

/// Reminder rows for `subject`, anchored on `anchor_date`.
///
/// Before-due and on-due rows are only produced for the future. After-due rows
/// are produced even when their send time has already passed: an item can go
/// overdue between two reconciler runs and its "3 days overdue" reminder must
/// still be queued. The dispatcher treats every due, unsent row alike.
///
/// Output is ordered by offset and contains at most one row per dedup key.
pub fn generate(
  subject: &Subject,
  anchor_date: Option<NaiveDate>,
  policy: &NotificationPolicy,
  existing: &HashSet<DedupKey>,
  now: DateTime<Utc>,
) -> Vec<ScheduledNotification> {
  if !policy.enabled {
    return Vec::new();
  }
  let Some(anchor) = anchor_date else {
    return Vec::new();
  };

  let before = policy
    .offsets_before
    .iter()
    .rev()
    .filter_map(|d| i32::try_from(*d).ok())
    .map(|d| -d);
  let on_due = policy.send_on_due_date.then_some(0);
  let after = policy.offsets_after.iter().filter_map(|d| i32::try_from(*d).ok());

  let mut rows = BTreeMap::new();
  for offset_days in before.chain(on_due).chain(after) {
    let kind = NotificationKind::for_offset(offset_days);
    let key = DedupKey::new(subject.subject_id, kind, offset_days);
    if existing.contains(&key) || rows.contains_key(&key) {
      continue;
    }

    let Some(scheduled_for) = anchor
      .checked_add_signed(Duration::days(i64::from(offset_days)))
      .and_then(|date| policy.schedule_at(date))
    else {
      continue;
    };
    if kind != NotificationKind::AfterDue && scheduled_for <= now {
      continue;
    }

    let mut row = ScheduledNotification::pending(
      subject.tenant_id,
      key,
      anchor,
      scheduled_for,
      now,
    );
    row.customer_id = subject.customer_id;
    row.template_ref = policy.template_for(kind).map(str::to_owned);
    rows.insert(key, row);
  }

  let mut rows: Vec<_> = rows.into_values().collect();
  rows.sort_by_key(|r| r.offset_days);
  rows
}

/// The next row a broadcast series needs, if any.
///
/// A series without rows gets its first occurrence, even when that is
/// already late. A recurring series whose latest row lies in the past gets
/// the first occurrence at or after `now`; missed occurrences are skipped.
/// A series whose latest row is still ahead needs nothing.
pub fn generate_broadcast(
  broadcast: &Broadcast,
  policy: &NotificationPolicy,
  existing: &HashSet<DedupKey>,
  now: DateTime<Utc>,
) -> Option<ScheduledNotification> {
  if !policy.enabled || broadcast.status.is_terminal() {
    return None;
  }

  let origin = broadcast.first_send_at;
  let mut first = ScheduledNotification::pending(
    broadcast.tenant_id,
    DedupKey::new(broadcast.broadcast_id, NotificationKind::Broadcast, 0),
    origin.date_naive(),
    origin,
    now,
  );
  first.recurrence = broadcast.recurrence;

  let latest = existing
    .iter()
    .filter(|k| {
      k.subject_id == broadcast.broadcast_id && k.kind == NotificationKind::Broadcast
    })
    .map(|k| k.offset_days)
    .max();

  let Some(latest) = latest else {
    return Some(first);
  };
  if origin + Duration::days(i64::from(latest)) >= now {
    return None;
  }

  first
    .occurrence_at_or_after(now, now)
    .filter(|row| !existing.contains(&row.dedup_key()))
}

#[cfg(test)]
mod tests {
  use std::collections::{BTreeMap, BTreeSet};

  use chrono::{NaiveTime, TimeZone};
  use uuid::Uuid;

  use super::*;
  use crate::{
    policy::NotificationClass,
    recurrence::Recurrence,
    subject::{BroadcastStatus, SubjectStatus},
  };

  fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
  }

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn policy() -> NotificationPolicy {
    NotificationPolicy {
      enabled: true,
      offsets_before: BTreeSet::from([3, 1]),
      send_on_due_date: true,
      offsets_after: BTreeSet::from([1, 3, 7]),
      send_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
      ..NotificationPolicy::defaults(NotificationClass::PaymentReminder)
    }
  }

  fn invoice(due: NaiveDate) -> Subject {
    Subject {
      subject_id:   Uuid::new_v4(),
      tenant_id:    Uuid::new_v4(),
      customer_id:  Some(Uuid::new_v4()),
      reference:    "INV-42".into(),
      amount_minor: Some(9_900),
      currency:     "USD".into(),
      due_date:     Some(due),
      status:       SubjectStatus::Open,
      fields:       BTreeMap::new(),
    }
  }

  fn broadcast(recurrence: Recurrence) -> Broadcast {
    Broadcast {
      broadcast_id:  Uuid::new_v4(),
      tenant_id:     Uuid::new_v4(),
      name:          "Members".into(),
      chat_ref:      "group-1".into(),
      message:       "Weekly update".into(),
      image_urls:    Vec::new(),
      first_send_at: at(2024, 1, 1, 9),
      recurrence,
      status:        BroadcastStatus::Active,
    }
  }

  fn keys(rows: &[ScheduledNotification]) -> HashSet<DedupKey> {
    rows.iter().map(ScheduledNotification::dedup_key).collect()
  }

  #[test]
  fn unrepresentable_offsets_are_skipped() {
    let subject = invoice(date(2024, 3, 10));
    let policy = NotificationPolicy {
      offsets_before: BTreeSet::from([1, 2_147_483_648]),
      send_on_due_date: false,
      offsets_after: BTreeSet::from([u32::MAX]),
      ..policy()
    };
    let rows = generate(
      &subject,
      subject.due_date,
      &policy,
      &HashSet::new(),
      at(2024, 3, 1, 0),
    );
    let offsets: Vec<_> = rows.iter().map(|r| r.offset_days).collect();
    assert_eq!(offsets, vec![-1]);
  }

  #[test]
  fn full_policy_produces_six_rows() {
    let subject = invoice(date(2024, 3, 10));
    let rows = generate(
      &subject,
      subject.due_date,
      &policy(),
      &HashSet::new(),
      at(2024, 3, 1, 0),
    );

    let offsets: Vec<i32> = rows.iter().map(|r| r.offset_days).collect();
    assert_eq!(offsets, vec![-3, -1, 0, 1, 3, 7]);

    let times: Vec<DateTime<Utc>> = rows.iter().map(|r| r.scheduled_for).collect();
    assert_eq!(times, vec![
      at(2024, 3, 7, 9),
      at(2024, 3, 9, 9),
      at(2024, 3, 10, 9),
      at(2024, 3, 11, 9),
      at(2024, 3, 13, 9),
      at(2024, 3, 17, 9),
    ]);

    assert!(rows.iter().all(|r| r.anchor_date == date(2024, 3, 10)));
    assert!(rows.iter().all(|r| r.customer_id == subject.customer_id));
    assert_eq!(rows[0].kind, NotificationKind::BeforeDue);
    assert_eq!(rows[2].kind, NotificationKind::OnDue);
    assert_eq!(rows[5].kind, NotificationKind::AfterDue);
  }

  #[test]
  fn disabled_policy_produces_nothing() {
    let subject = invoice(date(2024, 3, 10));
    let mut p = policy();
    p.enabled = false;
    let rows = generate(&subject, subject.due_date, &p, &HashSet::new(), at(2024, 3, 1, 0));
    assert!(rows.is_empty());
  }

  #[test]
  fn missing_anchor_is_a_no_op() {
    let subject = invoice(date(2024, 3, 10));
    let rows = generate(&subject, None, &policy(), &HashSet::new(), at(2024, 3, 1, 0));
    assert!(rows.is_empty());
  }

  #[test]
  fn past_after_due_rows_still_generate() {
    let now = at(2024, 3, 20, 12);
    let subject = invoice(date(2024, 3, 10));
    let mut p = policy();
    p.offsets_after = BTreeSet::from([3, 7]);

    let rows = generate(&subject, subject.due_date, &p, &HashSet::new(), now);

    let offsets: Vec<i32> = rows.iter().map(|r| r.offset_days).collect();
    assert_eq!(offsets, vec![3, 7]);
    assert!(rows.iter().all(|r| r.scheduled_for < now));
  }

  #[test]
  fn before_and_on_due_are_future_only() {
    // 2024-03-09 09:00 has passed; 2024-03-10 09:00 has not.
    let subject = invoice(date(2024, 3, 10));
    let rows = generate(
      &subject,
      subject.due_date,
      &policy(),
      &HashSet::new(),
      at(2024, 3, 9, 10),
    );
    let offsets: Vec<i32> = rows.iter().map(|r| r.offset_days).collect();
    assert_eq!(offsets, vec![0, 1, 3, 7]);
  }

  #[test]
  fn existing_keys_are_skipped_and_output_is_stable() {
    let subject = invoice(date(2024, 3, 10));
    let now = at(2024, 3, 1, 0);
    let first = generate(&subject, subject.due_date, &policy(), &HashSet::new(), now);
    let again = generate(&subject, subject.due_date, &policy(), &HashSet::new(), now);
    assert_eq!(keys(&first), keys(&again));

    let rest = generate(&subject, subject.due_date, &policy(), &keys(&first), now);
    assert!(rest.is_empty());

    let partial: HashSet<DedupKey> = keys(&first[..2]);
    let rest = generate(&subject, subject.due_date, &policy(), &partial, now);
    assert_eq!(rest.len(), 4);
  }

  #[test]
  fn template_refs_are_snapshotted() {
    let subject = invoice(date(2024, 3, 10));
    let mut p = policy();
    p.templates.insert(NotificationKind::AfterDue, "late".into());
    let rows = generate(&subject, subject.due_date, &p, &HashSet::new(), at(2024, 3, 1, 0));
    for row in rows {
      let expected = (row.kind == NotificationKind::AfterDue).then(|| "late".to_owned());
      assert_eq!(row.template_ref, expected);
    }
  }

  #[test]
  fn broadcast_seeds_first_occurrence_even_when_late() {
    let b = broadcast(Recurrence::Weekly);
    let mut p = policy();
    p.class = NotificationClass::Broadcast;

    let row = generate_broadcast(&b, &p, &HashSet::new(), at(2024, 1, 3, 0)).unwrap();
    assert_eq!(row.scheduled_for, at(2024, 1, 1, 9));
    assert_eq!(row.offset_days, 0);
    assert_eq!(row.kind, NotificationKind::Broadcast);
    assert_eq!(row.recurrence, Recurrence::Weekly);
  }

  #[test]
  fn broadcast_with_upcoming_row_needs_nothing() {
    let b = broadcast(Recurrence::Weekly);
    let existing = HashSet::from([
      DedupKey::new(b.broadcast_id, NotificationKind::Broadcast, 0),
      DedupKey::new(b.broadcast_id, NotificationKind::Broadcast, 7),
    ]);
    assert!(generate_broadcast(&b, &policy(), &existing, at(2024, 1, 3, 0)).is_none());
  }

  #[test]
  fn broadcast_rolls_forward_after_a_gap() {
    let b = broadcast(Recurrence::Weekly);
    let existing =
      HashSet::from([DedupKey::new(b.broadcast_id, NotificationKind::Broadcast, 0)]);
    let row = generate_broadcast(&b, &policy(), &existing, at(2024, 1, 20, 0)).unwrap();
    assert_eq!(row.scheduled_for, at(2024, 1, 22, 9));
    assert_eq!(row.offset_days, 21);
  }

  #[test]
  fn one_shot_broadcast_is_generated_once() {
    let b = broadcast(Recurrence::None);
    let existing =
      HashSet::from([DedupKey::new(b.broadcast_id, NotificationKind::Broadcast, 0)]);
    assert!(generate_broadcast(&b, &policy(), &existing, at(2024, 2, 1, 0)).is_none());
  }

  #[test]
  fn paused_broadcast_generates_nothing() {
    let mut b = broadcast(Recurrence::Daily);
    b.status = BroadcastStatus::Paused;
    assert!(generate_broadcast(&b, &policy(), &HashSet::new(), at(2024, 1, 1, 0)).is_none());
  }
}
