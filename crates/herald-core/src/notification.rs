//! The scheduled notification, the central entity of the engine, and its
//! status state machine.
//!
//! A row is created `pending` and moves exactly once, to `sent`, `cancelled`
//! or `failed`. Nothing ever leaves a terminal status: recurrence and operator
//! requeues produce *new* rows instead of resurrecting old ones.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, recurrence::Recurrence};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// What a notification is about, relative to its anchor date.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
  BeforeDue,
  OnDue,
  AfterDue,
  /// A group message produced by a broadcast definition.
  Broadcast,
}

impl NotificationKind {
  /// The reminder kind implied by a signed day offset.
  pub fn for_offset(offset_days: i32) -> Self {
    match offset_days {
      d if d < 0 => Self::BeforeDue,
      0 => Self::OnDue,
      _ => Self::AfterDue,
    }
  }

  pub fn is_reminder(self) -> bool { !matches!(self, Self::Broadcast) }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
  Pending,
  Sent,
  Cancelled,
  Failed,
}

impl NotificationStatus {
  /// Active rows occupy their dedup key in storage.
  pub fn is_active(self) -> bool { matches!(self, Self::Pending | Self::Sent) }

  pub fn is_terminal(self) -> bool { !matches!(self, Self::Pending) }

  /// Whether a row in this status stops the reconciler from generating the
  /// same slot again. Only cancelled rows free their slot; a failed row is
  /// left for the operator to requeue.
  pub fn blocks_regeneration(self) -> bool { !matches!(self, Self::Cancelled) }

  pub fn can_transition_to(self, next: Self) -> bool {
    self == Self::Pending && next != Self::Pending
  }
}

// ─── Dedup key ───────────────────────────────────────────────────────────────

/// `(subject, kind, offset)`: at most one active row exists per key.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DedupKey {
  pub subject_id:  Uuid,
  pub kind:        NotificationKind,
  pub offset_days: i32,
}

impl DedupKey {
  pub fn new(subject_id: Uuid, kind: NotificationKind, offset_days: i32) -> Self {
    Self { subject_id, kind, offset_days }
  }
}

impl fmt::Display for DedupKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{:+}", self.subject_id, self.kind, self.offset_days)
  }
}

// ─── Row ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
  pub notification_id: Uuid,
  pub tenant_id:       Uuid,
  /// The billable item or broadcast definition this row concerns.
  pub subject_id:      Uuid,
  /// Owner of the billable item; used by the payment cross-check.
  pub customer_id:     Option<Uuid>,
  /// Chat identifier, filled in at dispatch time.
  pub recipient_ref:   Option<String>,
  pub anchor_date:     NaiveDate,
  pub kind:            NotificationKind,
  pub offset_days:     i32,
  pub scheduled_for:   DateTime<Utc>,
  /// Snapshot of the policy's template choice at generation time.
  pub template_ref:    Option<String>,
  pub status:          NotificationStatus,
  pub recurrence:      Recurrence,
  pub last_error:      Option<String>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl ScheduledNotification {
  /// A fresh `pending` row for `key`.
  pub fn pending(
    tenant_id: Uuid,
    key: DedupKey,
    anchor_date: NaiveDate,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      notification_id: Uuid::new_v4(),
      tenant_id,
      subject_id: key.subject_id,
      customer_id: None,
      recipient_ref: None,
      anchor_date,
      kind: key.kind,
      offset_days: key.offset_days,
      scheduled_for,
      template_ref: None,
      status: NotificationStatus::Pending,
      recurrence: Recurrence::None,
      last_error: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn dedup_key(&self) -> DedupKey {
    DedupKey::new(self.subject_id, self.kind, self.offset_days)
  }

  /// The calendar date this row fires for: anchor plus offset.
  pub fn occurrence_date(&self) -> NaiveDate {
    self.anchor_date + Duration::days(i64::from(self.offset_days))
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.status == NotificationStatus::Pending && self.scheduled_for <= now
  }

  /// Whole days `now` is past the anchor date (negative when before it).
  pub fn days_past_anchor(&self, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - self.anchor_date).num_days()
  }

  /// Check that moving to `next` is a legal state-machine step.
  pub fn check_transition(&self, next: NotificationStatus) -> Result<()> {
    if self.status.can_transition_to(next) {
      Ok(())
    } else {
      Err(Error::InvalidTransition {
        id:   self.notification_id,
        from: self.status,
        to:   next,
      })
    }
  }

  /// Build the row for the next occurrence of a recurring series.
  ///
  /// The anchor stays at the series origin and the offset grows, so each
  /// occurrence has a distinct dedup key. Returns `None` when the row does
  /// not recur.
  pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<Self> {
    let origin = self.series_origin();
    let next_at = self.recurrence.next_after(origin, self.scheduled_for)?;
    self.successor_at(next_at, now)
  }

  /// Build the earliest occurrence of this row's series at or after `at`.
  pub fn occurrence_at_or_after(
    &self,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Option<Self> {
    let origin = self.series_origin();
    let next_at = self.recurrence.first_at_or_after(origin, at)?;
    self.successor_at(next_at, now)
  }

  /// A new `pending` copy of a failed row, due immediately. This is the
  /// operator's reprocessing path; the engine never retries on its own.
  pub fn requeue(&self, now: DateTime<Utc>) -> Result<Self> {
    if self.status != NotificationStatus::Failed {
      return Err(Error::InvalidTransition {
        id:   self.notification_id,
        from: self.status,
        to:   NotificationStatus::Pending,
      });
    }
    Ok(Self {
      notification_id: Uuid::new_v4(),
      recipient_ref: None,
      scheduled_for: now,
      status: NotificationStatus::Pending,
      last_error: None,
      created_at: now,
      updated_at: now,
      ..self.clone()
    })
  }

  fn series_origin(&self) -> DateTime<Utc> {
    self.scheduled_for - Duration::days(i64::from(self.offset_days))
  }

  /// `None` when the occurrence lies too far from the anchor to express as a
  /// day offset.
  fn successor_at(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Self> {
    let offset_days = i32::try_from((at.date_naive() - self.anchor_date).num_days()).ok()?;
    Some(Self {
      notification_id: Uuid::new_v4(),
      recipient_ref: None,
      offset_days,
      scheduled_for: at,
      status: NotificationStatus::Pending,
      last_error: None,
      created_at: now,
      updated_at: now,
      ..self.clone()
    })
  }
}

// ─── Status update ───────────────────────────────────────────────────────────

/// A terminal transition for one row, applied with
/// [`crate::store::ScheduleStore::update_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
  pub notification_id: Uuid,
  pub status:          NotificationStatus,
  pub last_error:      Option<String>,
  pub recipient_ref:   Option<String>,
  pub at:              DateTime<Utc>,
}

impl StatusUpdate {
  pub fn sent(id: Uuid, recipient_ref: String, at: DateTime<Utc>) -> Self {
    Self {
      notification_id: id,
      status: NotificationStatus::Sent,
      last_error: None,
      recipient_ref: Some(recipient_ref),
      at,
    }
  }

  pub fn failed(
    id: Uuid,
    error: impl Into<String>,
    recipient_ref: Option<String>,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      notification_id: id,
      status: NotificationStatus::Failed,
      last_error: Some(error.into()),
      recipient_ref,
      at,
    }
  }

  pub fn cancelled(id: Uuid, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
    Self {
      notification_id: id,
      status: NotificationStatus::Cancelled,
      last_error: Some(reason.into()),
      recipient_ref: None,
      at,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn weekly_broadcast() -> ScheduledNotification {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let key = DedupKey::new(Uuid::new_v4(), NotificationKind::Broadcast, 0);
    let mut row =
      ScheduledNotification::pending(Uuid::new_v4(), key, at.date_naive(), at, at);
    row.recurrence = Recurrence::Weekly;
    row
  }

  #[test]
  fn kind_for_offset() {
    assert_eq!(NotificationKind::for_offset(-3), NotificationKind::BeforeDue);
    assert_eq!(NotificationKind::for_offset(0), NotificationKind::OnDue);
    assert_eq!(NotificationKind::for_offset(7), NotificationKind::AfterDue);
  }

  #[test]
  fn only_pending_may_transition() {
    use NotificationStatus::*;
    assert!(Pending.can_transition_to(Sent));
    assert!(Pending.can_transition_to(Cancelled));
    assert!(Pending.can_transition_to(Failed));
    assert!(!Pending.can_transition_to(Pending));
    for terminal in [Sent, Cancelled, Failed] {
      for next in [Pending, Sent, Cancelled, Failed] {
        assert!(!terminal.can_transition_to(next));
      }
    }
  }

  #[test]
  fn status_strings_round_trip_through_strum() {
    assert_eq!(NotificationStatus::Cancelled.as_ref(), "cancelled");
    assert_eq!(
      "failed".parse::<NotificationStatus>().unwrap(),
      NotificationStatus::Failed
    );
    assert_eq!(NotificationKind::BeforeDue.to_string(), "before_due");
  }

  #[test]
  fn next_occurrence_keeps_origin_anchor() {
    let row = weekly_broadcast();
    let next = row.next_occurrence(row.scheduled_for).unwrap();

    assert_ne!(next.notification_id, row.notification_id);
    assert_eq!(next.anchor_date, row.anchor_date);
    assert_eq!(next.offset_days, 7);
    assert_eq!(
      next.scheduled_for,
      Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()
    );
    assert_eq!(next.status, NotificationStatus::Pending);
    assert_ne!(next.dedup_key(), row.dedup_key());
    assert_eq!(next.occurrence_date(), next.scheduled_for.date_naive());
  }

  #[test]
  fn requeue_requires_failed() {
    let mut row = weekly_broadcast();
    assert!(row.requeue(Utc::now()).is_err());

    row.status = NotificationStatus::Failed;
    row.last_error = Some("boom".into());
    let now = Utc::now();
    let fresh = row.requeue(now).unwrap();
    assert_eq!(fresh.status, NotificationStatus::Pending);
    assert_eq!(fresh.dedup_key(), row.dedup_key());
    assert_eq!(fresh.scheduled_for, now);
    assert!(fresh.last_error.is_none());
  }
}
