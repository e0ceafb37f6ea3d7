//! The `ScheduleStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `herald-store-sqlite`).
//! The engine and the operator API depend on this abstraction, not on any
//! concrete backend. Tenant settings, subjects, customers, payments,
//! broadcasts and templates are read-only from the engine's point of view;
//! only notification rows are written.

use std::{
  collections::{HashMap, HashSet},
  future::Future,
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
  notification::{DedupKey, NotificationStatus, ScheduledNotification, StatusUpdate},
  subject::{Broadcast, Customer, Subject},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`ScheduleStore::list_notifications`]. Results are ordered
/// by `scheduled_for`, oldest first.
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery {
  pub status:     Option<NotificationStatus>,
  pub tenant_id:  Option<Uuid>,
  pub subject_id: Option<Uuid>,
  /// Only rows with `scheduled_for <= due_before`.
  pub due_before: Option<DateTime<Utc>>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the storage the engine runs against.
///
/// Notification rows are never deleted. Their status moves once, from
/// `pending` to a terminal status; every such move is conditional on the row
/// still being `pending`, so concurrent jobs cannot overwrite each other.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ScheduleStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Tenant settings ───────────────────────────────────────────────────

  /// All tenants known to the store.
  fn list_tenants(
    &self,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Raw settings for `tenant_id`, restricted to `keys`. Absent keys are
  /// simply missing from the map.
  fn tenant_settings(
    &self,
    tenant_id: Uuid,
    keys: Vec<String>,
  ) -> impl Future<Output = Result<HashMap<String, String>, Self::Error>> + Send + '_;

  // ── Subjects ──────────────────────────────────────────────────────────

  /// Billable items of `tenant_id` whose due date lies in `[from, to]`,
  /// regardless of status.
  fn upcoming_subjects(
    &self,
    tenant_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_;

  fn get_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_;

  /// The subset of `ids` that no longer needs notifications: paid or
  /// cancelled items, paused or cancelled broadcasts.
  fn terminal_subjects(
    &self,
    ids: Vec<Uuid>,
  ) -> impl Future<Output = Result<HashSet<Uuid>, Self::Error>> + Send + '_;

  fn get_customer(
    &self,
    customer_id: Uuid,
  ) -> impl Future<Output = Result<Option<Customer>, Self::Error>> + Send + '_;

  /// The latest payment time at or after `since` for each of
  /// `customer_ids` that has one.
  fn latest_payments(
    &self,
    customer_ids: Vec<Uuid>,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<HashMap<Uuid, DateTime<Utc>>, Self::Error>>
  + Send
  + '_;

  // ── Broadcasts and templates ──────────────────────────────────────────

  fn active_broadcasts(
    &self,
    tenant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Broadcast>, Self::Error>> + Send + '_;

  fn get_broadcast(
    &self,
    broadcast_id: Uuid,
  ) -> impl Future<Output = Result<Option<Broadcast>, Self::Error>> + Send + '_;

  /// Template text for `template_ref`, or `None` if it no longer exists.
  fn get_template(
    &self,
    tenant_id: Uuid,
    template_ref: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  // ── Notifications ─────────────────────────────────────────────────────

  /// Insert `row` unless an active row already holds its dedup key.
  ///
  /// Returns `false` on a dedup conflict; callers treat that as "already
  /// scheduled", not as an error.
  fn insert_if_absent(
    &self,
    row: ScheduledNotification,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_notification(
    &self,
    notification_id: Uuid,
  ) -> impl Future<Output = Result<Option<ScheduledNotification>, Self::Error>>
  + Send
  + '_;

  fn list_notifications(
    &self,
    query: NotificationQuery,
  ) -> impl Future<Output = Result<Vec<ScheduledNotification>, Self::Error>>
  + Send
  + '_;

  /// Pending rows, optionally only those due by `due_before`.
  fn list_pending(
    &self,
    due_before: Option<DateTime<Utc>>,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<ScheduledNotification>, Self::Error>>
  + Send
  + '_ {
    self.list_notifications(NotificationQuery {
      status: Some(NotificationStatus::Pending),
      due_before,
      limit,
      ..NotificationQuery::default()
    })
  }

  /// Dedup keys of `subject_id` that stop regeneration: those of pending,
  /// sent and failed rows.
  fn blocking_dedup_keys(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<HashSet<DedupKey>, Self::Error>> + Send + '_;

  /// Take a dispatch lease on a pending row. Fails if the row is no longer
  /// pending or another dispatcher holds an unexpired lease.
  fn claim(
    &self,
    notification_id: Uuid,
    now: DateTime<Utc>,
    lease: Duration,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Apply a terminal transition. Returns `false` if the row was not
  /// `pending` (someone else already moved it).
  fn update_status(
    &self,
    update: StatusUpdate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
