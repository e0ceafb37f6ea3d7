//! The Reconciler: cancel moot rows, then top up the queue.

use std::{
  collections::{HashMap, HashSet},
  ops::AddAssign,
  sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt as _, stream};
use herald_core::{
  generator,
  notification::{ScheduledNotification, StatusUpdate},
  policy::{self, NotificationClass, NotificationPolicy},
  store::ScheduleStore,
  subject::{Broadcast, Subject},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{EngineConfig, Error, Result};

/// Best-effort counts from one [`Reconciler::reconcile`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
  pub cancelled: usize,
  pub generated: usize,
  /// Items, subjects or tenants skipped because of an error.
  pub errors:    usize,
}

impl AddAssign for ReconcileReport {
  fn add_assign(&mut self, other: Self) {
    self.cancelled += other.cancelled;
    self.generated += other.generated;
    self.errors += other.errors;
  }
}

pub struct Reconciler<S> {
  store:  Arc<S>,
  config: EngineConfig,
}

impl<S: ScheduleStore> Reconciler<S> {
  pub fn new(store: Arc<S>, config: EngineConfig) -> Self { Self { store, config } }

  /// Run one pass. Never fails as a whole: a failing tenant, subject or row
  /// is logged, counted in [`ReconcileReport::errors`] and skipped.
  pub async fn reconcile(&self, now: DateTime<Utc>) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    match self.cancel_moot(now).await {
      Ok(partial) => report += partial,
      Err(e) => {
        tracing::error!(error = %e, "cancellation phase failed");
        report.errors += 1;
      }
    }

    match self.store.list_tenants().await {
      Ok(tenants) => {
        for tenant_id in tenants {
          match self.generate_for_tenant(tenant_id, now).await {
            Ok(partial) => report += partial,
            Err(e) => {
              tracing::warn!(%tenant_id, error = %e, "skipping tenant");
              report.errors += 1;
            }
          }
        }
      }
      Err(e) => {
        tracing::error!(error = %e, "listing tenants failed");
        report.errors += 1;
      }
    }

    tracing::info!(
      cancelled = report.cancelled,
      generated = report.generated,
      errors = report.errors,
      "reconcile pass finished"
    );
    report
  }

  // ── Phase A: cancellation ─────────────────────────────────────────────────

  async fn cancel_moot(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let pending = self.store.list_pending(None, None).await.map_err(Error::storage)?;
    if pending.is_empty() {
      return Ok(report);
    }

    let subject_ids: HashSet<Uuid> = pending.iter().map(|r| r.subject_id).collect();
    let terminal = self
      .store
      .terminal_subjects(subject_ids.into_iter().collect())
      .await
      .map_err(Error::storage)?;

    let customer_ids: HashSet<Uuid> = pending
      .iter()
      .filter(|r| r.kind.is_reminder())
      .filter_map(|r| r.customer_id)
      .collect();
    let payments = match self.recent_payments(customer_ids, now).await {
      Ok(payments) => payments,
      Err(e) => {
        // The payment check is secondary; losing it only delays cancellation.
        tracing::warn!(error = %e, "payment lookup failed, checking subject status only");
        report.errors += 1;
        HashMap::new()
      }
    };

    for row in pending {
      let Some(reason) = cancel_reason(&row, &terminal, &payments) else {
        continue;
      };
      let update = StatusUpdate::cancelled(row.notification_id, reason, now);
      match self.store.update_status(update).await {
        Ok(true) => {
          tracing::debug!(notification_id = %row.notification_id, reason, "cancelled");
          report.cancelled += 1;
        }
        Ok(false) => {}
        Err(e) => {
          tracing::warn!(notification_id = %row.notification_id, error = %e, "cancel failed");
          report.errors += 1;
        }
      }
    }

    Ok(report)
  }

  // ── Phase B: generation ───────────────────────────────────────────────────

  async fn generate_for_tenant(
    &self,
    tenant_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let reminders = policy::resolve(&*self.store, tenant_id, NotificationClass::PaymentReminder)
      .await
      .map_err(Error::storage)?;
    if reminders.enabled {
      report += self.generate_reminders(tenant_id, &reminders, now).await?;
    }

    let broadcasts = policy::resolve(&*self.store, tenant_id, NotificationClass::Broadcast)
      .await
      .map_err(Error::storage)?;
    if broadcasts.enabled {
      report += self.seed_broadcasts(tenant_id, &broadcasts, now).await?;
    }

    Ok(report)
  }

  async fn generate_reminders(
    &self,
    tenant_id: Uuid,
    policy: &NotificationPolicy,
    now: DateTime<Utc>,
  ) -> Result<ReconcileReport> {
    let today = now.with_timezone(&policy.utc_offset).date_naive();
    let from = today - Duration::days(i64::from(self.config.window_past_days));
    let to = today + Duration::days(i64::from(self.config.window_future_days));

    let subjects = self
      .store
      .upcoming_subjects(tenant_id, from, to)
      .await
      .map_err(Error::storage)?;

    let open: Vec<&Subject> = subjects.iter().filter(|s| !s.status.is_terminal()).collect();

    // A customer who paid inside the lookback window gets no new reminders
    // until the payment ages out.
    let customer_ids = open.iter().filter_map(|s| s.customer_id).collect();
    let payments = self.recent_payments(customer_ids, now).await?;
    let (paid, due): (Vec<&Subject>, Vec<&Subject>) = open
      .into_iter()
      .partition(|s| s.customer_id.is_some_and(|c| payments.contains_key(&c)));
    for subject in &paid {
      tracing::debug!(subject_id = %subject.subject_id, "customer paid recently, not generating");
    }

    let outcomes: Vec<(Uuid, Result<usize>)> = stream::iter(due)
    .map(|subject| async move {
      (subject.subject_id, self.generate_for_subject(subject, policy, now).await)
    })
    .buffer_unordered(self.config.fan_out())
    .collect()
    .await;

    let mut report = ReconcileReport::default();
    for (subject_id, outcome) in outcomes {
      match outcome {
        Ok(inserted) => report.generated += inserted,
        Err(e) => {
          tracing::warn!(%tenant_id, %subject_id, error = %e, "skipping subject");
          report.errors += 1;
        }
      }
    }
    Ok(report)
  }

  async fn generate_for_subject(
    &self,
    subject: &Subject,
    policy: &NotificationPolicy,
    now: DateTime<Utc>,
  ) -> Result<usize> {
    let existing = self
      .store
      .blocking_dedup_keys(subject.subject_id)
      .await
      .map_err(Error::storage)?;
    let rows = generator::generate(subject, subject.due_date, policy, &existing, now);
    self.insert_all(rows).await
  }

  async fn seed_broadcasts(
    &self,
    tenant_id: Uuid,
    policy: &NotificationPolicy,
    now: DateTime<Utc>,
  ) -> Result<ReconcileReport> {
    let broadcasts = self
      .store
      .active_broadcasts(tenant_id)
      .await
      .map_err(Error::storage)?;

    let mut report = ReconcileReport::default();
    for broadcast in &broadcasts {
      match self.seed_broadcast(broadcast, policy, now).await {
        Ok(inserted) => report.generated += inserted,
        Err(e) => {
          tracing::warn!(
            %tenant_id,
            broadcast_id = %broadcast.broadcast_id,
            error = %e,
            "skipping broadcast"
          );
          report.errors += 1;
        }
      }
    }
    Ok(report)
  }

  async fn seed_broadcast(
    &self,
    broadcast: &Broadcast,
    policy: &NotificationPolicy,
    now: DateTime<Utc>,
  ) -> Result<usize> {
    let existing = self
      .store
      .blocking_dedup_keys(broadcast.broadcast_id)
      .await
      .map_err(Error::storage)?;
    let rows = generator::generate_broadcast(broadcast, policy, &existing, now);
    self.insert_all(rows.into_iter().collect()).await
  }

  /// Latest payment per customer within the lookback window.
  async fn recent_payments(
    &self,
    customer_ids: HashSet<Uuid>,
    now: DateTime<Utc>,
  ) -> Result<HashMap<Uuid, DateTime<Utc>>> {
    if customer_ids.is_empty() {
      return Ok(HashMap::new());
    }
    let since = now - Duration::days(i64::from(self.config.payment_lookback_days));
    self
      .store
      .latest_payments(customer_ids.into_iter().collect(), since)
      .await
      .map_err(Error::storage)
  }

  /// Insert each row, treating a dedup conflict as "already scheduled".
  async fn insert_all(&self, rows: Vec<ScheduledNotification>) -> Result<usize> {
    let mut inserted = 0;
    for row in rows {
      let key = row.dedup_key();
      if self.store.insert_if_absent(row).await.map_err(Error::storage)? {
        inserted += 1;
      } else {
        tracing::debug!(%key, "already scheduled");
      }
    }
    Ok(inserted)
  }
}

/// Why a pending row should be cancelled, if it should.
fn cancel_reason(
  row: &ScheduledNotification,
  terminal: &HashSet<Uuid>,
  payments: &HashMap<Uuid, DateTime<Utc>>,
) -> Option<&'static str> {
  if terminal.contains(&row.subject_id) {
    return Some(if row.kind.is_reminder() {
      "subject resolved"
    } else {
      "broadcast stopped"
    });
  }

  // Only payments recorded after the row was created count, so a row an
  // operator requeued after the payment stays queued.
  let paid_since_created = row
    .customer_id
    .and_then(|c| payments.get(&c))
    .is_some_and(|paid_at| *paid_at >= row.created_at);
  (row.kind.is_reminder() && paid_since_created).then_some("customer payment recorded")
}
