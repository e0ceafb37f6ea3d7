//! The Dispatcher: send due rows and advance recurrence.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use futures::{StreamExt as _, stream};
use herald_core::{
  notification::{ScheduledNotification, StatusUpdate},
  policy::{self, NotificationClass},
  store::ScheduleStore,
  template::{self, TemplateVars},
  transport::{MessageTransport, TransportError},
};
use serde::Serialize;

use crate::{EngineConfig, Error, Result};

/// Counts from one [`Dispatcher::dispatch_due`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
  pub sent:      usize,
  pub failed:    usize,
  /// Rows whose subject was resolved or gone by send time.
  pub cancelled: usize,
  /// Rows another dispatcher claimed or already moved.
  pub skipped:   usize,
  pub errors:    usize,
}

enum Outcome {
  Sent,
  Failed,
  Cancelled,
  Skipped,
}

/// What a row turns into once its subject has been looked at.
enum Prepared {
  Send(Message),
  Cancel(String),
  Fail(String),
}

/// A rendered message ready for the transport.
struct Message {
  recipient: String,
  text:      String,
  images:    Vec<String>,
}

pub struct Dispatcher<S, T> {
  store:     Arc<S>,
  transport: Arc<T>,
  config:    EngineConfig,
}

impl<S: ScheduleStore, T: MessageTransport> Dispatcher<S, T> {
  pub fn new(store: Arc<S>, transport: Arc<T>, config: EngineConfig) -> Self {
    Self { store, transport, config }
  }

  /// Send every pending row due by `now`.
  pub async fn dispatch_due(&self, now: DateTime<Utc>) -> DispatchReport {
    let mut report = DispatchReport::default();

    let due = match self
      .store
      .list_pending(Some(now), Some(self.config.dispatch_batch_limit))
      .await
    {
      Ok(due) => due,
      Err(e) => {
        tracing::error!(error = %e, "listing due notifications failed");
        report.errors += 1;
        return report;
      }
    };

    let outcomes: Vec<_> = stream::iter(due)
      .map(|row| async move {
        let id = row.notification_id;
        (id, self.dispatch_one(row, now).await)
      })
      .buffer_unordered(self.config.fan_out())
      .collect()
      .await;

    for (notification_id, outcome) in outcomes {
      match outcome {
        Ok(Outcome::Sent) => report.sent += 1,
        Ok(Outcome::Failed) => report.failed += 1,
        Ok(Outcome::Cancelled) => report.cancelled += 1,
        Ok(Outcome::Skipped) => report.skipped += 1,
        Err(e) => {
          tracing::warn!(%notification_id, error = %e, "dispatch aborted");
          report.errors += 1;
        }
      }
    }

    tracing::info!(
      sent = report.sent,
      failed = report.failed,
      cancelled = report.cancelled,
      skipped = report.skipped,
      errors = report.errors,
      "dispatch pass finished"
    );
    report
  }

  async fn dispatch_one(&self, row: ScheduledNotification, now: DateTime<Utc>) -> Result<Outcome> {
    let id = row.notification_id;
    if !self
      .store
      .claim(id, now, self.config.claim_lease())
      .await
      .map_err(Error::storage)?
    {
      return Ok(Outcome::Skipped);
    }

    let message = match self.prepare(&row, now).await? {
      Prepared::Send(message) => message,
      Prepared::Cancel(reason) => {
        tracing::info!(notification_id = %id, %reason, "cancelled at send time");
        return self
          .finish(StatusUpdate::cancelled(id, reason, now), Outcome::Cancelled)
          .await;
      }
      Prepared::Fail(reason) => {
        tracing::warn!(notification_id = %id, %reason, "cannot send");
        return self
          .finish(StatusUpdate::failed(id, reason, None, now), Outcome::Failed)
          .await;
      }
    };

    match self.deliver(&message).await {
      Ok(()) => {
        let outcome = self
          .finish(StatusUpdate::sent(id, message.recipient, now), Outcome::Sent)
          .await?;
        if matches!(outcome, Outcome::Sent) {
          self.schedule_next(&row, now).await;
        }
        Ok(outcome)
      }
      Err(e) => {
        tracing::warn!(notification_id = %id, error = %e, "send failed");
        self
          .finish(
            StatusUpdate::failed(id, e.message, Some(message.recipient), now),
            Outcome::Failed,
          )
          .await
      }
    }
  }

  async fn finish(&self, update: StatusUpdate, outcome: Outcome) -> Result<Outcome> {
    let id = update.notification_id;
    if self.store.update_status(update).await.map_err(Error::storage)? {
      Ok(outcome)
    } else {
      tracing::warn!(notification_id = %id, "row moved by someone else during dispatch");
      Ok(Outcome::Skipped)
    }
  }

  // ── Preparation ───────────────────────────────────────────────────────────

  async fn prepare(&self, row: &ScheduledNotification, now: DateTime<Utc>) -> Result<Prepared> {
    if row.kind.is_reminder() {
      self.prepare_reminder(row, now).await
    } else {
      self.prepare_broadcast(row, now).await
    }
  }

  async fn prepare_reminder(
    &self,
    row: &ScheduledNotification,
    now: DateTime<Utc>,
  ) -> Result<Prepared> {
    let Some(subject) = self
      .store
      .get_subject(row.subject_id)
      .await
      .map_err(Error::storage)?
    else {
      let missing = herald_core::Error::NotFound(format!("subject {}", row.subject_id));
      return Ok(Prepared::Cancel(missing.to_string()));
    };
    if subject.status.is_terminal() {
      return Ok(Prepared::Cancel(format!("subject {} before send", subject.status)));
    }

    // The subject's current owner wins over the one captured at generation.
    let customer = match subject.customer_id.or(row.customer_id) {
      Some(customer_id) => self
        .store
        .get_customer(customer_id)
        .await
        .map_err(Error::storage)?,
      None => None,
    };
    let Some(recipient) = customer.as_ref().and_then(|c| c.chat_ref.clone()) else {
      return Ok(Prepared::Fail(format!(
        "no recipient for subject {}",
        subject.subject_id
      )));
    };

    let policy = policy::resolve(&*self.store, row.tenant_id, NotificationClass::PaymentReminder)
      .await
      .map_err(Error::storage)?;
    let local_now = now.with_timezone(&policy.utc_offset);
    let vars = TemplateVars::for_reminder(&subject, customer.as_ref(), row, local_now);

    let body = self.template_body(row).await?;
    let text = template::render(
      body.as_deref().unwrap_or_else(|| template::default_template(row.kind)),
      &vars,
    );

    Ok(Prepared::Send(Message { recipient, text, images: Vec::new() }))
  }

  async fn prepare_broadcast(
    &self,
    row: &ScheduledNotification,
    now: DateTime<Utc>,
  ) -> Result<Prepared> {
    let Some(broadcast) = self
      .store
      .get_broadcast(row.subject_id)
      .await
      .map_err(Error::storage)?
    else {
      let missing = herald_core::Error::NotFound(format!("broadcast {}", row.subject_id));
      return Ok(Prepared::Cancel(missing.to_string()));
    };
    if broadcast.status.is_terminal() {
      return Ok(Prepared::Cancel(format!("broadcast {} before send", broadcast.status)));
    }

    let policy = policy::resolve(&*self.store, row.tenant_id, NotificationClass::Broadcast)
      .await
      .map_err(Error::storage)?;
    let vars = TemplateVars::for_broadcast(&broadcast, now.with_timezone(&policy.utc_offset));

    let body = self.template_body(row).await?;
    let text = template::render(body.as_deref().unwrap_or(&broadcast.message), &vars);

    Ok(Prepared::Send(Message {
      recipient: broadcast.chat_ref,
      text,
      images: broadcast.image_urls,
    }))
  }

  /// The stored template the row refers to, or `None` when it has no
  /// reference or the reference no longer resolves.
  async fn template_body(&self, row: &ScheduledNotification) -> Result<Option<String>> {
    let Some(template_ref) = row.template_ref.clone() else {
      return Ok(None);
    };
    let body = self
      .store
      .get_template(row.tenant_id, template_ref.clone())
      .await
      .map_err(Error::storage)?;
    if body.is_none() {
      tracing::debug!(
        notification_id = %row.notification_id,
        %template_ref,
        "template missing, using built-in text"
      );
    }
    Ok(body)
  }

  // ── Delivery ──────────────────────────────────────────────────────────────

  /// Media first, then text. Any failing call fails the whole message.
  async fn deliver(&self, message: &Message) -> Result<(), TransportError> {
    let recipient = message.recipient.as_str();
    let text = message.text.as_str();
    let caption = (!text.is_empty()).then_some(text);

    match message.images.as_slice() {
      [] => self.timed(self.transport.send_text(recipient, text)).await,
      [image] => {
        self
          .timed(self.transport.send_image(recipient, image, caption))
          .await
      }
      images => {
        for image in images {
          self
            .timed(self.transport.send_image(recipient, image, None))
            .await?;
        }
        match caption {
          Some(text) => self.timed(self.transport.send_text(recipient, text)).await,
          None => Ok(()),
        }
      }
    }
  }

  async fn timed(
    &self,
    call: impl Future<Output = Result<(), TransportError>>,
  ) -> Result<(), TransportError> {
    let limit = self.config.send_timeout();
    tokio::time::timeout(limit, call).await.map_err(|_| {
      TransportError::new(format!("send timed out after {}s", limit.as_secs()))
    })?
  }

  // ── Recurrence ────────────────────────────────────────────────────────────

  /// Queue the next occurrence of a recurring row that was just sent.
  /// Occurrences that are already in the past are skipped, not back-filled.
  async fn schedule_next(&self, row: &ScheduledNotification, now: DateTime<Utc>) {
    let next = row
      .next_occurrence(now)
      .and_then(|next| {
        if next.scheduled_for >= now {
          Some(next)
        } else {
          row.occurrence_at_or_after(now, now)
        }
      });
    let Some(next) = next else {
      return;
    };

    let scheduled_for = next.scheduled_for;
    match self.store.insert_if_absent(next).await {
      Ok(true) => {
        tracing::debug!(subject_id = %row.subject_id, %scheduled_for, "next occurrence queued")
      }
      Ok(false) => {}
      Err(e) => tracing::error!(
        notification_id = %row.notification_id,
        error = %e,
        "failed to queue next occurrence"
      ),
    }
  }
}
