//! [`SqliteStore`], the SQLite implementation of [`ScheduleStore`].

use std::{
  collections::{HashMap, HashSet},
  path::Path,
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use herald_core::{
  notification::{DedupKey, ScheduledNotification, StatusUpdate},
  store::{NotificationQuery, ScheduleStore},
  subject::{Broadcast, BroadcastStatus, Customer, Payment, Subject, SubjectStatus},
};

use crate::{
  encode::{
    BROADCAST_COLUMNS, NOTIFICATION_COLUMNS, RawBroadcast, RawCustomer,
    RawNotification, RawSubject, SUBJECT_COLUMNS, decode_dt, decode_enum,
    decode_uuid, encode_date, encode_dt, encode_uuid,
  },
  schema::SCHEMA,
  Error, Result,
};

/// SQLite's bound-parameter ceiling is generous, but `IN (...)` lists are
/// still chunked to keep statements small.
const IN_CHUNK: usize = 500;

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Herald store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Billing-side writes ───────────────────────────────────────────────
  //
  // The engine never calls these; they are how the surrounding system (and
  // the tests) populate what the engine reads.

  /// Create a tenant and return its id.
  pub async fn add_tenant(&self, name: impl Into<String>) -> Result<Uuid> {
    let tenant_id = Uuid::new_v4();
    let id_str    = encode_uuid(tenant_id);
    let name      = name.into();
    let at_str    = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO tenants (tenant_id, name, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(tenant_id)
  }

  /// Insert or replace one raw setting.
  pub async fn put_setting(
    &self,
    tenant_id: Uuid,
    key: impl Into<String>,
    value: impl Into<String>,
  ) -> Result<()> {
    let id_str = encode_uuid(tenant_id);
    let key    = key.into();
    let value  = value.into();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO tenant_settings (tenant_id, key, value) VALUES (?1, ?2, ?3)
           ON CONFLICT (tenant_id, key) DO UPDATE SET value = excluded.value",
          rusqlite::params![id_str, key, value],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn add_customer(&self, customer: &Customer) -> Result<()> {
    let id_str     = encode_uuid(customer.customer_id);
    let tenant_str = encode_uuid(customer.tenant_id);
    let name       = customer.name.clone();
    let chat_ref   = customer.chat_ref.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO customers (customer_id, tenant_id, name, chat_ref)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, tenant_str, name, chat_ref],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert a subject, or overwrite every field of an existing one.
  pub async fn put_subject(&self, subject: &Subject) -> Result<()> {
    let id_str       = encode_uuid(subject.subject_id);
    let tenant_str   = encode_uuid(subject.tenant_id);
    let customer_str = subject.customer_id.map(encode_uuid);
    let reference    = subject.reference.clone();
    let amount_minor = subject.amount_minor;
    let currency     = subject.currency.clone();
    let due_str      = subject.due_date.map(encode_date);
    let status_str   = subject.status.as_ref().to_owned();
    let fields_str   = serde_json::to_string(&subject.fields)?;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects (
             subject_id, tenant_id, customer_id, reference, amount_minor,
             currency, due_date, status, fields
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
           ON CONFLICT(subject_id) DO UPDATE SET
             customer_id  = excluded.customer_id,
             reference    = excluded.reference,
             amount_minor = excluded.amount_minor,
             currency     = excluded.currency,
             due_date     = excluded.due_date,
             status       = excluded.status,
             fields       = excluded.fields",
          rusqlite::params![
            id_str,
            tenant_str,
            customer_str,
            reference,
            amount_minor,
            currency,
            due_str,
            status_str,
            fields_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Mark a billable item paid, cancelled, or open again.
  pub async fn set_subject_status(
    &self,
    subject_id: Uuid,
    status: SubjectStatus,
  ) -> Result<bool> {
    let id_str     = encode_uuid(subject_id);
    let status_str = status.as_ref().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE subjects SET status = ?2 WHERE subject_id = ?1",
          rusqlite::params![id_str, status_str],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }

  pub async fn record_payment(&self, payment: &Payment) -> Result<()> {
    let id_str       = encode_uuid(payment.payment_id);
    let tenant_str   = encode_uuid(payment.tenant_id);
    let customer_str = encode_uuid(payment.customer_id);
    let subject_str  = payment.subject_id.map(encode_uuid);
    let amount_minor = payment.amount_minor;
    let at_str       = encode_dt(payment.paid_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO payments (
             payment_id, tenant_id, customer_id, subject_id, amount_minor, paid_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            id_str,
            tenant_str,
            customer_str,
            subject_str,
            amount_minor,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn add_broadcast(&self, broadcast: &Broadcast) -> Result<()> {
    let id_str         = encode_uuid(broadcast.broadcast_id);
    let tenant_str     = encode_uuid(broadcast.tenant_id);
    let name           = broadcast.name.clone();
    let chat_ref       = broadcast.chat_ref.clone();
    let message        = broadcast.message.clone();
    let images_str     = serde_json::to_string(&broadcast.image_urls)?;
    let first_str      = encode_dt(broadcast.first_send_at);
    let recurrence_str = broadcast.recurrence.as_ref().to_owned();
    let status_str     = broadcast.status.as_ref().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO broadcasts (
             broadcast_id, tenant_id, name, chat_ref, message, image_urls,
             first_send_at, recurrence, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            tenant_str,
            name,
            chat_ref,
            message,
            images_str,
            first_str,
            recurrence_str,
            status_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn set_broadcast_status(
    &self,
    broadcast_id: Uuid,
    status: BroadcastStatus,
  ) -> Result<bool> {
    let id_str     = encode_uuid(broadcast_id);
    let status_str = status.as_ref().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE broadcasts SET status = ?2 WHERE broadcast_id = ?1",
          rusqlite::params![id_str, status_str],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }

  /// Insert or replace a message template.
  pub async fn put_template(
    &self,
    tenant_id: Uuid,
    template_ref: impl Into<String>,
    body: impl Into<String>,
  ) -> Result<()> {
    let tenant_str   = encode_uuid(tenant_id);
    let template_ref = template_ref.into();
    let body         = body.into();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO templates (tenant_id, template_ref, body) VALUES (?1, ?2, ?3)
           ON CONFLICT (tenant_id, template_ref) DO UPDATE SET body = excluded.body",
          rusqlite::params![tenant_str, template_ref, body],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Remove a template; rows referencing it fall back to the built-in text.
  pub async fn delete_template(
    &self,
    tenant_id: Uuid,
    template_ref: impl Into<String>,
  ) -> Result<bool> {
    let tenant_str   = encode_uuid(tenant_id);
    let template_ref = template_ref.into();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM templates WHERE tenant_id = ?1 AND template_ref = ?2",
          rusqlite::params![tenant_str, template_ref],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }
}

// ─── ScheduleStore impl ──────────────────────────────────────────────────────

impl ScheduleStore for SqliteStore {
  type Error = Error;

  // ── Tenant settings ───────────────────────────────────────────────────────

  async fn list_tenants(&self) -> Result<Vec<Uuid>> {
    let raws: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT tenant_id FROM tenants ORDER BY created_at")?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn tenant_settings(
    &self,
    tenant_id: Uuid,
    keys: Vec<String>,
  ) -> Result<HashMap<String, String>> {
    let tenant_str = encode_uuid(tenant_id);
    let wanted: HashSet<String> = keys.into_iter().collect();

    let pairs: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT key, value FROM tenant_settings WHERE tenant_id = ?1")?;
        let rows = stmt
          .query_map(rusqlite::params![tenant_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(pairs.into_iter().filter(|(k, _)| wanted.contains(k)).collect())
  }

  // ── Subjects ──────────────────────────────────────────────────────────────

  async fn upcoming_subjects(
    &self,
    tenant_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<Subject>> {
    let tenant_str = encode_uuid(tenant_id);
    let from_str   = encode_date(from);
    let to_str     = encode_date(to);

    let raws: Vec<RawSubject> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUBJECT_COLUMNS} FROM subjects
           WHERE tenant_id = ?1 AND due_date BETWEEN ?2 AND ?3
           ORDER BY due_date"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![tenant_str, from_str, to_str],
            RawSubject::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSubject::into_subject).collect()
  }

  async fn get_subject(&self, subject_id: Uuid) -> Result<Option<Subject>> {
    let id_str = encode_uuid(subject_id);

    let raw: Option<RawSubject> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE subject_id = ?1"),
            rusqlite::params![id_str],
            RawSubject::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSubject::into_subject).transpose()
  }

  async fn terminal_subjects(&self, ids: Vec<Uuid>) -> Result<HashSet<Uuid>> {
    let id_strs: Vec<String> = ids.into_iter().map(encode_uuid).collect();

    let raws: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut found = Vec::new();
        for chunk in id_strs.chunks(IN_CHUNK) {
          let marks = placeholders(chunk.len());
          let sql = format!(
            "SELECT subject_id FROM subjects
               WHERE status IN ('paid', 'cancelled') AND subject_id IN ({marks})
             UNION ALL
             SELECT broadcast_id FROM broadcasts
               WHERE status IN ('paused', 'cancelled') AND broadcast_id IN ({marks})"
          );
          let mut stmt = conn.prepare(&sql)?;
          let rows = stmt
            .query_map(
              rusqlite::params_from_iter(chunk.iter().chain(chunk.iter())),
              |row| row.get(0),
            )?
            .collect::<rusqlite::Result<Vec<String>>>()?;
          found.extend(rows);
        }
        Ok(found)
      })
      .await?;

    raws.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>> {
    let id_str = encode_uuid(customer_id);

    let raw: Option<RawCustomer> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT customer_id, tenant_id, name, chat_ref
             FROM customers WHERE customer_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawCustomer {
                customer_id: row.get(0)?,
                tenant_id:   row.get(1)?,
                name:        row.get(2)?,
                chat_ref:    row.get(3)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCustomer::into_customer).transpose()
  }

  async fn latest_payments(
    &self,
    customer_ids: Vec<Uuid>,
    since: DateTime<Utc>,
  ) -> Result<HashMap<Uuid, DateTime<Utc>>> {
    let id_strs: Vec<String> = customer_ids.into_iter().map(encode_uuid).collect();
    let since_str = encode_dt(since);

    let raws: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut found = Vec::new();
        for chunk in id_strs.chunks(IN_CHUNK) {
          let sql = format!(
            "SELECT customer_id, MAX(paid_at) FROM payments
             WHERE paid_at >= ? AND customer_id IN ({})
             GROUP BY customer_id",
            placeholders(chunk.len())
          );
          let mut stmt = conn.prepare(&sql)?;
          let rows = stmt
            .query_map(
              rusqlite::params_from_iter(std::iter::once(&since_str).chain(chunk.iter())),
              |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          found.extend(rows);
        }
        Ok(found)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, at)| Ok((decode_uuid(&id)?, decode_dt(&at)?)))
      .collect()
  }

  // ── Broadcasts and templates ──────────────────────────────────────────────

  async fn active_broadcasts(&self, tenant_id: Uuid) -> Result<Vec<Broadcast>> {
    let tenant_str = encode_uuid(tenant_id);

    let raws: Vec<RawBroadcast> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {BROADCAST_COLUMNS} FROM broadcasts
           WHERE tenant_id = ?1 AND status = 'active'
           ORDER BY first_send_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![tenant_str], RawBroadcast::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBroadcast::into_broadcast).collect()
  }

  async fn get_broadcast(&self, broadcast_id: Uuid) -> Result<Option<Broadcast>> {
    let id_str = encode_uuid(broadcast_id);

    let raw: Option<RawBroadcast> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {BROADCAST_COLUMNS} FROM broadcasts WHERE broadcast_id = ?1"),
            rusqlite::params![id_str],
            RawBroadcast::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawBroadcast::into_broadcast).transpose()
  }

  async fn get_template(
    &self,
    tenant_id: Uuid,
    template_ref: String,
  ) -> Result<Option<String>> {
    let tenant_str = encode_uuid(tenant_id);

    let body: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT body FROM templates WHERE tenant_id = ?1 AND template_ref = ?2",
            rusqlite::params![tenant_str, template_ref],
            |row| row.get(0),
          )
          .optional()?)
      })
      .await?;
    Ok(body)
  }

  // ── Notifications ─────────────────────────────────────────────────────────

  async fn insert_if_absent(&self, row: ScheduledNotification) -> Result<bool> {
    let raw = RawNotification::encode(&row);

    let inserted = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "INSERT INTO notifications (
             notification_id, tenant_id, subject_id, customer_id, recipient_ref,
             anchor_date, kind, offset_days, scheduled_for, template_ref,
             status, recurrence, last_error, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
           ON CONFLICT DO NOTHING",
          rusqlite::params![
            raw.notification_id,
            raw.tenant_id,
            raw.subject_id,
            raw.customer_id,
            raw.recipient_ref,
            raw.anchor_date,
            raw.kind,
            raw.offset_days,
            raw.scheduled_for,
            raw.template_ref,
            raw.status,
            raw.recurrence,
            raw.last_error,
            raw.created_at,
            raw.updated_at,
          ],
        )?;
        Ok(changed == 1)
      })
      .await?;
    Ok(inserted)
  }

  async fn get_notification(
    &self,
    notification_id: Uuid,
  ) -> Result<Option<ScheduledNotification>> {
    let id_str = encode_uuid(notification_id);

    let raw: Option<RawNotification> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE notification_id = ?1"
            ),
            rusqlite::params![id_str],
            RawNotification::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawNotification::into_notification).transpose()
  }

  async fn list_notifications(
    &self,
    query: NotificationQuery,
  ) -> Result<Vec<ScheduledNotification>> {
    let status_str  = query.status.map(|s| s.as_ref().to_owned());
    let tenant_str  = query.tenant_id.map(encode_uuid);
    let subject_str = query.subject_id.map(encode_uuid);
    let due_str     = query.due_before.map(encode_dt);
    let limit_val   = query.limit.map_or(-1, |l| l as i64);
    let offset_val  = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawNotification> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {NOTIFICATION_COLUMNS} FROM notifications
           WHERE (?1 IS NULL OR status        = ?1)
             AND (?2 IS NULL OR tenant_id     = ?2)
             AND (?3 IS NULL OR subject_id    = ?3)
             AND (?4 IS NULL OR scheduled_for <= ?4)
           ORDER BY scheduled_for, created_at
           LIMIT ?5 OFFSET ?6"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              status_str,
              tenant_str,
              subject_str,
              due_str,
              limit_val,
              offset_val,
            ],
            RawNotification::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawNotification::into_notification).collect()
  }

  async fn blocking_dedup_keys(&self, subject_id: Uuid) -> Result<HashSet<DedupKey>> {
    let id_str = encode_uuid(subject_id);

    let raws: Vec<(String, i32)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT kind, offset_days FROM notifications
           WHERE subject_id = ?1 AND status != 'cancelled'",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(kind, offset_days)| {
        Ok(DedupKey::new(subject_id, decode_enum("kind", &kind)?, offset_days))
      })
      .collect()
  }

  async fn claim(
    &self,
    notification_id: Uuid,
    now: DateTime<Utc>,
    lease: Duration,
  ) -> Result<bool> {
    let id_str      = encode_uuid(notification_id);
    let now_str     = encode_dt(now);
    let expired_str = encode_dt(now - lease);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notifications SET claimed_at = ?2
           WHERE notification_id = ?1
             AND status = 'pending'
             AND (claimed_at IS NULL OR claimed_at <= ?3)",
          rusqlite::params![id_str, now_str, expired_str],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }

  async fn update_status(&self, update: StatusUpdate) -> Result<bool> {
    if !update.status.is_terminal() {
      return Err(Error::NonTerminalUpdate(update.notification_id));
    }

    let id_str     = encode_uuid(update.notification_id);
    let status_str = update.status.as_ref().to_owned();
    let at_str     = encode_dt(update.at);
    let last_error = update.last_error;
    let recipient  = update.recipient_ref;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE notifications
           SET status        = ?2,
               last_error    = ?3,
               recipient_ref = COALESCE(?4, recipient_ref),
               updated_at    = ?5
           WHERE notification_id = ?1 AND status = 'pending'",
          rusqlite::params![id_str, status_str, last_error, recipient, at_str],
        )?)
      })
      .await?;
    Ok(changed == 1)
  }
}
