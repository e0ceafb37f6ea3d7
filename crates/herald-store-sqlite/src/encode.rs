//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that lexical order in SQL equals time order.
//! Dates are `YYYY-MM-DD`. Enums use their `snake_case`/`lowercase` names.
//! Maps and lists are compact JSON. UUIDs are hyphenated lowercase strings.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use herald_core::{
  notification::ScheduledNotification,
  subject::{Broadcast, Customer, Subject},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

/// Parse any strum-backed enum column.
pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::Decode {
    column,
    value: s.to_owned(),
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const NOTIFICATION_COLUMNS: &str = "notification_id, tenant_id, subject_id, \
   customer_id, recipient_ref, anchor_date, kind, offset_days, scheduled_for, \
   template_ref, status, recurrence, last_error, created_at, updated_at";

/// Raw values read directly from a `notifications` row.
pub struct RawNotification {
  pub notification_id: String,
  pub tenant_id:       String,
  pub subject_id:      String,
  pub customer_id:     Option<String>,
  pub recipient_ref:   Option<String>,
  pub anchor_date:     String,
  pub kind:            String,
  pub offset_days:     i32,
  pub scheduled_for:   String,
  pub template_ref:    Option<String>,
  pub status:          String,
  pub recurrence:      String,
  pub last_error:      Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawNotification {
  /// Map a row selected with [`NOTIFICATION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      notification_id: row.get(0)?,
      tenant_id:       row.get(1)?,
      subject_id:      row.get(2)?,
      customer_id:     row.get(3)?,
      recipient_ref:   row.get(4)?,
      anchor_date:     row.get(5)?,
      kind:            row.get(6)?,
      offset_days:     row.get(7)?,
      scheduled_for:   row.get(8)?,
      template_ref:    row.get(9)?,
      status:          row.get(10)?,
      recurrence:      row.get(11)?,
      last_error:      row.get(12)?,
      created_at:      row.get(13)?,
      updated_at:      row.get(14)?,
    })
  }

  pub fn encode(n: &ScheduledNotification) -> Self {
    Self {
      notification_id: encode_uuid(n.notification_id),
      tenant_id:       encode_uuid(n.tenant_id),
      subject_id:      encode_uuid(n.subject_id),
      customer_id:     n.customer_id.map(encode_uuid),
      recipient_ref:   n.recipient_ref.clone(),
      anchor_date:     encode_date(n.anchor_date),
      kind:            n.kind.as_ref().to_owned(),
      offset_days:     n.offset_days,
      scheduled_for:   encode_dt(n.scheduled_for),
      template_ref:    n.template_ref.clone(),
      status:          n.status.as_ref().to_owned(),
      recurrence:      n.recurrence.as_ref().to_owned(),
      last_error:      n.last_error.clone(),
      created_at:      encode_dt(n.created_at),
      updated_at:      encode_dt(n.updated_at),
    }
  }

  pub fn into_notification(self) -> Result<ScheduledNotification> {
    Ok(ScheduledNotification {
      notification_id: decode_uuid(&self.notification_id)?,
      tenant_id:       decode_uuid(&self.tenant_id)?,
      subject_id:      decode_uuid(&self.subject_id)?,
      customer_id:     decode_opt_uuid(self.customer_id)?,
      recipient_ref:   self.recipient_ref,
      anchor_date:     decode_date(&self.anchor_date)?,
      kind:            decode_enum("kind", &self.kind)?,
      offset_days:     self.offset_days,
      scheduled_for:   decode_dt(&self.scheduled_for)?,
      template_ref:    self.template_ref,
      status:          decode_enum("status", &self.status)?,
      recurrence:      decode_enum("recurrence", &self.recurrence)?,
      last_error:      self.last_error,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

pub const SUBJECT_COLUMNS: &str = "subject_id, tenant_id, customer_id, \
   reference, amount_minor, currency, due_date, status, fields";

/// Raw values read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:   String,
  pub tenant_id:    String,
  pub customer_id:  Option<String>,
  pub reference:    String,
  pub amount_minor: Option<i64>,
  pub currency:     String,
  pub due_date:     Option<String>,
  pub status:       String,
  pub fields:       String,
}

impl RawSubject {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:   row.get(0)?,
      tenant_id:    row.get(1)?,
      customer_id:  row.get(2)?,
      reference:    row.get(3)?,
      amount_minor: row.get(4)?,
      currency:     row.get(5)?,
      due_date:     row.get(6)?,
      status:       row.get(7)?,
      fields:       row.get(8)?,
    })
  }

  pub fn into_subject(self) -> Result<Subject> {
    let fields: BTreeMap<String, String> = serde_json::from_str(&self.fields)?;
    Ok(Subject {
      subject_id: decode_uuid(&self.subject_id)?,
      tenant_id: decode_uuid(&self.tenant_id)?,
      customer_id: decode_opt_uuid(self.customer_id)?,
      reference: self.reference,
      amount_minor: self.amount_minor,
      currency: self.currency,
      due_date: self.due_date.as_deref().map(decode_date).transpose()?,
      status: decode_enum("subject status", &self.status)?,
      fields,
    })
  }
}

pub const BROADCAST_COLUMNS: &str = "broadcast_id, tenant_id, name, chat_ref, \
   message, image_urls, first_send_at, recurrence, status";

/// Raw values read directly from a `broadcasts` row.
pub struct RawBroadcast {
  pub broadcast_id:  String,
  pub tenant_id:     String,
  pub name:          String,
  pub chat_ref:      String,
  pub message:       String,
  pub image_urls:    String,
  pub first_send_at: String,
  pub recurrence:    String,
  pub status:        String,
}

impl RawBroadcast {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      broadcast_id:  row.get(0)?,
      tenant_id:     row.get(1)?,
      name:          row.get(2)?,
      chat_ref:      row.get(3)?,
      message:       row.get(4)?,
      image_urls:    row.get(5)?,
      first_send_at: row.get(6)?,
      recurrence:    row.get(7)?,
      status:        row.get(8)?,
    })
  }

  pub fn into_broadcast(self) -> Result<Broadcast> {
    Ok(Broadcast {
      broadcast_id:  decode_uuid(&self.broadcast_id)?,
      tenant_id:     decode_uuid(&self.tenant_id)?,
      name:          self.name,
      chat_ref:      self.chat_ref,
      message:       self.message,
      image_urls:    serde_json::from_str(&self.image_urls)?,
      first_send_at: decode_dt(&self.first_send_at)?,
      recurrence:    decode_enum("recurrence", &self.recurrence)?,
      status:        decode_enum("broadcast status", &self.status)?,
    })
  }
}

/// Raw values read directly from a `customers` row.
pub struct RawCustomer {
  pub customer_id: String,
  pub tenant_id:   String,
  pub name:        String,
  pub chat_ref:    Option<String>,
}

impl RawCustomer {
  pub fn into_customer(self) -> Result<Customer> {
    Ok(Customer {
      customer_id: decode_uuid(&self.customer_id)?,
      tenant_id:   decode_uuid(&self.tenant_id)?,
      name:        self.name,
      chat_ref:    self.chat_ref,
    })
  }
}
