//! Subjects (the billable items and broadcast definitions notifications are
//! about) plus the customer records recipients are resolved from.
//!
//! These are owned by the surrounding billing system; the engine only reads
//! them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::recurrence::Recurrence;

// ─── Billable items ──────────────────────────────────────────────────────────

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubjectStatus {
  Open,
  Paid,
  Cancelled,
}

impl SubjectStatus {
  /// Paid and cancelled items need no further reminders.
  pub fn is_terminal(self) -> bool { !matches!(self, Self::Open) }
}

/// A billable item: an invoice, a subscription period, a debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:    Uuid,
  pub tenant_id:     Uuid,
  pub customer_id:   Option<Uuid>,
  /// Human-facing identifier, e.g. an invoice number.
  pub reference:     String,
  pub amount_minor:  Option<i64>,
  pub currency:      String,
  /// Not every item has a due date yet; those generate nothing.
  pub due_date:      Option<NaiveDate>,
  pub status:        SubjectStatus,
  /// Free-form values exposed to templates under their own names.
  #[serde(default)]
  pub fields:        BTreeMap<String, String>,
}

impl Subject {
  /// `amount_minor` rendered with two decimals, e.g. `1250.00`.
  pub fn formatted_amount(&self) -> Option<String> {
    self.amount_minor.map(|minor| {
      let sign = if minor < 0 { "-" } else { "" };
      let abs = minor.unsigned_abs();
      format!("{sign}{}.{:02}", abs / 100, abs % 100)
    })
  }
}

/// The person or company a billable item belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
  pub customer_id: Uuid,
  pub tenant_id:   Uuid,
  pub name:        String,
  /// Chat identifier on the messaging channel, if the customer linked one.
  pub chat_ref:    Option<String>,
}

/// A recorded payment, as reported by the payment gateway integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub payment_id:   Uuid,
  pub tenant_id:    Uuid,
  pub customer_id:  Uuid,
  pub subject_id:   Option<Uuid>,
  pub amount_minor: i64,
  pub paid_at:      DateTime<Utc>,
}

// ─── Broadcasts ──────────────────────────────────────────────────────────────

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BroadcastStatus {
  Active,
  Paused,
  Cancelled,
}

impl BroadcastStatus {
  pub fn is_terminal(self) -> bool { !matches!(self, Self::Active) }
}

/// A (possibly recurring) message to a group chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
  pub broadcast_id:  Uuid,
  pub tenant_id:     Uuid,
  pub name:          String,
  pub chat_ref:      String,
  /// Message text; itself a template.
  pub message:       String,
  /// Sent in order before the text, or as its carrier when there is one.
  #[serde(default)]
  pub image_urls:    Vec<String>,
  /// Origin of the series.
  pub first_send_at: DateTime<Utc>,
  pub recurrence:    Recurrence,
  pub status:        BroadcastStatus,
}
