//! Engine tuning and job cadence, deserialised from the `engine` and
//! `schedule` sections of the worker config.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset as _, Timelike as _, Utc};
use serde::Deserialize;

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Days before today whose due dates are still considered, so items that
  /// just went overdue get their after-due reminders.
  pub window_past_days:      u32,
  pub window_future_days:    u32,
  /// How far back a customer payment counts for cancelling reminders.
  pub payment_lookback_days: u32,
  /// Subjects or rows processed at once.
  pub concurrency:           usize,
  pub send_timeout_secs:     u64,
  pub claim_lease_secs:      u64,
  pub dispatch_batch_limit:  usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      window_past_days:      30,
      window_future_days:    30,
      payment_lookback_days: 3,
      concurrency:           8,
      send_timeout_secs:     30,
      claim_lease_secs:      300,
      dispatch_batch_limit:  500,
    }
  }
}

impl EngineConfig {
  pub fn send_timeout(&self) -> Duration { Duration::from_secs(self.send_timeout_secs) }

  pub fn claim_lease(&self) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(self.claim_lease_secs).unwrap_or(i64::MAX))
  }

  pub(crate) fn fan_out(&self) -> usize { self.concurrency.max(1) }
}

// ─── Schedule ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  pub dispatch_interval_secs:  u64,
  /// Reconcile cadence inside business hours.
  pub business_interval_secs:  u64,
  pub off_hours_interval_secs: u64,
  /// Business hours are `[business_start_hour, business_end_hour)` local.
  pub business_start_hour:     u32,
  pub business_end_hour:       u32,
  /// e.g. `"+07:00"`.
  pub utc_offset:              String,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      dispatch_interval_secs:  60,
      business_interval_secs:  300,
      off_hours_interval_secs: 3600,
      business_start_hour:     8,
      business_end_hour:       20,
      utc_offset:              "+00:00".into(),
    }
  }
}

impl ScheduleConfig {
  pub fn dispatch_interval(&self) -> Duration {
    Duration::from_secs(self.dispatch_interval_secs.max(1))
  }

  /// The configured offset, or UTC if it does not parse.
  pub fn offset(&self) -> FixedOffset {
    self.utc_offset.parse().unwrap_or_else(|_| {
      tracing::warn!(utc_offset = %self.utc_offset, "invalid schedule offset, using UTC");
      Utc.fix()
    })
  }

  pub fn is_business_hours(&self, now: DateTime<Utc>) -> bool {
    let hour = now.with_timezone(&self.offset()).hour();
    (self.business_start_hour..self.business_end_hour).contains(&hour)
  }

  /// How long to wait before the next reconcile pass.
  pub fn reconcile_interval(&self, now: DateTime<Utc>) -> Duration {
    let secs = if self.is_business_hours(now) {
      self.business_interval_secs
    } else {
      self.off_hours_interval_secs
    };
    Duration::from_secs(secs.max(1))
  }
}
