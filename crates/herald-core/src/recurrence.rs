//! Recurrence arithmetic for broadcast series.
//!
//! A series is identified by its origin (the first send time). Daily and
//! weekly steps are fixed durations; monthly steps are always computed from
//! the origin so that day-of-month clamping (Jan 31 → Feb 29) never drifts
//! into later months.

use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
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
pub enum Recurrence {
  #[default]
  None,
  Daily,
  Weekly,
  Monthly,
}

impl Recurrence {
  pub fn is_recurring(self) -> bool { !matches!(self, Self::None) }

  fn fixed_step(self) -> Option<Duration> {
    match self {
      Self::Daily => Some(Duration::days(1)),
      Self::Weekly => Some(Duration::days(7)),
      Self::None | Self::Monthly => None,
    }
  }

  /// The occurrence that follows `current` in the series started at
  /// `origin`. `None` for non-recurring series or on calendar overflow.
  pub fn next_after(
    self,
    origin: DateTime<Utc>,
    current: DateTime<Utc>,
  ) -> Option<DateTime<Utc>> {
    match self {
      Self::None => None,
      Self::Daily | Self::Weekly => {
        current.checked_add_signed(self.fixed_step()?)
      }
      Self::Monthly => {
        let n = months_between(origin, current).checked_add(1)?;
        origin.checked_add_months(Months::new(n))
      }
    }
  }

  /// The earliest occurrence of the series that is not before `at`.
  ///
  /// For a non-recurring series this is the origin itself, or nothing once
  /// the origin has passed.
  pub fn first_at_or_after(
    self,
    origin: DateTime<Utc>,
    at: DateTime<Utc>,
  ) -> Option<DateTime<Utc>> {
    if origin >= at {
      return Some(origin);
    }
    match self {
      Self::None => None,
      Self::Daily | Self::Weekly => {
        let step = self.fixed_step()?.num_seconds();
        let elapsed = (at - origin).num_seconds();
        let steps = (elapsed + step - 1) / step;
        origin.checked_add_signed(Duration::seconds(steps.checked_mul(step)?))
      }
      Self::Monthly => {
        let n = months_between(origin, at);
        let candidate = origin.checked_add_months(Months::new(n))?;
        if candidate >= at {
          Some(candidate)
        } else {
          origin.checked_add_months(Months::new(n.checked_add(1)?))
        }
      }
    }
  }
}

/// Whole calendar months from `origin` to `current`, ignoring the day.
fn months_between(origin: DateTime<Utc>, current: DateTime<Utc>) -> u32 {
  let months = (current.year() - origin.year()) * 12
    + (current.month() as i32 - origin.month() as i32);
  months.max(0) as u32
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
  }

  #[test]
  fn none_never_advances() {
    let origin = at(2024, 1, 1, 9);
    assert_eq!(Recurrence::None.next_after(origin, origin), None);
  }

  #[test]
  fn weekly_advances_seven_days() {
    let origin = at(2024, 1, 1, 9);
    assert_eq!(
      Recurrence::Weekly.next_after(origin, origin),
      Some(at(2024, 1, 8, 9))
    );
  }

  #[test]
  fn daily_crosses_month_boundary() {
    let origin = at(2024, 1, 31, 9);
    assert_eq!(
      Recurrence::Daily.next_after(origin, origin),
      Some(at(2024, 2, 1, 9))
    );
  }

  #[test]
  fn monthly_clamps_without_drift() {
    let origin = at(2024, 1, 31, 9);
    let feb = Recurrence::Monthly.next_after(origin, origin).unwrap();
    assert_eq!(feb, at(2024, 2, 29, 9));
    let mar = Recurrence::Monthly.next_after(origin, feb).unwrap();
    assert_eq!(mar, at(2024, 3, 31, 9));
  }

  #[test]
  fn first_at_or_after_rolls_forward() {
    let origin = at(2024, 1, 1, 9);
    assert_eq!(
      Recurrence::Weekly.first_at_or_after(origin, at(2024, 1, 10, 0)),
      Some(at(2024, 1, 15, 9))
    );
    assert_eq!(
      Recurrence::Daily.first_at_or_after(origin, at(2024, 1, 3, 9)),
      Some(at(2024, 1, 3, 9))
    );
    assert_eq!(
      Recurrence::Monthly.first_at_or_after(origin, at(2024, 3, 2, 0)),
      Some(at(2024, 4, 1, 9))
    );
  }

  #[test]
  fn first_at_or_after_non_recurring() {
    let origin = at(2024, 1, 1, 9);
    assert_eq!(
      Recurrence::None.first_at_or_after(origin, at(2023, 12, 1, 0)),
      Some(origin)
    );
    assert_eq!(
      Recurrence::None.first_at_or_after(origin, at(2024, 1, 2, 0)),
      None
    );
  }
}
