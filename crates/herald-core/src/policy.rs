//! Policy Resolver: turns a tenant's raw key/value settings into a typed
//! [`NotificationPolicy`].
//!
//! All defensive parsing lives here. A malformed value never aborts
//! generation: it is logged and replaced by its default.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, notification::NotificationKind, store::ScheduleStore};

pub const DEFAULT_OFFSETS_BEFORE: [u32; 2] = [3, 1];
pub const DEFAULT_OFFSETS_AFTER: [u32; 3] = [1, 3, 7];
pub const DEFAULT_SEND_HOUR: u32 = 9;

// ─── Class ───────────────────────────────────────────────────────────────────

/// A family of notifications a tenant switches on and configures as a unit.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationClass {
  /// Before/on/after-due reminders for billable items.
  PaymentReminder,
  /// Group messages from broadcast definitions.
  Broadcast,
}

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPolicy {
  pub class:            NotificationClass,
  pub enabled:          bool,
  pub offsets_before:   BTreeSet<u32>,
  pub send_on_due_date: bool,
  pub offsets_after:    BTreeSet<u32>,
  pub send_time:        NaiveTime,
  /// The tenant's wall-clock offset from UTC.
  pub utc_offset:       FixedOffset,
  pub templates:        BTreeMap<NotificationKind, String>,
}

impl NotificationPolicy {
  /// Defaults for `class`, switched off.
  pub fn defaults(class: NotificationClass) -> Self {
    Self {
      class,
      enabled: false,
      offsets_before: DEFAULT_OFFSETS_BEFORE.into_iter().collect(),
      send_on_due_date: false,
      offsets_after: DEFAULT_OFFSETS_AFTER.into_iter().collect(),
      send_time: default_send_time(),
      utc_offset: utc(),
      templates: BTreeMap::new(),
    }
  }

  /// Every settings key the resolver reads for `class`.
  pub fn setting_keys(class: NotificationClass) -> Vec<String> {
    let mut keys: Vec<String> = [
      "enabled",
      "offsets_before",
      "offsets_after",
      "send_on_due_date",
      "send_time",
      "utc_offset",
    ]
    .iter()
    .map(|k| setting_key(class, k))
    .collect();
    keys.extend(TEMPLATE_KINDS.iter().map(|kind| template_key(class, *kind)));
    keys
  }

  /// Build a policy from raw settings, falling back to defaults for absent
  /// or malformed values.
  pub fn from_settings(
    class: NotificationClass,
    settings: &HashMap<String, String>,
  ) -> Self {
    let mut policy = Self::defaults(class);
    let get = |name: &str| lookup(settings, &setting_key(class, name));

    if let Some(raw) = get("enabled") {
      policy.enabled = recover(class, "enabled", parse_bool(raw), false);
    }
    if let Some(raw) = get("offsets_before") {
      policy.offsets_before = recover(
        class,
        "offsets_before",
        parse_offsets(raw),
        policy.offsets_before,
      );
    }
    if let Some(raw) = get("offsets_after") {
      policy.offsets_after = recover(
        class,
        "offsets_after",
        parse_offsets(raw),
        policy.offsets_after,
      );
    }
    if let Some(raw) = get("send_on_due_date") {
      policy.send_on_due_date =
        recover(class, "send_on_due_date", parse_bool(raw), false);
    }
    if let Some(raw) = get("send_time") {
      policy.send_time =
        recover(class, "send_time", parse_time(raw), default_send_time());
    }
    if let Some(raw) = get("utc_offset") {
      policy.utc_offset = recover(class, "utc_offset", parse_utc_offset(raw), utc());
    }
    for kind in TEMPLATE_KINDS {
      if let Some(template) = lookup(settings, &template_key(class, kind)) {
        policy.templates.insert(kind, template.to_owned());
      }
    }

    policy
  }

  pub fn template_for(&self, kind: NotificationKind) -> Option<&str> {
    self.templates.get(&kind).map(String::as_str)
  }

  /// The UTC instant of `date` at the policy's send time, in the tenant's
  /// offset.
  pub fn schedule_at(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
    date
      .and_time(self.send_time)
      .and_local_timezone(self.utc_offset)
      .single()
      .map(|dt| dt.with_timezone(&Utc))
  }
}

/// Load and parse the policy for one tenant and class.
///
/// A tenant that never enabled the class gets `enabled = false`, which callers
/// must treat as "produce nothing".
pub async fn resolve<S: ScheduleStore>(
  store: &S,
  tenant_id: Uuid,
  class: NotificationClass,
) -> Result<NotificationPolicy, S::Error> {
  let settings = store
    .tenant_settings(tenant_id, NotificationPolicy::setting_keys(class))
    .await?;
  Ok(NotificationPolicy::from_settings(class, &settings))
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

const TEMPLATE_KINDS: [NotificationKind; 3] = [
  NotificationKind::BeforeDue,
  NotificationKind::OnDue,
  NotificationKind::AfterDue,
];

fn setting_key(class: NotificationClass, name: &str) -> String {
  format!("{class}.{name}")
}

fn template_key(class: NotificationClass, kind: NotificationKind) -> String {
  format!("{class}.template.{kind}")
}

fn lookup<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
  settings.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn default_send_time() -> NaiveTime {
  NaiveTime::from_hms_opt(DEFAULT_SEND_HOUR, 0, 0).unwrap_or_default()
}

fn utc() -> FixedOffset { Utc.fix() }

fn recover<T>(
  class: NotificationClass,
  name: &str,
  parsed: Result<T, Error>,
  default: T,
) -> T {
  match parsed {
    Ok(value) => value,
    Err(e) => {
      tracing::warn!(%class, setting = name, error = %e, "using default");
      default
    }
  }
}

fn parse_bool(raw: &str) -> Result<bool, Error> {
  match raw.to_ascii_lowercase().as_str() {
    "true" | "1" | "yes" | "on" => Ok(true),
    "false" | "0" | "no" | "off" => Ok(false),
    other => Err(Error::Configuration(format!("not a boolean: {other:?}"))),
  }
}

/// Longest offset a policy may ask for, in days.
pub const MAX_OFFSET_DAYS: u32 = 3650;

/// Accepts a JSON array (`[3, 1]`) or a comma list (`3,1`). Zeros are
/// dropped; duplicates collapse.
fn parse_offsets(raw: &str) -> Result<BTreeSet<u32>, Error> {
  let values: Vec<i64> = if raw.starts_with('[') {
    serde_json::from_str(raw)?
  } else {
    raw
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(|s| {
        s.parse::<i64>()
          .map_err(|_| Error::Configuration(format!("not a day count: {s:?}")))
      })
      .collect::<Result<_, _>>()?
  };

  values
    .into_iter()
    .filter(|d| *d != 0)
    .map(|d| match u32::try_from(d) {
      Ok(days) if days <= MAX_OFFSET_DAYS => Ok(days),
      Ok(_) => Err(Error::Configuration(format!(
        "day offset {d} exceeds {MAX_OFFSET_DAYS}"
      ))),
      Err(_) => Err(Error::Configuration(format!("negative day offset: {d}"))),
    })
    .collect()
}

fn parse_time(raw: &str) -> Result<NaiveTime, Error> {
  NaiveTime::parse_from_str(raw, "%H:%M")
    .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    .map_err(|e| Error::Configuration(format!("bad send time {raw:?}: {e}")))
}

fn parse_utc_offset(raw: &str) -> Result<FixedOffset, Error> {
  if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
    return Ok(utc());
  }
  raw
    .parse::<FixedOffset>()
    .map_err(|e| Error::Configuration(format!("bad utc offset {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
      .collect()
  }

  #[test]
  fn absent_settings_give_disabled_defaults() {
    let p = NotificationPolicy::from_settings(
      NotificationClass::PaymentReminder,
      &HashMap::new(),
    );
    assert!(!p.enabled);
    assert_eq!(p.offsets_before, BTreeSet::from([1, 3]));
    assert_eq!(p.offsets_after, BTreeSet::from([1, 3, 7]));
    assert!(!p.send_on_due_date);
    assert_eq!(p.send_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
  }

  #[test]
  fn parses_configured_values() {
    let p = NotificationPolicy::from_settings(
      NotificationClass::PaymentReminder,
      &settings(&[
        ("payment_reminder.enabled", "true"),
        ("payment_reminder.offsets_before", "[5, 2, 5]"),
        ("payment_reminder.offsets_after", "2, 4"),
        ("payment_reminder.send_on_due_date", "yes"),
        ("payment_reminder.send_time", "08:30"),
        ("payment_reminder.utc_offset", "+07:00"),
        ("payment_reminder.template.after_due", "overdue-v2"),
      ]),
    );
    assert!(p.enabled);
    assert_eq!(p.offsets_before, BTreeSet::from([2, 5]));
    assert_eq!(p.offsets_after, BTreeSet::from([2, 4]));
    assert!(p.send_on_due_date);
    assert_eq!(p.send_time, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    assert_eq!(p.utc_offset.local_minus_utc(), 7 * 3600);
    assert_eq!(p.template_for(NotificationKind::AfterDue), Some("overdue-v2"));
    assert_eq!(p.template_for(NotificationKind::BeforeDue), None);
  }

  #[test]
  fn malformed_lists_fall_back_to_defaults() {
    let p = NotificationPolicy::from_settings(
      NotificationClass::PaymentReminder,
      &settings(&[
        ("payment_reminder.enabled", "true"),
        ("payment_reminder.offsets_before", "[3, \"x\""),
        ("payment_reminder.offsets_after", "1,-2"),
        ("payment_reminder.send_time", "nine o'clock"),
      ]),
    );
    assert!(p.enabled);
    assert_eq!(p.offsets_before, BTreeSet::from([1, 3]));
    assert_eq!(p.offsets_after, BTreeSet::from([1, 3, 7]));
    assert_eq!(p.send_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
  }

  #[test]
  fn oversized_offsets_fall_back_to_defaults() {
    assert!(parse_offsets("[2147483648]").is_err());
    assert!(parse_offsets("1, 3651").is_err());
    assert_eq!(parse_offsets("3650").unwrap(), BTreeSet::from([3650]));

    let p = NotificationPolicy::from_settings(
      NotificationClass::PaymentReminder,
      &settings(&[
        ("payment_reminder.enabled", "true"),
        ("payment_reminder.offsets_before", "[2147483648]"),
      ]),
    );
    assert_eq!(p.offsets_before, BTreeSet::from([1, 3]));
  }

  #[test]
  fn zero_offsets_are_dropped() {
    assert_eq!(parse_offsets("0, 2").unwrap(), BTreeSet::from([2]));
  }

  #[test]
  fn classes_are_keyed_separately() {
    let p = NotificationPolicy::from_settings(
      NotificationClass::Broadcast,
      &settings(&[("payment_reminder.enabled", "true")]),
    );
    assert!(!p.enabled);
    assert!(
      NotificationPolicy::setting_keys(NotificationClass::Broadcast)
        .contains(&"broadcast.enabled".to_owned())
    );
  }

  #[test]
  fn schedule_at_honours_utc_offset() {
    let mut p = NotificationPolicy::defaults(NotificationClass::PaymentReminder);
    p.utc_offset = FixedOffset::east_opt(7 * 3600).unwrap();
    let at = p
      .schedule_at(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap())
      .unwrap();
    assert_eq!(at.to_rfc3339(), "2024-03-10T02:00:00+00:00");
  }
}
