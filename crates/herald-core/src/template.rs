//! Template Renderer.
//!
//! Templates are plain text with `{{ name }}` placeholders. Rendering is a pure
//! substitution: known names are replaced, unknown placeholders are left in
//! the output verbatim so a typo is visible rather than silently blanked.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Timelike};

use crate::{
  notification::{NotificationKind, ScheduledNotification},
  subject::{Broadcast, Customer, Subject},
};

/// Named values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars(BTreeMap<String, String>);

impl TemplateVars {
  pub fn new() -> Self { Self::default() }

  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
    self.0.insert(name.into(), value.into());
    self
  }

  pub fn get(&self, name: &str) -> Option<&str> { self.0.get(name).map(String::as_str) }

  /// Variables for a payment reminder. Subject fields are added first so the
  /// built-in names always win.
  pub fn for_reminder(
    subject: &Subject,
    customer: Option<&Customer>,
    row: &ScheduledNotification,
    now: DateTime<FixedOffset>,
  ) -> Self {
    let mut vars = Self::new();
    for (name, value) in &subject.fields {
      vars.set(name.clone(), value.clone());
    }

    let days = (now.date_naive() - row.anchor_date).num_days();
    vars
      .set("greeting", greeting(now.hour()))
      .set(
        "customer_name",
        customer.map(|c| c.name.clone()).unwrap_or_else(|| "Customer".into()),
      )
      .set("reference", subject.reference.clone())
      .set("amount", subject.formatted_amount().unwrap_or_default())
      .set("currency", subject.currency.clone())
      .set("due_date", row.anchor_date.format("%Y-%m-%d").to_string())
      .set("days_overdue", days.max(0).to_string())
      .set("days_until_due", (-days).max(0).to_string());
    vars
  }

  pub fn for_broadcast(broadcast: &Broadcast, now: DateTime<FixedOffset>) -> Self {
    let mut vars = Self::new();
    vars
      .set("greeting", greeting(now.hour()))
      .set("group_name", broadcast.name.clone())
      .set("date", now.format("%Y-%m-%d").to_string());
    vars
  }
}

/// A greeting for the local hour of day.
pub fn greeting(hour: u32) -> &'static str {
  match hour {
    5..=11 => "Good morning",
    12..=17 => "Good afternoon",
    _ => "Good evening",
  }
}

/// The built-in message used when a row has no template or its template no
/// longer exists.
pub fn default_template(kind: NotificationKind) -> &'static str {
  match kind {
    NotificationKind::BeforeDue => {
      "{{greeting}} {{customer_name}}, a reminder that {{reference}} for \
       {{amount}} {{currency}} is due on {{due_date}} ({{days_until_due}} \
       day(s) left)."
    }
    NotificationKind::OnDue => {
      "{{greeting}} {{customer_name}}, {{reference}} for {{amount}} \
       {{currency}} is due today."
    }
    NotificationKind::AfterDue => {
      "{{greeting}} {{customer_name}}, {{reference}} for {{amount}} \
       {{currency}} was due on {{due_date}} and is {{days_overdue}} day(s) \
       overdue. Please arrange payment."
    }
    NotificationKind::Broadcast => "{{greeting}} {{group_name}}!",
  }
}

/// Substitute `{{ name }}` placeholders in `template` from `vars`.
pub fn render(template: &str, vars: &TemplateVars) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(start) = rest.find("{{") {
    out.push_str(&rest[..start]);
    let after_open = &rest[start + 2..];

    let Some(end) = after_open.find("}}") else {
      out.push_str(&rest[start..]);
      return out;
    };

    let name = after_open[..end].trim();
    match vars.get(name).filter(|_| is_identifier(name)) {
      Some(value) => out.push_str(value),
      None => out.push_str(&rest[start..start + 2 + end + 2]),
    }
    rest = &after_open[end + 2..];
  }

  out.push_str(rest);
  out
}

fn is_identifier(name: &str) -> bool {
  !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
