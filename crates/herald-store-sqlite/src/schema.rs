//! SQL schema for the Herald SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tenants (
    tenant_id   TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Raw key/value configuration; parsed by the policy resolver.
CREATE TABLE IF NOT EXISTS tenant_settings (
    tenant_id   TEXT NOT NULL REFERENCES tenants(tenant_id),
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (tenant_id, key)
);

CREATE TABLE IF NOT EXISTS customers (
    customer_id TEXT PRIMARY KEY,
    tenant_id   TEXT NOT NULL REFERENCES tenants(tenant_id),
    name        TEXT NOT NULL,
    chat_ref    TEXT
);

CREATE TABLE IF NOT EXISTS subjects (
    subject_id   TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL REFERENCES tenants(tenant_id),
    customer_id  TEXT REFERENCES customers(customer_id),
    reference    TEXT NOT NULL,
    amount_minor INTEGER,
    currency     TEXT NOT NULL,
    due_date     TEXT,                        -- YYYY-MM-DD or NULL
    status       TEXT NOT NULL DEFAULT 'open', -- 'open' | 'paid' | 'cancelled'
    fields       TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS payments (
    payment_id   TEXT PRIMARY KEY,
    tenant_id    TEXT NOT NULL REFERENCES tenants(tenant_id),
    customer_id  TEXT NOT NULL REFERENCES customers(customer_id),
    subject_id   TEXT REFERENCES subjects(subject_id),
    amount_minor INTEGER NOT NULL,
    paid_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS broadcasts (
    broadcast_id  TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL REFERENCES tenants(tenant_id),
    name          TEXT NOT NULL,
    chat_ref      TEXT NOT NULL,
    message       TEXT NOT NULL,
    image_urls    TEXT NOT NULL DEFAULT '[]',
    first_send_at TEXT NOT NULL,
    recurrence    TEXT NOT NULL DEFAULT 'none',
    status        TEXT NOT NULL DEFAULT 'active' -- 'active' | 'paused' | 'cancelled'
);

CREATE TABLE IF NOT EXISTS templates (
    tenant_id    TEXT NOT NULL REFERENCES tenants(tenant_id),
    template_ref TEXT NOT NULL,
    body         TEXT NOT NULL,
    PRIMARY KEY (tenant_id, template_ref)
);

-- Rows are never deleted. status moves once, from 'pending' to
-- 'sent' | 'cancelled' | 'failed'.
-- subject_id points at either subjects or broadcasts, so it carries no FK.
CREATE TABLE IF NOT EXISTS notifications (
    notification_id TEXT PRIMARY KEY,
    tenant_id       TEXT NOT NULL,
    subject_id      TEXT NOT NULL,
    customer_id     TEXT,
    recipient_ref   TEXT,
    anchor_date     TEXT NOT NULL,
    kind            TEXT NOT NULL,
    offset_days     INTEGER NOT NULL,
    scheduled_for   TEXT NOT NULL,
    template_ref    TEXT,
    status          TEXT NOT NULL,
    recurrence      TEXT NOT NULL DEFAULT 'none',
    last_error      TEXT,
    claimed_at      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

-- The dedup contract: one active row per (subject, kind, offset).
CREATE UNIQUE INDEX IF NOT EXISTS notifications_active_dedup_idx
    ON notifications(subject_id, kind, offset_days)
    WHERE status IN ('pending', 'sent');

CREATE INDEX IF NOT EXISTS notifications_due_idx     ON notifications(status, scheduled_for);
CREATE INDEX IF NOT EXISTS notifications_subject_idx ON notifications(subject_id);
CREATE INDEX IF NOT EXISTS subjects_due_idx          ON subjects(tenant_id, due_date);
CREATE INDEX IF NOT EXISTS payments_customer_idx     ON payments(customer_id, paid_at);

PRAGMA user_version = 1;
";
