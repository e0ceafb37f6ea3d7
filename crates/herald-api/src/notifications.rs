//! Handlers for `/notifications` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/notifications` | `?status=&tenant=&subject=&limit=&offset=` |
//! | `GET`  | `/notifications/:id` | 404 if not found |
//! | `POST` | `/notifications/:id/cancel` | 409 unless pending |
//! | `POST` | `/notifications/:id/requeue` | 409 unless failed, or if the slot is taken |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use herald_core::{
  notification::{NotificationStatus, ScheduledNotification, StatusUpdate},
  store::{NotificationQuery, ScheduleStore},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status:  Option<NotificationStatus>,
  pub tenant:  Option<Uuid>,
  pub subject: Option<Uuid>,
  pub limit:   Option<usize>,
  pub offset:  Option<usize>,
}

/// `GET /notifications`
pub async fn list<S>(
  State(store): State<Arc<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ScheduledNotification>>, ApiError>
where
  S: ScheduleStore,
{
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
  if limit > MAX_LIMIT {
    return Err(ApiError::BadRequest(format!("limit must be at most {MAX_LIMIT}")));
  }

  let rows = store
    .list_notifications(NotificationQuery {
      status: params.status,
      tenant_id: params.tenant,
      subject_id: params.subject,
      due_before: None,
      limit: Some(limit),
      offset: params.offset,
    })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(rows))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /notifications/:id`
pub async fn get_one<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ScheduledNotification>, ApiError>
where
  S: ScheduleStore,
{
  Ok(Json(fetch(&*store, id).await?))
}

// ─── Cancel ───────────────────────────────────────────────────────────────────

/// `POST /notifications/:id/cancel`
pub async fn cancel<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ScheduledNotification>, ApiError>
where
  S: ScheduleStore,
{
  let row = fetch(&*store, id).await?;
  row.check_transition(NotificationStatus::Cancelled)?;

  let moved = store
    .update_status(StatusUpdate::cancelled(id, "cancelled by operator", Utc::now()))
    .await
    .map_err(ApiError::store)?;
  if !moved {
    return Err(ApiError::Conflict(format!("notification {id} is no longer pending")));
  }

  tracing::info!(notification_id = %id, "cancelled by operator");
  Ok(Json(fetch(&*store, id).await?))
}

// ─── Requeue ──────────────────────────────────────────────────────────────────

/// `POST /notifications/:id/requeue`
///
/// A failed row gets a fresh pending copy due now. The failed row itself stays as it is.
pub async fn requeue<S>(
  State(store): State<Arc<S>>,
  Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ScheduleStore,
{
  let row = fetch(&*store, id).await?;
  let fresh = row.requeue(Utc::now())?;

  let inserted = store
    .insert_if_absent(fresh.clone())
    .await
    .map_err(ApiError::store)?;
  if !inserted {
    return Err(herald_core::Error::Conflict(fresh.dedup_key()).into());
  }

  tracing::info!(
    notification_id = %id,
    requeued_as = %fresh.notification_id,
    "requeued by operator"
  );
  Ok((StatusCode::CREATED, Json(fresh)))
}

async fn fetch<S: ScheduleStore>(
  store: &S,
  id: Uuid,
) -> Result<ScheduledNotification, ApiError> {
  store
    .get_notification(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("notification {id} not found")))
}
