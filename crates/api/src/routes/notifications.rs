//! Notification routes: create from a template, read, dispatch.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{DispatchOutcome, Notification, RecipientTarget};
use herald_store::{NotificationRepository, TemplateRepository};

use crate::state::AppState;

/// Upper bound for one dispatch request.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", post(create_notification))
        .route("/api/notifications/{id}", get(get_notification))
        .route("/api/notifications/{id}/dispatch", post(dispatch_notification))
}

/// Parameters for creating a notification from a template.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationParams {
    pub template_id: Uuid,
    /// Values substituted into the template.
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub target: RecipientTarget,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub notification: Notification,
    pub outcomes: Vec<DispatchOutcome>,
}

/// `POST /api/notifications`: Render a template and store a pending notification.
async fn create_notification(
    State(state): State<AppState>,
    Json(params): Json<CreateNotificationParams>,
) -> Result<Json<Notification>, AppError> {
    let template = TemplateRepository::get(&state.pool, params.template_id).await?;
    if !template.is_active {
        return Err(AppError::Validation(format!(
            "Template {} is not active",
            template.id
        )));
    }

    let rendered = state
        .renderer
        .render(&template, &params.context)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let mut notification = Notification::new(rendered.text, params.target);
    notification.template_id = Some(template.id);
    notification.subject = Some(rendered.subject).filter(|s| !s.is_empty());
    notification.html = Some(rendered.html).filter(|h| !h.is_empty());

    let saved = NotificationRepository::insert(&state.pool, &notification).await?;
    Ok(Json(saved))
}

/// `GET /api/notifications/{id}`: Get one notification with its delivery log.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    let notification = NotificationRepository::get(&state.pool, id).await?;
    Ok(Json(notification))
}

/// `POST /api/notifications/{id}/dispatch`: Deliver a pending notification.
///
/// The row is locked for the whole attempt, so a second request for the same
/// notification gets a conflict instead of sending again. Already settled
/// notifications are returned unchanged.
async fn dispatch_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchResponse>, AppError> {
    let mut tx = state.pool.begin().await?;
    let Some(mut notification) = NotificationRepository::claim_pending(&mut tx, id).await? else {
        tx.rollback().await?;
        let notification = NotificationRepository::get(&state.pool, id).await?;
        if !notification.state.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Notification {id} is already being dispatched"
            )));
        }
        tracing::debug!(
            notification_id = %id,
            state = %notification.state,
            "Dispatch requested for settled notification"
        );
        return Ok(Json(DispatchResponse {
            notification,
            outcomes: Vec::new(),
        }));
    };

    let report = state
        .dispatcher
        .dispatch_with_timeout(&mut notification, DISPATCH_TIMEOUT)
        .await;
    let saved = NotificationRepository::record_outcome(&mut *tx, &notification).await?;
    tx.commit().await?;

    Ok(Json(DispatchResponse {
        notification: saved,
        outcomes: report.outcomes,
    }))
}
