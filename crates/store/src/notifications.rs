//! Notification persistence.
//!
//! The recipient target and delivery log are stored as JSONB.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use sqlx::types::Json;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{DeliveryNote, DeliveryState, Notification, RecipientTarget};

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    template_id: Option<Uuid>,
    subject: Option<String>,
    text: String,
    html: Option<String>,
    target: Json<RecipientTarget>,
    state: DeliveryState,
    sent_at: Option<DateTime<Utc>>,
    log: Json<Vec<DeliveryNote>>,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            template_id: row.template_id,
            subject: row.subject,
            text: row.text,
            html: row.html,
            target: row.target.0,
            state: row.state,
            sent_at: row.sent_at,
            log: row.log.0,
            created_at: row.created_at,
        }
    }
}

/// Repository for the `notifications` table.
pub struct NotificationRepository;

impl NotificationRepository {
    /// Store a freshly rendered notification.
    pub async fn insert(pool: &PgPool, notification: &Notification) -> Result<Notification, AppError> {
        let row: NotificationRow = sqlx::query_as(
            r#"
            INSERT INTO notifications (
                id, template_id, subject, text, html, target, state, sent_at, log, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(notification.id)
        .bind(notification.template_id)
        .bind(&notification.subject)
        .bind(&notification.text)
        .bind(&notification.html)
        .bind(Json(&notification.target))
        .bind(notification.state)
        .bind(notification.sent_at)
        .bind(Json(&notification.log))
        .bind(notification.created_at)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            notification_id = %row.id,
            template_id = ?row.template_id,
            "Notification created"
        );

        Ok(row.into())
    }

    /// Get a single notification by ID.
    pub async fn get(pool: &PgPool, notification_id: Uuid) -> Result<Notification, AppError> {
        let row: NotificationRow = sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
            .bind(notification_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Notification {} not found", notification_id))
            })?;

        Ok(row.into())
    }

    /// Lock a pending notification for dispatch.
    ///
    /// The row stays locked until `tx` ends. Returns `None` when the
    /// notification is missing, already settled, or locked by another dispatch.
    pub async fn claim_pending(
        tx: &mut Transaction<'_, Postgres>,
        notification_id: Uuid,
    ) -> Result<Option<Notification>, AppError> {
        let row: Option<NotificationRow> = sqlx::query_as(
            "SELECT * FROM notifications WHERE id = $1 AND state = 'pending' FOR UPDATE SKIP LOCKED",
        )
        .bind(notification_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(Notification::from))
    }

    /// Persist the outcome of a dispatch: state, send timestamp and log.
    ///
    /// Only a pending row is updated, so a settled notification can never be
    /// overwritten by a concurrent dispatch.
    pub async fn record_outcome<'e>(
        executor: impl PgExecutor<'e>,
        notification: &Notification,
    ) -> Result<Notification, AppError> {
        let row: NotificationRow = sqlx::query_as(
            r#"
            UPDATE notifications
            SET state = $1, sent_at = $2, log = $3
            WHERE id = $4 AND state = 'pending'
            RETURNING *
            "#,
        )
        .bind(notification.state)
        .bind(notification.sent_at)
        .bind(Json(&notification.log))
        .bind(notification.id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Notification {} is no longer pending",
                notification.id
            ))
        })?;

        tracing::info!(
            notification_id = %row.id,
            state = %row.state,
            "Dispatch outcome recorded"
        );

        Ok(row.into())
    }
}
