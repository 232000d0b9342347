//! Template persistence.
//!
//! Callers validate through `TemplateService::prepare_save` first; this layer
//! only stores what it is given.

use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::Template;

/// Repository for the `templates` table.
pub struct TemplateRepository;

impl TemplateRepository {
    /// Insert a new template.
    pub async fn insert(pool: &PgPool, template: &Template) -> Result<Template, AppError> {
        let saved: Template = sqlx::query_as(
            r#"
            INSERT INTO templates (
                id, title, subject, text, content_mode, html,
                archive_name, archive_digest, archive_path,
                category_id, event, is_active, is_delete_after, send_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            RETURNING *
            "#,
        )
        .bind(template.id)
        .bind(&template.title)
        .bind(&template.subject)
        .bind(&template.text)
        .bind(template.content_mode)
        .bind(&template.html)
        .bind(&template.archive_name)
        .bind(&template.archive_digest)
        .bind(&template.archive_path)
        .bind(template.category_id)
        .bind(template.event)
        .bind(template.is_active)
        .bind(template.is_delete_after)
        .bind(template.send_at)
        .bind(template.created_at)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            template_id = %saved.id,
            content_mode = %saved.content_mode,
            "Template created"
        );

        Ok(saved)
    }

    /// Get a single template by ID.
    pub async fn get(pool: &PgPool, template_id: Uuid) -> Result<Template, AppError> {
        let template: Template = sqlx::query_as("SELECT * FROM templates WHERE id = $1")
            .bind(template_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Template {} not found", template_id)))?;

        Ok(template)
    }

    /// List templates, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Template>, AppError> {
        let templates: Vec<Template> =
            sqlx::query_as("SELECT * FROM templates ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?;

        Ok(templates)
    }

    /// Overwrite every mutable column of an existing template.
    pub async fn update(pool: &PgPool, template: &Template) -> Result<Template, AppError> {
        let saved: Template = sqlx::query_as(
            r#"
            UPDATE templates
            SET title = $1, subject = $2, text = $3, content_mode = $4, html = $5,
                archive_name = $6, archive_digest = $7, archive_path = $8,
                category_id = $9, event = $10, is_active = $11, is_delete_after = $12,
                send_at = $13, updated_at = now()
            WHERE id = $14
            RETURNING *
            "#,
        )
        .bind(&template.title)
        .bind(&template.subject)
        .bind(&template.text)
        .bind(template.content_mode)
        .bind(&template.html)
        .bind(&template.archive_name)
        .bind(&template.archive_digest)
        .bind(&template.archive_path)
        .bind(template.category_id)
        .bind(template.event)
        .bind(template.is_active)
        .bind(template.is_delete_after)
        .bind(template.send_at)
        .bind(template.id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", template.id)))?;

        tracing::info!(
            template_id = %saved.id,
            content_mode = %saved.content_mode,
            "Template updated"
        );

        Ok(saved)
    }

    /// Delete a template. Returns true if it was deleted.
    pub async fn delete(pool: &PgPool, template_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(template_id)
            .execute(pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(template_id = %template_id, "Template deleted");
        }

        Ok(deleted)
    }
}
