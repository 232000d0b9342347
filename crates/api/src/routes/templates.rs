//! Template routes.
//!
//! Every save goes through `TemplateService::prepare_save` before anything is
//! written. Ingestion runs on the blocking pool. Extractions made obsolete by
//! a save are removed only after the row is committed, and a fresh extraction
//! is removed again if the row cannot be written.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{ContentMode, Template};
use herald_content::{ArchiveUpload, IngestionError, SaveOutcome, ValidationError};
use herald_store::TemplateRepository;

use crate::state::AppState;

const DEFAULT_ARCHIVE_NAME: &str = "archive.zip";

pub fn router(max_archive_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/templates", get(list_templates).post(create_template))
        .route(
            "/api/templates/{id}",
            get(get_template)
                .put(update_template)
                .delete(delete_template),
        )
        .route(
            "/api/templates/{id}/archive",
            put(upload_archive)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer::<_, std::convert::Infallible>(RequestBodyLimitLayer::new(max_archive_bytes)),
        )
}

/// Parameters for creating an editor-mode template.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateParams {
    pub title: String,
    #[serde(default)]
    pub subject: String,
    pub text: String,
    #[serde(default)]
    pub html: String,
    pub category_id: Option<Uuid>,
    pub event: Option<i32>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_delete_after: bool,
    pub send_at: Option<DateTime<Utc>>,
}

/// Parameters for updating a template. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplateParams {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    /// Ignored unless the template ends up in editor mode. Required when
    /// switching from archive to editor mode.
    pub html: Option<String>,
    pub content_mode: Option<ContentMode>,
    pub category_id: Option<Uuid>,
    pub event: Option<i32>,
    pub is_active: Option<bool>,
    pub is_delete_after: Option<bool>,
    pub send_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    pub file_name: Option<String>,
}

/// `GET /api/templates`: List templates.
async fn list_templates(State(state): State<AppState>) -> Result<Json<Vec<Template>>, AppError> {
    let templates = TemplateRepository::list(&state.pool).await?;
    Ok(Json(templates))
}

/// `GET /api/templates/{id}`: Get one template.
async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Template>, AppError> {
    let template = TemplateRepository::get(&state.pool, id).await?;
    Ok(Json(template))
}

/// `POST /api/templates`: Create an editor-mode template.
async fn create_template(
    State(state): State<AppState>,
    Json(params): Json<CreateTemplateParams>,
) -> Result<Json<Template>, AppError> {
    let mut template = Template::new(params.title, params.text);
    template.subject = params.subject;
    template.html = params.html;
    template.category_id = params.category_id;
    template.event = params.event;
    template.is_active = params.is_active.unwrap_or(true);
    template.is_delete_after = params.is_delete_after;
    template.send_at = params.send_at;

    let saved = save(&state, template, None, false).await?;
    Ok(Json(saved))
}

/// `PUT /api/templates/{id}`: Update fields and/or switch content mode.
async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateTemplateParams>,
) -> Result<Json<Template>, AppError> {
    let mut template = TemplateRepository::get(&state.pool, id).await?;

    if let Some(title) = params.title {
        template.title = title;
    }
    if let Some(subject) = params.subject {
        template.subject = subject;
    }
    if let Some(text) = params.text {
        template.text = text;
    }
    if let Some(mode) = params.content_mode {
        // Ingested HTML points into the extraction that is about to be removed
        if mode == ContentMode::Editor
            && template.content_mode == ContentMode::Archive
            && params.html.is_none()
        {
            return Err(AppError::Validation(
                "Switching to editor mode requires new html".to_string(),
            ));
        }
        template.content_mode = mode;
    }
    if let (ContentMode::Editor, Some(html)) = (template.content_mode, params.html) {
        template.html = html;
    }
    if params.category_id.is_some() {
        template.category_id = params.category_id;
    }
    if params.event.is_some() {
        template.event = params.event;
    }
    if let Some(active) = params.is_active {
        template.is_active = active;
    }
    if let Some(delete_after) = params.is_delete_after {
        template.is_delete_after = delete_after;
    }
    if params.send_at.is_some() {
        template.send_at = params.send_at;
    }

    let saved = save(&state, template, None, true).await?;
    Ok(Json(saved))
}

/// `DELETE /api/templates/{id}`: Delete a template and its archive extraction.
async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let template = TemplateRepository::get(&state.pool, id).await?;
    if !TemplateRepository::delete(&state.pool, id).await? {
        return Err(AppError::NotFound(format!("Template {} not found", id)));
    }
    if let Some(path) = template.archive_path {
        discard_extraction(&state, path).await;
    }
    Ok(Json(serde_json::json!({"deleted": true})))
}

/// `PUT /api/templates/{id}/archive`: Upload a zip archive and switch to archive mode.
async fn upload_archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ArchiveQuery>,
    body: Bytes,
) -> Result<Json<Template>, AppError> {
    let mut template = TemplateRepository::get(&state.pool, id).await?;
    template.content_mode = ContentMode::Archive;

    let file_name = query
        .file_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ARCHIVE_NAME.to_string());
    tracing::info!(
        template_id = %id,
        file_name = %file_name,
        bytes = body.len(),
        "Archive uploaded"
    );

    let upload = ArchiveUpload::new(file_name, body.to_vec());
    let saved = save(&state, template, Some(upload), true).await?;
    Ok(Json(saved))
}

/// Validate, persist and clean up after one template save.
async fn save(
    state: &AppState,
    template: Template,
    upload: Option<ArchiveUpload>,
    existing: bool,
) -> Result<Template, AppError> {
    let service = state.templates.clone();
    let (template, outcome) = tokio::task::spawn_blocking(move || {
        let mut template = template;
        let outcome = service.prepare_save(&mut template, upload.as_ref());
        (template, outcome)
    })
    .await
    .map_err(|e| AppError::Internal(format!("template validation task failed: {e}")))?;
    let outcome: SaveOutcome = outcome.map_err(validation_error)?;

    let persisted = if existing {
        TemplateRepository::update(&state.pool, &template).await
    } else {
        TemplateRepository::insert(&state.pool, &template).await
    };

    match persisted {
        Ok(saved) => {
            if let Some(stale) = outcome.stale_extraction {
                discard_extraction(state, stale).await;
            }
            Ok(saved)
        }
        Err(e) => {
            if let (true, Some(fresh)) = (outcome.ingested, template.archive_path) {
                discard_extraction(state, fresh).await;
            }
            Err(e)
        }
    }
}

async fn discard_extraction(state: &AppState, path: String) {
    let service = state.templates.clone();
    let result = tokio::task::spawn_blocking(move || {
        let removed = service.ingester().discard(&path);
        (path, removed)
    })
    .await;

    match result {
        Ok((path, Ok(()))) => tracing::info!(path = %path, "Removed archive extraction"),
        Ok((path, Err(e))) => {
            tracing::warn!(path = %path, error = %e, "Failed to remove archive extraction")
        }
        Err(e) => tracing::warn!(error = %e, "Extraction cleanup task failed"),
    }
}

fn validation_error(err: ValidationError) -> AppError {
    match err {
        ValidationError::Archive(IngestionError::Storage(e)) => {
            AppError::Internal(format!("archive storage failed: {e}"))
        }
        other => AppError::Validation(other.to_string()),
    }
}
