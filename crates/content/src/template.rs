//! Save-time validation of templates.
//!
//! A template is checked on every save. In archive mode the archive is only
//! re-ingested when its digest differs from the one already stored, so saving
//! an unchanged template never extracts anything.

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

use herald_common::types::{ContentMode, Template};

use crate::archive::{ArchiveIngester, IngestionError};
use crate::render::{ContentRenderer, RenderError};

/// Template configuration errors. Any of these blocks persistence.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    MissingTitle,

    #[error("html must not be empty in editor mode")]
    MissingHtml,

    #[error("archive mode requires an uploaded archive")]
    MissingArchive,

    #[error(transparent)]
    Template(#[from] RenderError),

    #[error(transparent)]
    Archive(#[from] IngestionError),
}

/// An archive submitted alongside a template save.
#[derive(Debug, Clone)]
pub struct ArchiveUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Identity of the archive payload (hex SHA-256).
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

/// What a successful `prepare_save` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Whether a new archive was extracted.
    pub ingested: bool,
    /// Extraction made obsolete by this save; remove once the save commits.
    pub stale_extraction: Option<String>,
}

/// Validates templates and ingests their archives.
#[derive(Clone)]
pub struct TemplateService {
    ingester: ArchiveIngester,
    renderer: ContentRenderer,
}

impl TemplateService {
    pub fn new(ingester: ArchiveIngester) -> Self {
        Self {
            ingester,
            renderer: ContentRenderer::new(),
        }
    }

    pub fn ingester(&self) -> &ArchiveIngester {
        &self.ingester
    }

    /// Validate `template` for persistence, ingesting `upload` when it changes
    /// the archive.
    ///
    /// `template` carries the currently stored archive digest (if any); on
    /// success it is updated in place and ready to be written.
    pub fn prepare_save(
        &self,
        template: &mut Template,
        upload: Option<&ArchiveUpload>,
    ) -> Result<SaveOutcome, ValidationError> {
        if template.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        self.renderer
            .check_syntax(&template.subject)
            .map_err(|e| ValidationError::Template(e.in_field("subject")))?;
        self.renderer
            .check_syntax(&template.text)
            .map_err(|e| ValidationError::Template(e.in_field("text")))?;

        let outcome = match template.content_mode {
            ContentMode::Editor => self.prepare_editor(template)?,
            ContentMode::Archive => self.prepare_archive(template, upload)?,
        };

        template.updated_at = Utc::now();
        Ok(outcome)
    }

    fn prepare_editor(&self, template: &mut Template) -> Result<SaveOutcome, ValidationError> {
        if template.html.trim().is_empty() {
            return Err(ValidationError::MissingHtml);
        }
        self.renderer
            .check_syntax(&template.html)
            .map_err(|e| ValidationError::Template(e.in_field("html")))?;

        template.archive_name = None;
        template.archive_digest = None;
        Ok(SaveOutcome {
            ingested: false,
            stale_extraction: template.archive_path.take(),
        })
    }

    fn prepare_archive(
        &self,
        template: &mut Template,
        upload: Option<&ArchiveUpload>,
    ) -> Result<SaveOutcome, ValidationError> {
        let Some(upload) = upload else {
            return if template.archive_digest.is_some() {
                Ok(SaveOutcome::default())
            } else {
                Err(ValidationError::MissingArchive)
            };
        };

        let digest = upload.digest();
        if template.archive_digest.as_deref() == Some(digest.as_str()) {
            tracing::debug!(template_id = %template.id, "Archive unchanged, skipping ingestion");
            return Ok(SaveOutcome::default());
        }

        let ingested = self.ingester.ingest(&upload.bytes)?;
        if let Err(e) = self.renderer.check_syntax(&ingested.html) {
            // The fresh extraction is useless if its HTML cannot be rendered.
            if let Err(cleanup) = self.ingester.discard(&ingested.path) {
                tracing::warn!(path = %ingested.path, error = %cleanup, "Failed to remove extraction");
            }
            return Err(ValidationError::Template(e.in_field("html")));
        }

        tracing::info!(
            template_id = %template.id,
            path = %ingested.path,
            assets = ingested.assets.len(),
            "Archive ingested"
        );

        template.html = ingested.html;
        template.archive_name = Some(upload.file_name.clone());
        template.archive_digest = Some(digest);
        let stale = template.archive_path.replace(ingested.path);
        Ok(SaveOutcome {
            ingested: true,
            stale_extraction: stale,
        })
    }
}
