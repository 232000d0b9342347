//! Notification content: archive ingestion, template rendering and template
//! save-time validation.

pub mod archive;
pub mod render;
pub mod storage;
pub mod template;
pub mod validator;

pub use archive::{ArchiveIngester, IngestedArchive, IngestionError};
pub use render::{ContentRenderer, RenderError, RenderedContent};
pub use storage::{LocalStorage, Storage};
pub use template::{ArchiveUpload, SaveOutcome, TemplateService, ValidationError};
pub use validator::{AssetFile, AssetRejection, AssetValidator, DefaultAssetValidator};
