//! Archive ingestion: turns an uploaded zip bundle into one HTML document.
//!
//! Validation runs entirely in memory before anything touches storage:
//! 1. No directory entries (nested paths count as directories)
//! 2. Exactly one `.html` entry
//! 3. Every other entry passes the `AssetValidator`
//!
//! Only then is the archive extracted to a fresh random path, the HTML read
//! back and every bare asset file name rewritten to the asset's public URL.
//! Any failure after extraction removes the extraction path before returning.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;
use zip::ZipArchive;

use crate::storage::Storage;
use crate::validator::{AssetFile, AssetValidator};

/// Storage prefix all extractions live under.
const EXTRACTION_PREFIX: &str = "archives";

/// Bookkeeping entries added by archivers, skipped everywhere.
const IGNORED_NAMES: &[&str] = &["__MACOSX", ".DS_Store"];

/// Hard cap on the decompressed size of a single entry (20 MiB).
pub(crate) const MAX_ENTRY_BYTES: u64 = 20 * 1024 * 1024;

/// Errors raised while ingesting an archive.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("archive must not contain directories (found `{0}`)")]
    Structure(String),

    #[error("archive must contain exactly one HTML file (found {0})")]
    Content(usize),

    #[error("asset `{name}` failed the safety check: {reason}")]
    Asset { name: String, reason: String },

    #[error("`{name}` is larger than {limit} bytes")]
    TooLarge { name: String, limit: u64 },

    #[error("`{0}` is not valid UTF-8")]
    Encoding(String),

    #[error("unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedArchive {
    /// HTML document with asset references rewritten.
    pub html: String,
    /// Storage path the archive was extracted to.
    pub path: String,
    /// Asset file names found in the archive.
    pub assets: Vec<String>,
}

/// Whether an entry is archiver bookkeeping rather than content.
pub(crate) fn is_ignored_entry(name: &str) -> bool {
    name.split('/')
        .filter(|part| !part.is_empty())
        .any(|part| IGNORED_NAMES.contains(&part))
}

fn is_html(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html"))
}

/// Validates and unpacks untrusted archives.
#[derive(Clone)]
pub struct ArchiveIngester {
    storage: Arc<dyn Storage>,
    validator: Arc<dyn AssetValidator>,
}

impl ArchiveIngester {
    pub fn new(storage: Arc<dyn Storage>, validator: Arc<dyn AssetValidator>) -> Self {
        Self { storage, validator }
    }

    /// Validate `archive`, extract it and return the rewritten HTML.
    pub fn ingest(&self, archive: &[u8]) -> Result<IngestedArchive, IngestionError> {
        let mut zip = ZipArchive::new(Cursor::new(archive))?;

        // Pass 1: structure
        let mut names = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let entry = zip.by_index(i)?;
            let name = entry.name().to_string();
            if is_ignored_entry(&name) {
                continue;
            }
            if entry.is_dir() || name.contains('/') || name.contains('\\') {
                return Err(IngestionError::Structure(name));
            }
            names.push((i, name));
        }

        // Pass 2: exactly one HTML document
        let html_entries: Vec<&String> = names
            .iter()
            .map(|(_, name)| name)
            .filter(|name| is_html(name))
            .collect();
        if html_entries.len() != 1 {
            return Err(IngestionError::Content(html_entries.len()));
        }
        let html_name = html_entries[0].clone();
        if let Some((index, _)) = names.iter().find(|(_, name)| *name == html_name) {
            Self::read_entry(&mut zip, *index)?;
        }

        // Pass 3: asset safety
        let mut assets = Vec::new();
        for (index, name) in &names {
            if *name == html_name {
                continue;
            }
            let bytes = Self::read_entry(&mut zip, *index)?;
            self.validator
                .check(&AssetFile {
                    name,
                    bytes: &bytes,
                })
                .map_err(|rejection| IngestionError::Asset {
                    name: name.clone(),
                    reason: rejection.reason,
                })?;
            assets.push(name.clone());
        }

        let path = format!("{}/{}", EXTRACTION_PREFIX, Uuid::new_v4().simple());
        tracing::info!(
            path = %path,
            html = %html_name,
            assets = assets.len(),
            "Extracting archive"
        );

        match self.extract_and_rewrite(archive, &path, &html_name, &assets) {
            Ok(html) => Ok(IngestedArchive { html, path, assets }),
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&path) {
                    tracing::warn!(
                        path = %path,
                        error = %cleanup,
                        "Failed to remove partial extraction"
                    );
                }
                tracing::warn!(path = %path, error = %e, "Archive ingestion failed after extraction");
                Err(e)
            }
        }
    }

    /// Remove an extraction produced by `ingest`.
    pub fn discard(&self, path: &str) -> std::io::Result<()> {
        self.storage.delete(path)
    }

    fn read_entry(
        zip: &mut ZipArchive<Cursor<&[u8]>>,
        index: usize,
    ) -> Result<Vec<u8>, IngestionError> {
        let entry = zip.by_index(index)?;
        let too_large = |name: &str| IngestionError::TooLarge {
            name: name.to_string(),
            limit: MAX_ENTRY_BYTES,
        };
        // The declared size can lie, so the read is capped as well.
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(too_large(entry.name()));
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.take(MAX_ENTRY_BYTES + 1).read_to_end(&mut bytes)?;
        if bytes.len() as u64 > MAX_ENTRY_BYTES {
            return Err(too_large(&name));
        }
        Ok(bytes)
    }

    fn extract_and_rewrite(
        &self,
        archive: &[u8],
        path: &str,
        html_name: &str,
        assets: &[String],
    ) -> Result<String, IngestionError> {
        self.storage.extract(archive, path)?;
        let html = self
            .storage
            .read_to_string(&format!("{path}/{html_name}"))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => IngestionError::Encoding(html_name.to_string()),
                _ => IngestionError::Storage(e),
            })?;
        Ok(rewrite_asset_references(&html, assets, |asset| {
            self.storage.public_url(&format!("{path}/{asset}"))
        }))
    }
}

/// Replace every bare occurrence of an asset name in `html` with `url_for(name)`.
///
/// At each position the longest matching name wins. A name only matches when
/// it is not glued to other file-name characters, so `logo.png` does not
/// match inside `biglogo.png`. A leading `./` is consumed with the name.
/// Replacement is a single pass, so URLs produced for one asset are never
/// rewritten again for another.
pub fn rewrite_asset_references(
    html: &str,
    assets: &[String],
    url_for: impl Fn(&str) -> String,
) -> String {
    let names: HashSet<&str> = assets
        .iter()
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return html.to_string();
    }

    let mut lengths: Vec<usize> = names
        .iter()
        .map(|name| name.len())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    lengths.sort_unstable_by(|a, b| b.cmp(a));
    let name_at = |start: usize| {
        lengths.iter().find_map(|&len| {
            html.get(start..start + len)
                .filter(|candidate| names.contains(candidate))
        })
    };

    let is_name_char = |c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.');

    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    let mut pos = 0;
    while pos < html.len() {
        let found = html[pos..]
            .starts_with("./")
            .then(|| name_at(pos + 2).map(|name| (pos + 2, name)))
            .flatten()
            .or_else(|| name_at(pos).map(|name| (pos, name)));
        let Some((name_start, name)) = found else {
            pos += html[pos..].chars().next().map_or(1, char::len_utf8);
            continue;
        };

        let end = name_start + name.len();
        let before = html[..pos].chars().next_back();
        let mut rest = html[end..].chars();
        let glued_after = match rest.next() {
            // A '.' followed by a non-name character ends a sentence.
            Some('.') => rest.next().is_some_and(is_name_char),
            Some(c) => is_name_char(c),
            None => false,
        };
        if !before.is_some_and(is_name_char) && !glued_after {
            out.push_str(&html[copied..pos]);
            out.push_str(&url_for(name));
            copied = end;
        }
        pos = end;
    }
    out.push_str(&html[copied..]);
    out
}
