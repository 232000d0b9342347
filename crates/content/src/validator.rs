//! Content-safety checks for archive assets.

use std::path::Path;

use thiserror::Error;

/// Default per-asset size cap (5 MiB).
const DEFAULT_MAX_ASSET_BYTES: usize = 5 * 1024 * 1024;

/// Extensions accepted by `DefaultAssetValidator`.
const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "css", "woff", "woff2", "ttf",
];

/// An archive entry handed to a validator.
#[derive(Debug, Clone, Copy)]
pub struct AssetFile<'a> {
    pub name: &'a str,
    pub bytes: &'a [u8],
}

impl AssetFile<'_> {
    /// Lower-cased extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// Why an asset was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct AssetRejection {
    pub reason: String,
}

impl AssetRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Per-asset safety check run during ingestion.
pub trait AssetValidator: Send + Sync {
    fn check(&self, asset: &AssetFile<'_>) -> Result<(), AssetRejection>;
}

/// Extension allow-list, size cap and signature sniffing for images.
#[derive(Debug, Clone)]
pub struct DefaultAssetValidator {
    allowed_extensions: Vec<String>,
    max_bytes: usize,
}

impl DefaultAssetValidator {
    pub fn new() -> Self {
        Self {
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            max_bytes: DEFAULT_MAX_ASSET_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Check that raster images start with the signature their extension claims.
    fn signature_matches(extension: &str, bytes: &[u8]) -> bool {
        match extension {
            "png" => bytes.starts_with(b"\x89PNG\r\n\x1a\n"),
            "jpg" | "jpeg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            "gif" => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
            "webp" => bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
            _ => true,
        }
    }
}

impl Default for DefaultAssetValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetValidator for DefaultAssetValidator {
    fn check(&self, asset: &AssetFile<'_>) -> Result<(), AssetRejection> {
        let extension = asset
            .extension()
            .ok_or_else(|| AssetRejection::new("file has no extension"))?;

        if !self.allowed_extensions.iter().any(|e| *e == extension) {
            return Err(AssetRejection::new(format!(
                "file type .{extension} is not allowed"
            )));
        }

        if asset.bytes.len() > self.max_bytes {
            return Err(AssetRejection::new(format!(
                "file exceeds {} bytes",
                self.max_bytes
            )));
        }

        if !Self::signature_matches(&extension, asset.bytes) {
            return Err(AssetRejection::new(format!(
                "content does not look like a .{extension} file"
            )));
        }

        if extension == "svg" {
            let text = String::from_utf8_lossy(asset.bytes).to_ascii_lowercase();
            if text.contains("<script") || text.contains("javascript:") {
                return Err(AssetRejection::new("svg contains script content"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn check(name: &str, bytes: &[u8]) -> Result<(), AssetRejection> {
        DefaultAssetValidator::new().check(&AssetFile { name, bytes })
    }

    #[test]
    fn test_accepts_png_with_signature() {
        assert!(check("logo.PNG", PNG).is_ok());
    }

    #[test]
    fn test_rejects_png_without_signature() {
        let err = check("logo.png", b"<html>").unwrap_err();
        assert!(err.reason.contains(".png"));
    }

    #[test]
    fn test_rejects_disallowed_extension() {
        assert!(check("run.exe", b"MZ").is_err());
        assert!(check("noext", b"data").is_err());
    }

    #[test]
    fn test_rejects_oversized_asset() {
        let validator = DefaultAssetValidator::new().with_max_bytes(4);
        let result = validator.check(&AssetFile {
            name: "style.css",
            bytes: b"body{}",
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_svg_with_script() {
        assert!(check("icon.svg", b"<svg><script>alert(1)</script></svg>").is_err());
        assert!(check("icon.svg", b"<svg><circle r=\"1\"/></svg>").is_ok());
    }
}
