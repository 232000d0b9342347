//! Template save-time validation and archive idempotence.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use herald_common::types::{ContentMode, Template};
use herald_content::{
    ArchiveIngester, ArchiveUpload, DefaultAssetValidator, LocalStorage, TemplateService,
    ValidationError,
};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRfake";

fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn service(root: &Path) -> TemplateService {
    TemplateService::new(ArchiveIngester::new(
        Arc::new(LocalStorage::new(root, "/media/")),
        Arc::new(DefaultAssetValidator::new()),
    ))
}

fn extraction_count(root: &Path) -> usize {
    match std::fs::read_dir(root.join("archives")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

fn archive_template() -> Template {
    let mut template = Template::new("Welcome", "Hello {{ name }}");
    template.content_mode = ContentMode::Archive;
    template
}

#[test]
fn test_editor_mode_requires_html() {
    let media = tempfile::tempdir().unwrap();
    let mut template = Template::new("Welcome", "Hello");
    template.html = "   ".to_string();

    let err = service(media.path())
        .prepare_save(&mut template, None)
        .unwrap_err();
    assert!(matches!(err, ValidationError::MissingHtml));
}

#[test]
fn test_editor_mode_clears_archive_fields() {
    let media = tempfile::tempdir().unwrap();
    let mut template = Template::new("Welcome", "Hello");
    template.html = "<p>Hello</p>".to_string();
    template.archive_name = Some("old.zip".to_string());
    template.archive_digest = Some("abc".to_string());
    template.archive_path = Some("archives/old".to_string());

    let outcome = service(media.path())
        .prepare_save(&mut template, None)
        .unwrap();
    assert!(!outcome.ingested);
    assert_eq!(outcome.stale_extraction.as_deref(), Some("archives/old"));
    assert!(template.archive_name.is_none());
    assert!(template.archive_digest.is_none());
    assert!(template.archive_path.is_none());
}

#[test]
fn test_blank_title_rejected() {
    let media = tempfile::tempdir().unwrap();
    let mut template = Template::new(" ", "Hello");
    template.html = "<p>Hello</p>".to_string();

    let err = service(media.path())
        .prepare_save(&mut template, None)
        .unwrap_err();
    assert!(matches!(err, ValidationError::MissingTitle));
}

#[test]
fn test_malformed_text_rejected() {
    let media = tempfile::tempdir().unwrap();
    let mut template = Template::new("Welcome", "Hello {{ name|shout }}");
    template.html = "<p>Hello</p>".to_string();

    let err = service(media.path())
        .prepare_save(&mut template, None)
        .unwrap_err();
    assert!(matches!(err, ValidationError::Template(_)));
}

#[test]
fn test_archive_mode_requires_archive() {
    let media = tempfile::tempdir().unwrap();
    let mut template = archive_template();

    let err = service(media.path())
        .prepare_save(&mut template, None)
        .unwrap_err();
    assert!(matches!(err, ValidationError::MissingArchive));
}

#[test]
fn test_archive_ingested_on_first_save() {
    let media = tempfile::tempdir().unwrap();
    let mut template = archive_template();
    let upload = ArchiveUpload::new(
        "welcome.zip",
        build_zip(&[
            ("note.html", br#"<img src="logo.png">"#),
            ("logo.png", PNG),
        ]),
    );

    let outcome = service(media.path())
        .prepare_save(&mut template, Some(&upload))
        .unwrap();

    assert!(outcome.ingested);
    assert!(outcome.stale_extraction.is_none());
    assert_eq!(template.archive_digest, Some(upload.digest()));
    assert_eq!(template.archive_name.as_deref(), Some("welcome.zip"));
    let path = template.archive_path.clone().unwrap();
    assert!(template.html.contains(&format!("/media/{path}/logo.png")));
    assert!(media.path().join(&path).join("logo.png").exists());
}

#[test]
fn test_unchanged_archive_is_not_reingested() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path());
    let mut template = archive_template();
    let upload = ArchiveUpload::new("welcome.zip", build_zip(&[("note.html", b"<p>hi</p>")]));

    service.prepare_save(&mut template, Some(&upload)).unwrap();
    let first_path = template.archive_path.clone();
    assert_eq!(extraction_count(media.path()), 1);

    // Same payload again, and a save without any upload
    let again = service.prepare_save(&mut template, Some(&upload)).unwrap();
    let bare = service.prepare_save(&mut template, None).unwrap();

    assert!(!again.ingested);
    assert!(!bare.ingested);
    assert_eq!(template.archive_path, first_path);
    assert_eq!(extraction_count(media.path()), 1);
}

#[test]
fn test_changed_archive_reports_stale_extraction() {
    let media = tempfile::tempdir().unwrap();
    let service = service(media.path());
    let mut template = archive_template();

    let first = ArchiveUpload::new("v1.zip", build_zip(&[("note.html", b"<p>v1</p>")]));
    service.prepare_save(&mut template, Some(&first)).unwrap();
    let first_path = template.archive_path.clone();

    let second = ArchiveUpload::new("v2.zip", build_zip(&[("note.html", b"<p>v2</p>")]));
    let outcome = service.prepare_save(&mut template, Some(&second)).unwrap();

    assert!(outcome.ingested);
    assert_eq!(outcome.stale_extraction, first_path);
    assert_eq!(template.html, "<p>v2</p>");
}

#[test]
fn test_invalid_archive_leaves_template_untouched() {
    let media = tempfile::tempdir().unwrap();
    let mut template = archive_template();
    let upload = ArchiveUpload::new(
        "broken.zip",
        build_zip(&[("a.html", b"<p>a</p>"), ("b.html", b"<p>b</p>")]),
    );

    let err = service(media.path())
        .prepare_save(&mut template, Some(&upload))
        .unwrap_err();
    assert!(matches!(err, ValidationError::Archive(_)));
    assert!(template.archive_digest.is_none());
    assert!(template.html.is_empty());
    assert_eq!(extraction_count(media.path()), 0);
}

#[test]
fn test_unrenderable_archive_html_is_discarded() {
    let media = tempfile::tempdir().unwrap();
    let mut template = archive_template();
    let upload = ArchiveUpload::new("bad.zip", build_zip(&[("note.html", b"<p>{{ x|nope }}</p>")]));

    let err = service(media.path())
        .prepare_save(&mut template, Some(&upload))
        .unwrap_err();
    assert!(matches!(err, ValidationError::Template(_)));
    assert_eq!(extraction_count(media.path()), 0);
}
