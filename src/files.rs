//! Upload classification and on-disk layout for material blobs. Files are
//! stored under their content hash so re-uploads of the same bytes share a
//! blob and names never collide.

use crate::models::FileCategory;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

lazy_static::lazy_static! {
    pub static ref UPLOAD_DIR: PathBuf =
        PathBuf::from(std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()));
    pub static ref SCRATCH_DIR: PathBuf =
        PathBuf::from(std::env::var("SCRATCH_DIR").unwrap_or_else(|_| "temp_pdfs".to_string()));
}

pub fn extension(file_name: &str) -> Option<&str> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
}

pub fn stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// Category and MIME type from the original file name, falling back to
/// content sniffing for unknown extensions.
pub fn classify(file_name: &str, data: &[u8]) -> (FileCategory, String) {
    let ext = extension(file_name).map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some(ext @ ("jpg" | "jpeg" | "png" | "gif" | "svg")) => {
            (FileCategory::Image, format!("image/{ext}"))
        }
        Some(ext @ ("mp4" | "webm" | "avi" | "mov")) => {
            (FileCategory::Video, format!("video/{ext}"))
        }
        Some(ext @ ("mp3" | "wav" | "ogg")) => (FileCategory::Audio, format!("audio/{ext}")),
        Some("pdf") => (FileCategory::Pdf, mime::APPLICATION_PDF.to_string()),
        Some("txt" | "log" | "md") => (FileCategory::Text, mime::TEXT_PLAIN.to_string()),
        Some("doc") => (FileCategory::Word, "application/msword".to_string()),
        Some("docx") => (
            FileCategory::Word,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
        ),
        Some("xls") => (FileCategory::Excel, "application/vnd.ms-excel".to_string()),
        Some("xlsx") => (
            FileCategory::Excel,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".to_string(),
        ),
        Some("ppt") => (
            FileCategory::Powerpoint,
            "application/vnd.ms-powerpoint".to_string(),
        ),
        Some("pptx") => (
            FileCategory::Powerpoint,
            "application/vnd.openxmlformats-officedocument.presentationml.presentation".to_string(),
        ),
        _ => match infer::get(data) {
            Some(kind) => {
                let category = match kind.matcher_type() {
                    infer::MatcherType::Image => FileCategory::Image,
                    infer::MatcherType::Video => FileCategory::Video,
                    infer::MatcherType::Audio => FileCategory::Audio,
                    _ => FileCategory::Document,
                };
                (category, kind.mime_type().to_string())
            }
            None => (
                FileCategory::Document,
                mime::APPLICATION_OCTET_STREAM.to_string(),
            ),
        },
    }
}

/// Office formats browsers cannot render; these get converted to PDF for
/// inline viewing.
pub fn needs_pdf_conversion(category: FileCategory) -> bool {
    matches!(
        category,
        FileCategory::Word | FileCategory::Excel | FileCategory::Powerpoint
    )
}

/// Storage name for an uploaded blob: hex sha256 of the content plus the
/// original extension.
pub fn storage_name(file_name: &str, data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    if let Some(ext) = extension(file_name) {
        name.push('.');
        name.push_str(&ext.to_ascii_lowercase());
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(classify("notes.PDF", &[]).0, FileCategory::Pdf);
        assert_eq!(classify("photo.jpeg", &[]).0, FileCategory::Image);
        assert_eq!(classify("lecture.mp4", &[]).0, FileCategory::Video);
        assert_eq!(classify("readme.md", &[]).0, FileCategory::Text);

        let (category, mime_type) = classify("slides.pptx", &[]);
        assert_eq!(category, FileCategory::Powerpoint);
        assert!(mime_type.contains("presentation"));
    }

    #[test]
    fn sniffs_content_for_unknown_extensions() {
        // png magic bytes
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];
        assert_eq!(classify("mystery.bin", &png).0, FileCategory::Image);
        assert_eq!(classify("mystery.bin", &[0u8; 4]).0, FileCategory::Document);
    }

    #[test]
    fn office_formats_need_conversion() {
        assert!(needs_pdf_conversion(FileCategory::Word));
        assert!(needs_pdf_conversion(FileCategory::Excel));
        assert!(needs_pdf_conversion(FileCategory::Powerpoint));
        assert!(!needs_pdf_conversion(FileCategory::Pdf));
        assert!(!needs_pdf_conversion(FileCategory::Image));
    }

    #[test]
    fn storage_name_is_content_addressed() {
        let a = storage_name("report.docx", b"hello");
        let b = storage_name("other.docx", b"hello");
        assert_eq!(a[..64], b[..64]);
        assert!(a.ends_with(".docx"));
        assert_ne!(storage_name("report.docx", b"world")[..64], a[..64]);
    }
}
