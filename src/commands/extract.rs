//! `charla extract`: run the attachment preprocessor on a file

use crate::attachment::{accept, Attachment, IncomingFile};
use crate::error::Result;
use crate::locale::Language;
use colored::Colorize;
use std::path::Path;

/// Longest text preview printed for a PDF
const PREVIEW_CHARS: usize = 600;

/// Human-readable summary of a processed attachment
pub fn describe(attachment: &Attachment, language: Language) -> String {
    match attachment {
        Attachment::Image {
            data,
            mime_type,
            file_name,
            ..
        } => format!(
            "{} ({}): {} base64 characters",
            file_name,
            mime_type,
            data.len()
        ),
        Attachment::Pdf {
            text, file_name, ..
        } => {
            if text.trim().is_empty() {
                return language.scanned_pdf_placeholder(file_name);
            }
            let count = text.chars().count();
            let preview: String = text.chars().take(PREVIEW_CHARS).collect();
            let ellipsis = if count > PREVIEW_CHARS { "..." } else { "" };
            format!(
                "{}: {} characters extracted\n\n{}{}",
                file_name, count, preview, ellipsis
            )
        }
    }
}

/// Prints what would be sent for `path`
///
/// # Errors
///
/// Returns the preprocessor's rejection (too large, unsupported type) or an
/// IO error
pub fn run_extract(path: &Path, language: Language) -> Result<()> {
    let file = IncomingFile::from_path(path)?;
    tracing::debug!(
        file = %file.file_name,
        mime = %file.mime_type,
        size = file.size,
        "Processing attachment"
    );
    let attachment = accept(&file)?;
    println!("{}", "Attachment accepted".green());
    println!("{}", describe(&attachment, language));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_error_contains, create_test_file, temp_dir};

    #[test]
    fn test_run_extract_accepts_pdf_and_rejects_text() {
        let dir = temp_dir();
        let pdf = create_test_file(&dir, "hola.pdf", b"%PDF-1.4 BT (Hola) Tj ET");
        assert!(run_extract(&pdf, Language::Es).is_ok());

        let notes = create_test_file(&dir, "notas.txt", b"texto");
        assert_error_contains(run_extract(&notes, Language::Es), "unsupported file type");
    }

    #[test]
    fn test_describe_image() {
        let attachment = Attachment::Image {
            data: "aGVsbG8=".to_string(),
            mime_type: "image/png".to_string(),
            file_name: "foto.png".to_string(),
            preview: None,
        };
        assert_eq!(
            describe(&attachment, Language::Es),
            "foto.png (image/png): 8 base64 characters"
        );
    }

    #[test]
    fn test_describe_pdf_preview_truncates() {
        let attachment = Attachment::Pdf {
            text: "a".repeat(PREVIEW_CHARS + 10),
            file_name: "doc.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
        };
        let out = describe(&attachment, Language::En);
        assert!(out.starts_with("doc.pdf: 610 characters extracted"));
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_describe_scanned_pdf() {
        let attachment = Attachment::Pdf {
            text: String::new(),
            file_name: "scan.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
        };
        assert!(describe(&attachment, Language::En).contains("scanned"));
    }
}
