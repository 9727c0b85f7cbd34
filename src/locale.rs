//! User-facing strings that end up inside the conversation
//!
//! Only the texts the chat pipeline itself writes into a session are
//! localized here; everything else is plain terminal output.

use crate::error::CharlaError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported UI languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Spanish
    #[default]
    Es,
    /// English
    En,
}

impl Language {
    /// Two-letter code stored in local state
    pub fn code(self) -> &'static str {
        match self {
            Self::Es => "es",
            Self::En => "en",
        }
    }

    /// Assistant turn appended when a generation fails for good
    pub fn generic_error(self) -> &'static str {
        match self {
            Self::Es => "Lo siento, ocurrió un error al generar la respuesta. Inténtalo de nuevo.",
            Self::En => "Sorry, something went wrong while generating the reply. Please try again.",
        }
    }

    /// Stand-in text for a PDF whose text could not be extracted
    pub fn scanned_pdf_placeholder(self, file_name: &str) -> String {
        match self {
            Self::Es => format!(
                "[PDF: {}] No se pudo extraer texto; posiblemente es un documento escaneado.",
                file_name
            ),
            Self::En => format!(
                "[PDF: {}] Could not extract text; possibly a scanned document.",
                file_name
            ),
        }
    }
}

impl FromStr for Language {
    type Err = CharlaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "es" => Ok(Self::Es),
            "en" => Ok(Self::En),
            other => Err(CharlaError::Config(format!(
                "Unsupported language: {}. Must be one of: es, en",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
