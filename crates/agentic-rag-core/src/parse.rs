//! Format-parsing collaborator contract.
//!
//! A [`FormatParser`] turns raw uploaded bytes into plain text. Extraction
//! itself (PDF, OOXML, CSV) lives in the app crate.

use crate::error::RagError;

pub trait FormatParser: Send + Sync {
    /// Lower-case format tags this parser accepts (e.g. `["pdf", "txt"]`).
    fn supported_formats(&self) -> Vec<&'static str>;

    /// Extract plain text.
    ///
    /// Fails with [`RagError::UnsupportedFormat`] for unknown tags and
    /// [`RagError::ParseFailure`] for content that cannot be read.
    fn parse(&self, bytes: &[u8], format: &str) -> Result<String, RagError>;
}

/// Derive the format tag from a filename's extension.
///
/// Returns an empty string when there is no extension.
pub fn format_tag(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tag() {
        assert_eq!(format_tag("Report.PDF"), "pdf");
        assert_eq!(format_tag("notes.tar.md"), "md");
        assert_eq!(format_tag("README"), "");
    }
}
