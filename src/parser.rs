//! Multi-format text extraction for uploaded documents.
//!
//! [`DocumentParser`] implements the core [`FormatParser`] contract for
//! `txt`, `md`, `csv`, `pdf`, `docx` and `pptx`. Extraction never panics:
//! unknown tags are [`RagError::UnsupportedFormat`], unreadable content is
//! [`RagError::ParseFailure`], and the ingestion agent halts only the
//! affected document.

use std::io::Read;

use agentic_rag_core::parse::FormatParser;
use agentic_rag_core::RagError;

pub const SUPPORTED_FORMATS: [&str; 6] = ["pdf", "pptx", "docx", "csv", "txt", "md"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentParser;

impl FormatParser for DocumentParser {
    fn supported_formats(&self) -> Vec<&'static str> {
        SUPPORTED_FORMATS.to_vec()
    }

    fn parse(&self, bytes: &[u8], format: &str) -> Result<String, RagError> {
        match format {
            "txt" | "md" => parse_utf8(bytes),
            "csv" => parse_utf8(bytes).and_then(|text| parse_csv(&text)),
            "pdf" => parse_pdf(bytes),
            "docx" => parse_docx(bytes),
            "pptx" => parse_pptx(bytes),
            "" => Err(RagError::UnsupportedFormat(
                "file has no extension".to_string(),
            )),
            other => Err(RagError::UnsupportedFormat(format!(
                "'{}' (supported: {})",
                other,
                SUPPORTED_FORMATS.join(", ")
            ))),
        }
    }
}

fn parse_utf8(bytes: &[u8]) -> Result<String, RagError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RagError::ParseFailure(format!("not valid UTF-8: {}", e)))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn parse_pdf(bytes: &[u8]) -> Result<String, RagError> {
    contain_panics("PDF", || {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
    })
}

/// Run an extractor that may panic on malformed input, turning both its
/// error and a panic into a `ParseFailure` for this document alone.
fn contain_panics<F>(what: &str, extract: F) -> Result<String, RagError>
where
    F: FnOnce() -> Result<String, String> + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(extract) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(RagError::ParseFailure(format!(
            "{} extraction failed: {}",
            what, e
        ))),
        Err(_) => {
            tracing::warn!(format = what, "extractor panicked on malformed input");
            Err(RagError::ParseFailure(format!(
                "{} extraction aborted on malformed input",
                what
            )))
        }
    }
}

// ============ CSV ============

/// Render a CSV table as one line per row: `Row n: col: value, ...`.
///
/// The first record is the header. Quoted fields may contain commas,
/// doubled quotes and newlines.
fn parse_csv(text: &str) -> Result<String, RagError> {
    let mut records = split_csv_records(text)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| RagError::ParseFailure("CSV has no header row".to_string()))?;
    let rows: Vec<Vec<String>> = records.collect();

    let mut out = format!("Columns: {}\nRows: {}\n\n", header.join(", "), rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(c, col)| {
                let value = row.get(c).map(String::as_str).unwrap_or("");
                format!("{}: {}", col, value)
            })
            .collect();
        out.push_str(&format!("Row {}: {}\n", i + 1, cells.join(", ")));
    }
    Ok(out)
}

fn split_csv_records(text: &str) -> Result<Vec<Vec<String>>, RagError> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.iter().any(|f| !f.trim().is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(RagError::ParseFailure(
            "CSV has an unterminated quoted field".to_string(),
        ));
    }
    record.push(field);
    if record.iter().any(|f| !f.trim().is_empty()) {
        records.push(record);
    }
    Ok(records)
}

// ============ OOXML ============

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, RagError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_error)
}

fn ooxml_error(e: impl std::fmt::Display) -> RagError {
    RagError::ParseFailure(format!("OOXML extraction failed: {}", e))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, RagError> {
    let entry = archive.by_name(name).map_err(ooxml_error)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_error)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_error(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn parse_docx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = open_zip(bytes)?;
    if !archive.file_names().any(|n| n == "word/document.xml") {
        return Err(ooxml_error("word/document.xml not found"));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn parse_pptx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = open_zip(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for (i, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if text.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("Slide {}:\n{}\n", i + 1, text.trim_end()));
    }
    Ok(out)
}

/// Concatenate every `<*:t>` text run, ending a line at each closing
/// `paragraph` element.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, RagError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_plain_text_and_markdown() {
        let p = DocumentParser;
        assert_eq!(p.parse(b"hello", "txt").unwrap(), "hello");
        assert_eq!(p.parse("\u{feff}# Title".as_bytes(), "md").unwrap(), "# Title");
    }

    #[test]
    fn test_invalid_utf8_is_parse_failure() {
        let err = DocumentParser.parse(&[0xff, 0xfe, 0x00], "txt").unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let err = DocumentParser.parse(b"data", "xyz").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
        let err = DocumentParser.parse(b"data", "").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_csv_rows() {
        let csv = "name,city\nAda,London\n\"Hopper, Grace\",\"New \"\"York\"\"\"\n";
        let text = DocumentParser.parse(csv.as_bytes(), "csv").unwrap();
        assert!(text.starts_with("Columns: name, city\nRows: 2\n"));
        assert!(text.contains("Row 1: name: Ada, city: London"));
        assert!(text.contains("Row 2: name: Hopper, Grace, city: New \"York\""));
    }

    #[test]
    fn test_csv_short_row_and_crlf() {
        let text = parse_csv("a,b\r\n1\r\n\r\n").unwrap();
        assert!(text.contains("Row 1: a: 1, b: "));
        assert!(text.contains("Rows: 1"));
    }

    #[test]
    fn test_csv_unterminated_quote() {
        let err = parse_csv("a,b\n\"oops,1\n").unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
    }

    #[test]
    fn test_invalid_pdf() {
        let err = DocumentParser.parse(b"not a pdf", "pdf").unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
    }

    #[test]
    fn test_extractor_panic_is_parse_failure() {
        let err = contain_panics("PDF", || -> Result<String, String> {
            panic!("broken xref table")
        })
        .unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
        assert_eq!(
            contain_panics("PDF", || Ok("text".to_string())).unwrap(),
            "text"
        );
    }

    #[test]
    fn test_invalid_zip_for_docx() {
        let err = DocumentParser.parse(b"not a zip", "docx").unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let text = DocumentParser.parse(&bytes, "docx").unwrap();
        assert_eq!(text, "Hello world\nSecond & last\n");
    }

    #[test]
    fn test_docx_missing_body() {
        let bytes = zip_with(&[("other.xml", "<x/>")]);
        let err = DocumentParser.parse(&bytes, "docx").unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#,
                t
            )
        };
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = DocumentParser.parse(&bytes, "pptx").unwrap();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        let tenth = text.find("tenth").unwrap();
        assert!(first < second && second < tenth);
    }
}
