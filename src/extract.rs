//! Text extraction for uploaded documents.
//!
//! Each [`DocumentFormat`] variant has its own [`TextExtractor`]; callers
//! pick one with [`extractor_for`] or go through [`extract_text`]. Extractors
//! return plain UTF-8 text and never panic on malformed input.

use std::io::Read;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use thiserror::Error;

use crate::models::DocumentFormat;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Word extraction failed: {0}")]
    Ooxml(String),
    #[error("file is not valid UTF-8 text")]
    Encoding,
    #[error("no text could be extracted")]
    Empty,
}

/// Turns the raw bytes of one format into plain text.
pub trait TextExtractor: Send + Sync {
    fn format(&self) -> DocumentFormat;
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
}

pub struct PdfExtractor;
pub struct PlainTextExtractor;
pub struct WordExtractor;
pub struct MarkdownExtractor;

/// Returns the extractor for a format variant.
pub fn extractor_for(format: DocumentFormat) -> &'static dyn TextExtractor {
    match format {
        DocumentFormat::Pdf => &PdfExtractor,
        DocumentFormat::Text => &PlainTextExtractor,
        DocumentFormat::Word => &WordExtractor,
        DocumentFormat::Markdown => &MarkdownExtractor,
    }
}

/// Extracts text and rejects results that are empty after trimming.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    let text = extractor_for(format).extract(bytes)?;
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

impl TextExtractor for PdfExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

impl TextExtractor for PlainTextExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Text
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding)?;
        Ok(text.trim_start_matches('\u{feff}').replace("\r\n", "\n"))
    }
}

impl TextExtractor for WordExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Word
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
        let mut doc_xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Ooxml(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
        extract_w_paragraphs(&doc_xml)
    }
}

/// Collects `<w:t>` runs, one paragraph (`<w:p>`) per blank-line-separated block
/// so the chunker can split on paragraph boundaries.
fn extract_w_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event as XmlEvent;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(XmlEvent::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(XmlEvent::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

impl TextExtractor for MarkdownExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Markdown
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let source = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding)?;
        Ok(markdown_to_text(source))
    }
}

/// Strips Markdown markup, keeping block boundaries as blank lines.
fn markdown_to_text(source: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(source) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => out.push_str("- "),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::Item) => out.push_str("\n\n"),
            _ => {}
        }
    }
    out.trim().to_string()
}
