//! Text extraction for binary office documents.
//!
//! Sources hand over raw bytes plus a mimetype ([`RawBody::Binary`]);
//! this module returns plain UTF-8 text, one line per paragraph. Only
//! Office Open XML word documents are supported. Legacy `.doc` files and
//! anything else fail with [`ExtractError::Unsupported`], which the sync
//! engine reports as a normalization failure for that item.
//!
//! [`RawBody::Binary`]: crate::doctype::RawBody::Binary

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Decompressed size limit for `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("not a valid docx archive: {0}")]
    Archive(String),
    #[error("malformed document XML: {0}")]
    Xml(String),
}

pub fn extract_text(bytes: &[u8], mimetype: &str) -> Result<String, ExtractError> {
    match mimetype {
        MIME_DOCX => extract_docx(bytes),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Archive(e.to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "word/document.xml exceeds {} bytes",
            MAX_XML_ENTRY_BYTES
        )));
    }
    paragraphs_text(&xml)
}

/// Concatenate `<w:t>` runs, ending each `<w:p>` with a newline and
/// mapping `<w:tab/>` and `<w:br/>` to their whitespace.
fn paragraphs_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
