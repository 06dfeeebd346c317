//! DOCX extraction: body paragraphs, flattened tables and OCR of embedded media.

use super::{Extraction, BLOCK_SEPARATOR};
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::ocr::OcrFallback;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};

const DOCUMENT_XML: &str = "word/document.xml";
const MEDIA_PREFIX: &str = "word/media/";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

pub(super) fn extract_docx(name: &str, bytes: &[u8], ocr: &OcrFallback) -> KnowledgeResult<Extraction> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        KnowledgeError::Extraction(format!("Failed to open DOCX '{}': {}", name, e))
    })?;

    let xml = read_entry_bounded(&mut archive, DOCUMENT_XML)?;
    let body = parse_body(&xml)?;

    let mut extraction = Extraction::default();
    extraction.push_block(&body.paragraphs.join(BLOCK_SEPARATOR));

    for (i, table) in body.tables.iter().enumerate() {
        extraction.push_block(&render_table(i + 1, table));
        extraction.tables += 1;
    }

    let mut media: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(MEDIA_PREFIX) && is_image(n))
        .map(|n| n.to_string())
        .collect();
    media.sort();

    for entry in media {
        let image = read_entry_bounded(&mut archive, &entry)?;
        let label = format!("{} {}", name, entry.trim_start_matches(MEDIA_PREFIX));
        extraction.recognize_image(ocr, &image, &label);
    }

    Ok(extraction)
}

fn is_image(entry: &str) -> bool {
    entry
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn read_entry_bounded(archive: &mut Archive<'_>, entry: &str) -> KnowledgeResult<Vec<u8>> {
    let file = archive
        .by_name(entry)
        .map_err(|e| KnowledgeError::Extraction(format!("DOCX entry {}: {}", entry, e)))?;

    let mut out = Vec::new();
    file.take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| KnowledgeError::Extraction(format!("DOCX entry {}: {}", entry, e)))?;

    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(KnowledgeError::Extraction(format!(
            "DOCX entry {} exceeds size limit ({} bytes)",
            entry, MAX_ENTRY_BYTES
        )));
    }
    Ok(out)
}

#[derive(Debug, Default)]
struct Body {
    paragraphs: Vec<String>,
    tables: Vec<Vec<Vec<String>>>,
}

/// Walk `w:body`, keeping paragraphs outside tables and cell text inside them.
/// Nested tables are folded into the text of the enclosing cell.
fn parse_body(xml: &[u8]) -> KnowledgeResult<Body> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut body = Body::default();
    let mut table_depth = 0usize;
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        rows.clear();
                    }
                }
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                b"p" => paragraph.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| KnowledgeError::Extraction(format!("DOCX text: {}", e)))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim();
                    if table_depth > 0 && !text.is_empty() {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(text);
                    } else if !text.is_empty() {
                        body.paragraphs.push(text.to_string());
                    }
                }
                b"tc" if table_depth == 1 => row.push(std::mem::take(&mut cell)),
                b"tr" if table_depth == 1 => rows.push(std::mem::take(&mut row)),
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && rows.iter().any(|r| r.iter().any(|c| !c.is_empty())) {
                        body.tables.push(std::mem::take(&mut rows));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(KnowledgeError::Extraction(format!(
                    "Malformed {} at byte {}: {}",
                    DOCUMENT_XML,
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(body)
}

fn render_table(number: usize, rows: &[Vec<String>]) -> String {
    let mut out = format!("### Table {}", number);
    for row in rows {
        out.push('\n');
        out.push_str("| ");
        out.push_str(&row.join(" | "));
        out.push_str(" |");
    }
    out
}
