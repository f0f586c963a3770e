//! DOCX text extraction.
//!
//! A .docx file is a ZIP archive whose body lives in `word/document.xml`.
//! The walker streams that XML and rebuilds plain text: paragraphs become
//! lines, table cells in a row are joined with `" | "`, and explicit page
//! breaks split the output into pages. Empty pages are discarded.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};

use super::ExtractionError;

pub fn extract_docx(path: &Path) -> Result<String, ExtractionError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ExtractionError::Docx(format!("not a valid DOCX archive: {e}")))?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::Docx(format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut document_xml)
        .map_err(|e| ExtractionError::Docx(format!("failed to read document body: {e}")))?;

    let pages = walk_document_xml(&document_xml)?;
    debug!(pages = pages.len(), "Parsed DOCX body");

    let text = pages.join("\n\n");
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyDocument("docx"));
    }

    info!(
        path = %path.display(),
        pages = pages.len(),
        text_length = text.chars().count(),
        "DOCX text extracted"
    );
    Ok(text)
}

/// Walks WordprocessingML and reassembles readable text.
///
/// Elements handled: `w:p` (paragraph), `w:tbl`/`w:tr`/`w:tc` (tables),
/// `w:t` (text run), `w:br w:type="page"` and `w:lastRenderedPageBreak`
/// (page boundaries), `w:tab` (tab run).
fn walk_document_xml(xml: &str) -> Result<Vec<String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut pages: Vec<String> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    // Cells of the table row currently being read, None outside tables.
    let mut row_cells: Option<Vec<String>> = None;

    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ExtractionError::Docx(format!("malformed document XML: {e}")))?;

        match event {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"tr" => row_cells = Some(Vec::new()),
                b"tc" => {
                    if let Some(cells) = row_cells.as_mut() {
                        cells.push(String::new());
                    }
                }
                _ => {}
            },
            Event::Empty(ref e) => match e.local_name().as_ref() {
                b"br" => {
                    let is_page_break = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"type"
                            && a.value.as_ref() == b"page"
                    });
                    if is_page_break {
                        flush_paragraph(&mut paragraph, &mut row_cells, &mut lines);
                        flush_page(&mut lines, &mut pages);
                    } else {
                        push_text(&mut paragraph, &mut row_cells, "\n");
                    }
                }
                b"lastRenderedPageBreak" => {
                    flush_paragraph(&mut paragraph, &mut row_cells, &mut lines);
                    flush_page(&mut lines, &mut pages);
                }
                b"tab" => push_text(&mut paragraph, &mut row_cells, "\t"),
                _ => {}
            },
            Event::Text(ref t) => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractionError::Docx(format!("bad text run: {e}")))?;
                push_text(&mut paragraph, &mut row_cells, &text);
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"p" => flush_paragraph(&mut paragraph, &mut row_cells, &mut lines),
                b"tr" => {
                    if let Some(cells) = row_cells.take() {
                        let row = cells
                            .iter()
                            .map(|c| c.trim())
                            .filter(|c| !c.is_empty())
                            .collect::<Vec<_>>()
                            .join(" | ");
                        if !row.is_empty() {
                            lines.push(row);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    flush_paragraph(&mut paragraph, &mut row_cells, &mut lines);
    flush_page(&mut lines, &mut pages);

    Ok(pages)
}

fn push_text(paragraph: &mut String, row_cells: &mut Option<Vec<String>>, text: &str) {
    if let Some(cells) = row_cells.as_mut() {
        if let Some(cell) = cells.last_mut() {
            cell.push_str(text);
            return;
        }
    }
    paragraph.push_str(text);
}

fn flush_paragraph(
    paragraph: &mut String,
    row_cells: &mut Option<Vec<String>>,
    lines: &mut Vec<String>,
) {
    // Inside a table, paragraph ends stay within the current cell.
    if let Some(cells) = row_cells.as_mut() {
        if let Some(cell) = cells.last_mut() {
            cell.push(' ');
            return;
        }
    }
    let trimmed = paragraph.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
    paragraph.clear();
}

fn flush_page(lines: &mut Vec<String>, pages: &mut Vec<String>) {
    let page = lines.join("\n");
    if !page.trim().is_empty() {
        pages.push(page);
    }
    lines.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_docx(document_xml: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap();
        file
    }

    fn body(inner: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{inner}</w:body></w:document>"#
        )
    }

    #[test]
    fn paragraphs_become_lines() {
        let xml = body("<w:p><w:r><w:t>Első bekezdés</w:t></w:r></w:p><w:p><w:r><w:t>Második</w:t></w:r></w:p>");
        let file = make_docx(&xml);
        let text = extract_docx(file.path()).unwrap();
        assert_eq!(text, "Első bekezdés\nMásodik");
    }

    #[test]
    fn table_cells_joined_with_pipe() {
        let xml = body(
            "<w:tbl><w:tr>\
             <w:tc><w:p><w:r><w:t>Bérbeadó</w:t></w:r></w:p></w:tc>\
             <w:tc><w:p><w:r><w:t>Minta Kft.</w:t></w:r></w:p></w:tc>\
             </w:tr></w:tbl>",
        );
        let file = make_docx(&xml);
        let text = extract_docx(file.path()).unwrap();
        assert_eq!(text, "Bérbeadó | Minta Kft.");
    }

    #[test]
    fn page_break_splits_pages() {
        let xml = body(
            r#"<w:p><w:r><w:t>Page one</w:t></w:r></w:p><w:p><w:r><w:br w:type="page"/><w:t>Page two</w:t></w:r></w:p>"#,
        );
        let file = make_docx(&xml);
        let text = extract_docx(file.path()).unwrap();
        assert_eq!(text, "Page one\n\nPage two");
    }

    #[test]
    fn line_break_stays_within_page() {
        let xml = body(r#"<w:p><w:r><w:t>above</w:t><w:br/><w:t>below</w:t></w:r></w:p>"#);
        let file = make_docx(&xml);
        let text = extract_docx(file.path()).unwrap();
        assert_eq!(text, "above\nbelow");
    }

    #[test]
    fn empty_pages_discarded() {
        let xml = body(
            r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p><w:p><w:r><w:t>content</w:t></w:r></w:p>"#,
        );
        let file = make_docx(&xml);
        let text = extract_docx(file.path()).unwrap();
        assert_eq!(text, "content");
    }

    #[test]
    fn empty_document_is_an_error() {
        let xml = body("<w:p></w:p>");
        let file = make_docx(&xml);
        let result = extract_docx(file.path());
        assert!(matches!(result, Err(ExtractionError::EmptyDocument("docx"))));
    }

    #[test]
    fn non_zip_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"plain text, not a zip").unwrap();
        let result = extract_docx(file.path());
        assert!(matches!(result, Err(ExtractionError::Docx(_))));
    }

    #[test]
    fn archive_without_document_xml_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("other.txt", options).unwrap();
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
        let result = extract_docx(file.path());
        assert!(matches!(result, Err(ExtractionError::Docx(_))));
    }

    #[test]
    fn entity_escapes_are_decoded() {
        let xml = body("<w:p><w:r><w:t>A &amp; B &lt;C&gt;</w:t></w:r></w:p>");
        let file = make_docx(&xml);
        let text = extract_docx(file.path()).unwrap();
        assert_eq!(text, "A & B <C>");
    }
}
