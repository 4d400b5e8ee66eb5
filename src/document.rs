//! Plain-text extraction from uploaded journal entries.
//!
//! Two formats are accepted: UTF-8 text files and `.docx` word-processing
//! documents. A `.docx` file is a zip container; its body lives in
//! `word/document.xml`, where each body-level `<w:p>` is one paragraph.

use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::constants::{MIME_DOCX, MIME_TEXT};
use crate::error::ExtractError;

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    WordProcessing,
}

impl DocumentKind {
    /// Resolves the upload's format from its declared MIME type, falling back
    /// to the file extension when the browser sent nothing useful.
    pub fn detect(declared_mime: &str, file_name: Option<&str>) -> Result<Self, ExtractError> {
        let essence = declared_mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            MIME_TEXT => return Ok(DocumentKind::PlainText),
            MIME_DOCX => return Ok(DocumentKind::WordProcessing),
            "" | "application/octet-stream" => {}
            _ => return Err(ExtractError::UnsupportedFormat { mime: essence }),
        }

        let extension = file_name
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("txt") => Ok(DocumentKind::PlainText),
            Some("docx") => Ok(DocumentKind::WordProcessing),
            _ => Err(ExtractError::UnsupportedFormat {
                mime: if essence.is_empty() {
                    "unknown".to_string()
                } else {
                    essence
                },
            }),
        }
    }
}

/// An upload as received from the shell. Consumed by [`extract_text`].
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub declared_mime: String,
    pub file_name: Option<String>,
}

impl UploadedFile {
    pub fn new(bytes: Vec<u8>, declared_mime: impl Into<String>) -> Self {
        Self {
            bytes,
            declared_mime: declared_mime.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn kind(&self) -> Result<DocumentKind, ExtractError> {
        DocumentKind::detect(&self.declared_mime, self.file_name.as_deref())
    }
}

/// Returns the plain text of an upload.
pub fn extract_text(file: UploadedFile) -> Result<String, ExtractError> {
    match file.kind()? {
        DocumentKind::PlainText => Ok(String::from_utf8(file.bytes)?),
        DocumentKind::WordProcessing => {
            let paragraphs = docx_paragraphs(&file.bytes)?;
            debug!(paragraphs = paragraphs.len(), "extracted docx paragraphs");
            Ok(paragraphs.join("\n"))
        }
    }
}

/// Text of every body-level paragraph, in document order. Empty paragraphs
/// are kept as empty strings.
pub fn docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Docx(format!("{DOCUMENT_PART}: {e}")))?;
    parse_paragraphs(&xml)
}

fn parse_paragraphs(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    // Local names of the currently open elements.
    let mut path: Vec<Vec<u8>> = Vec::new();
    // Index in `path` of the open body-level paragraph, if any.
    let mut paragraph_at: Option<usize> = None;
    let mut current = String::new();
    let mut paragraphs = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"p" && paragraph_at.is_none() && parent_is(&path, b"body") {
                    paragraph_at = Some(path.len());
                    current.clear();
                }
                path.push(name);
            }
            Event::Empty(e) => {
                let name = e.local_name();
                if name.as_ref() == b"p" && paragraph_at.is_none() && parent_is(&path, b"body") {
                    paragraphs.push(String::new());
                } else if let Some(at) = paragraph_at {
                    if in_paragraph_run(&path, at) {
                        push_run_control(&mut current, name.as_ref(), &e);
                    }
                }
            }
            Event::Text(t) => {
                if let Some(at) = paragraph_at {
                    if parent_is(&path, b"t") && in_paragraph_run(&path[..path.len() - 1], at) {
                        let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                        current.push_str(&text);
                    }
                }
            }
            Event::End(_) => {
                path.pop();
                if paragraph_at == Some(path.len()) {
                    paragraph_at = None;
                    paragraphs.push(std::mem::take(&mut current));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn parent_is(path: &[Vec<u8>], name: &[u8]) -> bool {
    path.last().is_some_and(|last| last.as_slice() == name)
}

/// True when `path` ends in a run that belongs directly to the paragraph at
/// `at`, either as `p/r` or `p/hyperlink/r`.
fn in_paragraph_run(path: &[Vec<u8>], at: usize) -> bool {
    match &path[at..] {
        [_, r] => r.as_slice() == b"r",
        [_, link, r] => link.as_slice() == b"hyperlink" && r.as_slice() == b"r",
        _ => false,
    }
}

fn push_run_control(out: &mut String, name: &[u8], element: &BytesStart<'_>) {
    match name {
        b"tab" => out.push('\t'),
        b"cr" => out.push('\n'),
        b"br" => {
            let kind = element
                .try_get_attribute("w:type")
                .ok()
                .flatten()
                .map(|a| a.value.into_owned());
            // Page and column breaks carry no text.
            if kind.as_deref().map_or(true, |k| k == b"textWrapping") {
                out.push('\n');
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}<w:sectPr/></w:body></w:document>"#
        );
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(DOCUMENT_PART, SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn docx_upload(body: &str) -> UploadedFile {
        UploadedFile::new(docx_with_body(body), MIME_DOCX)
    }

    #[test]
    fn test_plain_text_is_decoded_exactly() {
        let text = "目標: 毎日30分読書する。今日は達成できた。";
        let file = UploadedFile::new(text.as_bytes().to_vec(), "text/plain");
        assert_eq!(extract_text(file).unwrap(), text);
    }

    #[test]
    fn test_plain_text_keeps_whitespace() {
        let text = "  line one\r\n\n\tline three\n";
        let file = UploadedFile::new(text.as_bytes().to_vec(), "text/plain; charset=utf-8");
        assert_eq!(extract_text(file).unwrap(), text);
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let file = UploadedFile::new(vec![0x66, 0x6f, 0xff, 0xfe], "text/plain");
        assert!(matches!(extract_text(file), Err(ExtractError::Decode(_))));
    }

    #[test]
    fn test_unsupported_mime_is_rejected() {
        let file = UploadedFile::new(b"%PDF-1.7".to_vec(), "application/pdf");
        match extract_text(file) {
            Err(ExtractError::UnsupportedFormat { mime }) => assert_eq!(mime, "application/pdf"),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_detect_falls_back_to_extension() {
        assert_eq!(
            DocumentKind::detect("application/octet-stream", Some("日記.DOCX")).unwrap(),
            DocumentKind::WordProcessing
        );
        assert_eq!(
            DocumentKind::detect("", Some("notes.txt")).unwrap(),
            DocumentKind::PlainText
        );
        assert!(DocumentKind::detect("", Some("notes.md")).is_err());
        assert!(DocumentKind::detect("", None).is_err());
    }

    #[test]
    fn test_declared_mime_wins_over_extension() {
        assert!(DocumentKind::detect("image/png", Some("diary.txt")).is_err());
    }

    #[test]
    fn test_docx_paragraphs_are_joined_with_newlines() {
        let file = docx_upload(
            "<w:p><w:r><w:t>目標: 毎日30分読書する。</w:t></w:r></w:p>\
             <w:p><w:r><w:t xml:space=\"preserve\">今日は </w:t></w:r><w:r><w:t>達成できた。</w:t></w:r></w:p>",
        );
        assert_eq!(
            extract_text(file).unwrap(),
            "目標: 毎日30分読書する。\n今日は 達成できた。"
        );
    }

    #[test]
    fn test_docx_empty_paragraphs_become_empty_lines() {
        let file = docx_upload(
            "<w:p><w:r><w:t>first</w:t></w:r></w:p><w:p/><w:p><w:pPr/></w:p><w:p><w:r><w:t>last</w:t></w:r></w:p>",
        );
        let text = extract_text(file).unwrap();
        assert_eq!(text, "first\n\n\nlast");
        assert_eq!(text.split('\n').count(), 4);
    }

    #[test]
    fn test_docx_run_controls_and_entities() {
        let file = docx_upload(
            "<w:p><w:pPr><w:tabs><w:tab w:val=\"left\" w:pos=\"720\"/></w:tabs></w:pPr>\
             <w:r><w:t>a</w:t><w:tab/><w:t>b &amp; c</w:t><w:br/><w:t>d</w:t><w:br w:type=\"page\"/></w:r></w:p>",
        );
        assert_eq!(extract_text(file).unwrap(), "a\tb & c\nd");
    }

    #[test]
    fn test_docx_hyperlink_text_counts_but_tables_do_not() {
        let file = docx_upload(
            "<w:p><w:r><w:t>see </w:t></w:r><w:hyperlink><w:r><w:t>link</w:t></w:r></w:hyperlink></w:p>\
             <w:tbl><w:tr><w:tc><w:p><w:r><w:t>cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>\
             <w:p><w:r><w:delText>gone</w:delText><w:t>kept</w:t></w:r></w:p>",
        );
        assert_eq!(extract_text(file).unwrap(), "see link\nkept");
    }

    #[test]
    fn test_docx_without_document_part_is_an_error() {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("word/other.xml", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"<x/>").unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let file = UploadedFile::new(bytes, MIME_DOCX);
        assert!(matches!(extract_text(file), Err(ExtractError::Docx(_))));
    }

    #[test]
    fn test_garbage_docx_is_an_error() {
        let file = UploadedFile::new(b"not a zip".to_vec(), MIME_DOCX);
        assert!(matches!(extract_text(file), Err(ExtractError::Docx(_))));
    }
}
