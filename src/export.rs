//! Transcript download as a `.docx` document.
//!
//! The package is the smallest set of WordprocessingML parts Word and
//! LibreOffice accept: content types, the package relationship, the main
//! document, and a style sheet defining the `Title` heading.

use std::io::{Cursor, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::constants::{EXPORT_ASSISTANT_LABEL, EXPORT_HEADING, EXPORT_USER_LABEL};
use crate::error::ExportError;
use crate::session::{Message, Role};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:eastAsia="MS Mincho"/><w:sz w:val="22"/></w:rPr></w:rPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style><w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:spacing w:after="240"/></w:pPr><w:rPr><w:b/><w:sz w:val="56"/></w:rPr></w:style></w:styles>"#;

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => EXPORT_USER_LABEL,
        Role::Assistant => EXPORT_ASSISTANT_LABEL,
    }
}

/// Builds the transcript document: a `Title` heading, then one
/// `"<label>: <content>"` paragraph per message in transcript order.
///
/// Output depends only on `messages`; entries carry a fixed timestamp so the
/// same transcript always yields the same bytes.
pub fn write_transcript(messages: &[Message]) -> Result<Vec<u8>, ExportError> {
    let document = document_xml(messages)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", PACKAGE_RELS.as_bytes()),
        ("word/document.xml", document.as_slice()),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS.as_bytes()),
        ("word/styles.xml", STYLES.as_bytes()),
    ] {
        zip.start_file(name, entry_options())?;
        zip.write_all(body)?;
    }
    Ok(zip.finish()?.into_inner())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
}

fn document_xml(messages: &[Message]) -> Result<Vec<u8>, ExportError> {
    let mut writer = Writer::new(Vec::new());
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))),
    )?;

    let mut root = BytesStart::new("w:document");
    root.push_attribute(("xmlns:w", W_NS));
    emit(&mut writer, Event::Start(root))?;
    emit(&mut writer, Event::Start(BytesStart::new("w:body")))?;

    paragraph(&mut writer, Some("Title"), EXPORT_HEADING)?;
    for message in messages {
        let line = format!("{}: {}", role_label(message.role), message.content);
        paragraph(&mut writer, None, &line)?;
    }

    emit(&mut writer, Event::Empty(BytesStart::new("w:sectPr")))?;
    emit(&mut writer, Event::End(BytesEnd::new("w:body")))?;
    emit(&mut writer, Event::End(BytesEnd::new("w:document")))?;
    Ok(writer.into_inner())
}

/// One paragraph holding a single run. Line breaks and tabs inside `text`
/// become `<w:br/>` and `<w:tab/>` so they survive in Word.
fn paragraph(
    writer: &mut Writer<Vec<u8>>,
    style: Option<&str>,
    text: &str,
) -> Result<(), ExportError> {
    emit(writer, Event::Start(BytesStart::new("w:p")))?;
    if let Some(style) = style {
        emit(writer, Event::Start(BytesStart::new("w:pPr")))?;
        let mut style_ref = BytesStart::new("w:pStyle");
        style_ref.push_attribute(("w:val", style));
        emit(writer, Event::Empty(style_ref))?;
        emit(writer, Event::End(BytesEnd::new("w:pPr")))?;
    }

    emit(writer, Event::Start(BytesStart::new("w:r")))?;
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            emit(writer, Event::Empty(BytesStart::new("w:br")))?;
        }
        for (j, segment) in line.trim_end_matches('\r').split('\t').enumerate() {
            if j > 0 {
                emit(writer, Event::Empty(BytesStart::new("w:tab")))?;
            }
            let segment = xml_safe(segment);
            if segment.is_empty() {
                continue;
            }
            let mut t = BytesStart::new("w:t");
            t.push_attribute(("xml:space", "preserve"));
            emit(writer, Event::Start(t))?;
            emit(writer, Event::Text(BytesText::new(&segment)))?;
            emit(writer, Event::End(BytesEnd::new("w:t")))?;
        }
    }
    emit(writer, Event::End(BytesEnd::new("w:r")))?;
    emit(writer, Event::End(BytesEnd::new("w:p")))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ExportError> {
    writer
        .write_event(event)
        .map_err(|e| ExportError::Xml(e.to_string()))
}

/// Drops control characters XML 1.0 cannot carry.
fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
