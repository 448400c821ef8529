use crate::error::ApiError;
use crate::models::{Material, Outline};
use anyhow::{Context, Result};
use docx_rust::DocxFile;
use docx_rust::document::{
    BodyContent, ParagraphContent, RunContent, TableCellContent, TableRowContent,
};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::io::Cursor;
use std::sync::LazyLock;

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json span pattern is valid"));

/// Parses a model answer as `T`.
///
/// The whole payload is tried first since both providers are asked for
/// JSON-only output; failing that, the widest `{...}` span is parsed.
pub fn parse_json_reply<T: DeserializeOwned>(
    provider: &'static str,
    text: &str,
) -> Result<T, ApiError> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }
    let span = JSON_OBJECT
        .find(text)
        .ok_or(ApiError::NoJson { provider })?;
    serde_json::from_str(span.as_str())
        .map_err(|source| ApiError::InvalidJson { provider, source })
}

/// What an uploaded file turned out to be.
#[derive(Debug)]
pub enum SourceUpload {
    Text(String),
    Outline(Outline),
    Material(Material),
}

pub fn classify_upload(file_name: &str, bytes: &[u8]) -> Result<Option<SourceUpload>> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".docx") {
        let text = docx_text(bytes)?;
        Ok(Some(SourceUpload::Text(text)))
    } else if lower.ends_with(".txt") {
        Ok(Some(SourceUpload::Text(utf8_without_bom(bytes)?)))
    } else if lower.ends_with(".json") {
        let text = utf8_without_bom(bytes)?;
        parse_saved_json(&text).map(Some)
    } else {
        Ok(None)
    }
}

/// Accepts either a saved outline or a saved chapter material.
pub fn parse_saved_json(text: &str) -> Result<SourceUpload> {
    let value: serde_json::Value = serde_json::from_str(text).context("file is not valid JSON")?;
    if value.get("chapters").is_some() {
        let outline: Outline = serde_json::from_value(value).context("invalid outline JSON")?;
        return Ok(SourceUpload::Outline(outline.normalized()));
    }
    if value.get("title").is_some() || value.get("topics").is_some() {
        let material: Material = serde_json::from_value(value).context("invalid material JSON")?;
        return Ok(SourceUpload::Material(material));
    }
    anyhow::bail!("JSON has neither a 'chapters' outline nor a 'title'/'topics' material")
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

fn utf8_without_bom(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).context("file is not valid UTF-8")
}

/// Paragraph texts first, then every table cell, one per line.
fn docx_text(bytes: &[u8]) -> Result<String> {
    let file = DocxFile::from_reader(Cursor::new(bytes))
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to open DOCX")?;
    let docx = file
        .parse()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to parse DOCX content")?;

    let mut lines = Vec::new();
    for content in &docx.document.body.content {
        if let BodyContent::Paragraph(para) = content {
            lines.push(paragraph_text(para));
        }
    }
    for content in &docx.document.body.content {
        if let BodyContent::Table(table) = content {
            for row in &table.rows {
                for cell_content in &row.cells {
                    if let TableRowContent::TableCell(cell) = cell_content {
                        let texts: Vec<String> = cell
                            .content
                            .iter()
                            .map(|tc| {
                                let TableCellContent::Paragraph(para) = tc;
                                paragraph_text(para)
                            })
                            .collect();
                        lines.push(texts.join("\n"));
                    }
                }
            }
        }
    }

    Ok(lines.join("\n"))
}

fn paragraph_text(para: &docx_rust::document::Paragraph) -> String {
    let mut text = String::new();
    for pc in &para.content {
        match pc {
            ParagraphContent::Run(run) => push_run_text(&mut text, run),
            ParagraphContent::Link(link) => {
                if let Some(run) = link.content.as_ref() {
                    push_run_text(&mut text, run);
                }
            }
            _ => {}
        }
    }
    text
}

fn push_run_text(text: &mut String, run: &docx_rust::document::Run) {
    for rc in &run.content {
        match rc {
            RunContent::Text(t) => text.push_str(&t.text),
            RunContent::Break(_) => text.push('\n'),
            RunContent::Tab(_) => text.push('\t'),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_wrapped_in_prose_is_recovered() {
        let reply = "Sure! Here is the outline:\n```json\n\
            {\"chapters\": [{\"chapter\": \"Cells\", \"topics\": [\"Membranes\", \"Organelles\"]}]}\
            \n```\nLet me know.";
        let outline: Outline = parse_json_reply("Gemini", reply).unwrap();
        assert_eq!(outline.chapters.len(), 1);
        assert_eq!(outline.chapters[0].chapter, "Cells");
        assert_eq!(outline.chapters[0].topics, vec!["Membranes", "Organelles"]);
    }

    #[test]
    fn bare_json_reply_parses_directly() {
        let outline: Outline =
            parse_json_reply("Gemini", r#"  {"chapters": []}  "#).unwrap();
        assert!(outline.chapters.is_empty());
    }

    #[test]
    fn reply_without_braces_is_no_json() {
        let err = parse_json_reply::<Outline>("Gemini", "I cannot help with that.").unwrap_err();
        assert!(matches!(err, ApiError::NoJson { provider: "Gemini" }));
    }

    #[test]
    fn broken_json_is_invalid_json() {
        let err = parse_json_reply::<Material>("DeepSeek", "here {\"title\": } done").unwrap_err();
        assert!(matches!(err, ApiError::InvalidJson { .. }));
    }

    #[test]
    fn saved_outline_and_material_are_told_apart() {
        match parse_saved_json(r#"{"chapters":[{"topics":["a"]}]}"#).unwrap() {
            SourceUpload::Outline(outline) => assert_eq!(outline.chapters[0].chapter, "Chapter 1"),
            other => panic!("expected outline, got {:?}", other),
        }
        match parse_saved_json(r#"{"title":"Cells","topics":[]}"#).unwrap() {
            SourceUpload::Material(material) => assert_eq!(material.title, "Cells"),
            other => panic!("expected material, got {:?}", other),
        }
        assert!(parse_saved_json(r#"{"foo":1}"#).is_err());
    }

    #[test]
    fn text_upload_strips_bom() {
        let bytes = [&[0xEF, 0xBB, 0xBF][..], "Week 1: Cells".as_bytes()].concat();
        match classify_upload("outline.TXT", &bytes).unwrap() {
            Some(SourceUpload::Text(text)) => assert_eq!(text, "Week 1: Cells"),
            other => panic!("expected text, got {:?}", other),
        }
        assert!(classify_upload("slides.pptx", b"x").unwrap().is_none());
    }

    #[test]
    fn corrupt_docx_is_an_error() {
        let err = classify_upload("outline.docx", b"not a zip").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open DOCX"));
    }
}
