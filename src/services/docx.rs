//! Word document builder on top of `docx-rs`.
//!
//! Content is collected as a flat list of blocks and turned into a
//! `docx_rs::Docx` when the document is packed.

use crate::services::markup::{Run, render_markup};
use docx_rs::{AlignmentType, Docx, LineSpacing, Pic, SpecialIndentType, Style, StyleType};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Twentieths of a point.
pub const TWIPS_PER_POINT: u32 = 20;
pub const HALF_INCH_TWIPS: i32 = 720;
const BODY_AFTER: u32 = 6 * TWIPS_PER_POINT;

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("could not pack document: {0}")]
    Pack(String),
    #[error("could not write document: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spacing {
    pub before: u32,
    pub after: u32,
}

impl Spacing {
    pub const fn points(before: u32, after: u32) -> Self {
        Self {
            before: before * TWIPS_PER_POINT,
            after: after * TWIPS_PER_POINT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn flipped(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Coin flip backed by the v4 uuid generator.
    pub fn random() -> Self {
        if uuid::Uuid::new_v4().as_bytes()[0] & 1 == 0 {
            Side::Left
        } else {
            Side::Right
        }
    }

    fn alignment(self) -> AlignmentType {
        match self {
            Side::Left => AlignmentType::Left,
            Side::Right => AlignmentType::Right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Heading {
        level: u8,
        spacing: Spacing,
        runs: Vec<Run>,
    },
    Body(Vec<Run>),
    Reference(Vec<Run>),
    Picture {
        bytes: Vec<u8>,
        pixels: (u32, u32),
        extent: (u32, u32),
        side: Side,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DocxDocument {
    blocks: Vec<Block>,
}

impl DocxDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level 0 is the document title; 1 and above are section headings.
    pub fn add_heading(&mut self, text: &str, level: u8, spacing: Spacing) {
        let runs = runs(text);
        self.blocks.push(Block::Heading { level, spacing, runs });
    }

    /// Justified paragraph with a first-line indent; `<b>`/`<i>` markup is honoured.
    pub fn add_body(&mut self, markup: &str) {
        self.blocks.push(Block::Body(runs(markup)));
    }

    /// Hanging-indented bibliography entry.
    pub fn add_reference(&mut self, markup: &str) {
        self.blocks.push(Block::Reference(runs(markup)));
    }

    /// `pixels` is the picture's own size, `extent` its size on the page in EMU.
    pub fn add_picture(
        &mut self,
        bytes: Vec<u8>,
        pixels: (u32, u32),
        extent: (u32, u32),
        side: Side,
    ) {
        self.blocks.push(Block::Picture {
            bytes,
            pixels,
            extent,
            side,
        });
    }

    pub fn picture_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, Block::Picture { .. }))
            .count()
    }

    fn to_docx(&self) -> Docx {
        let mut docx = Docx::new()
            .add_style(
                Style::new("Title", StyleType::Paragraph)
                    .name("Title")
                    .size(56),
            )
            .add_style(
                Style::new("Heading1", StyleType::Paragraph)
                    .name("Heading 1")
                    .bold()
                    .color("2F5496")
                    .size(32),
            )
            .add_style(
                Style::new("Heading2", StyleType::Paragraph)
                    .name("Heading 2")
                    .bold()
                    .color("2F5496")
                    .size(26),
            );

        for block in &self.blocks {
            docx = docx.add_paragraph(paragraph(block));
        }
        docx
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut buf = Vec::new();
        self.to_docx()
            .build()
            .pack(Cursor::new(&mut buf))
            .map_err(|e| DocxError::Pack(e.to_string()))?;
        Ok(buf)
    }

    pub fn save(&self, path: &Path) -> Result<(), DocxError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

fn runs(markup: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    render_markup(markup, &mut runs);
    runs
}

fn with_runs(mut paragraph: docx_rs::Paragraph, runs: &[Run]) -> docx_rs::Paragraph {
    for run in runs {
        let mut r = docx_rs::Run::new().add_text(&run.text);
        if run.bold {
            r = r.bold();
        }
        if run.italic {
            r = r.italic();
        }
        paragraph = paragraph.add_run(r);
    }
    paragraph
}

fn paragraph(block: &Block) -> docx_rs::Paragraph {
    match block {
        Block::Heading { level, spacing, runs } => {
            let style = if *level == 0 {
                "Title".to_string()
            } else {
                format!("Heading{}", level)
            };
            with_runs(
                docx_rs::Paragraph::new()
                    .style(&style)
                    .line_spacing(LineSpacing::new().before(spacing.before).after(spacing.after)),
                runs,
            )
        }
        Block::Body(runs) => with_runs(
            docx_rs::Paragraph::new()
                .align(AlignmentType::Both)
                .indent(Some(0), Some(SpecialIndentType::FirstLine(HALF_INCH_TWIPS)), None, None)
                .line_spacing(LineSpacing::new().after(BODY_AFTER).line(240)),
            runs,
        ),
        Block::Reference(runs) => with_runs(
            docx_rs::Paragraph::new()
                .indent(
                    Some(HALF_INCH_TWIPS),
                    Some(SpecialIndentType::Hanging(HALF_INCH_TWIPS)),
                    None,
                    None,
                )
                .line_spacing(LineSpacing::new().after(BODY_AFTER).line(240)),
            runs,
        ),
        Block::Picture {
            bytes,
            pixels,
            extent,
            side,
        } => {
            let pic = Pic::new_with_dimensions(bytes.clone(), pixels.0, pixels.1)
                .size(extent.0, extent.1);
            docx_rs::Paragraph::new()
                .align(side.alignment())
                .line_spacing(LineSpacing::new().after(BODY_AFTER))
                .add_run(docx_rs::Run::new().add_image(pic))
        }
    }
}

/// One line per block, for checking layout in tests.
#[cfg(test)]
pub(crate) fn describe(doc: &DocxDocument) -> Vec<String> {
    let text = |runs: &[Run]| runs.iter().map(|r| r.text.as_str()).collect::<String>();
    doc.blocks
        .iter()
        .map(|block| match block {
            Block::Heading { level, runs, .. } => format!("h{}:{}", level, text(runs)),
            Block::Body(runs) => format!("body:{}", text(runs)),
            Block::Reference(runs) => format!("ref:{}", text(runs)),
            Block::Picture { side, .. } => format!("picture:{:?}", side).to_lowercase(),
        })
        .collect()
}
