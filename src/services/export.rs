use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use thiserror::Error;

use crate::db::models::{Paper, Question};
use crate::db::types::QuestionType;
use crate::services::normalizer;

pub(crate) const DEFAULT_TITLE: &str = "Question Paper";
pub(crate) const DEFAULT_TIME_LIMIT: i64 = 60;
pub(crate) const INVALID_OPTIONS_MARKER: &str = "Error: Invalid options format";

const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const MARGIN: i64 = 72;
const SPACER_HEIGHT: i64 = 12;
// Rough Helvetica advance as a share of the font size.
const AVERAGE_GLYPH_RATIO: f64 = 0.55;

#[derive(Debug, Error)]
pub(crate) enum ExportError {
    #[error("failed to encode page content: {0}")]
    Content(#[from] lopdf::Error),
    #[error("failed to write document: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextStyle {
    Title,
    Body,
    Meta,
}

impl TextStyle {
    fn font(self) -> &'static str {
        match self {
            Self::Title => "F2",
            Self::Body | Self::Meta => "F1",
        }
    }

    fn size(self) -> i64 {
        match self {
            Self::Title => 18,
            Self::Body => 11,
            Self::Meta => 9,
        }
    }

    fn leading(self) -> i64 {
        self.size() + self.size() / 3 + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Block {
    Line { style: TextStyle, text: String },
    Spacer,
}

impl Block {
    fn line(style: TextStyle, text: impl Into<String>) -> Self {
        Self::Line { style, text: text.into() }
    }
}

/// Lays out the paper header followed by `questions` in the order given.
pub(crate) fn compose(paper: &Paper, questions: &[Question]) -> Vec<Block> {
    let title =
        if paper.exam_title.trim().is_empty() { DEFAULT_TITLE } else { paper.exam_title.as_str() };
    let time_limit = if paper.time_limit > 0 { paper.time_limit } else { DEFAULT_TIME_LIMIT };

    let mut blocks = vec![
        Block::line(TextStyle::Title, title),
        Block::Spacer,
        Block::line(TextStyle::Body, format!("Time Limit: {time_limit} minutes")),
    ];
    if !paper.instructions.trim().is_empty() {
        blocks.push(Block::line(TextStyle::Body, "Instructions:"));
        blocks.push(Block::line(TextStyle::Body, paper.instructions.as_str()));
    }
    blocks.push(Block::Spacer);

    for (index, question) in questions.iter().enumerate() {
        blocks.push(Block::line(TextStyle::Body, format!("Q{}. {}", index + 1, question.question)));

        let options = match question.decode_options() {
            Ok(options) => options,
            Err(err) => {
                tracing::warn!(
                    question_id = question.id,
                    error = %err,
                    "Stored options could not be decoded"
                );
                blocks.push(Block::line(TextStyle::Meta, INVALID_OPTIONS_MARKER));
                continue;
            }
        };

        if question.question_type == QuestionType::MultipleChoice {
            for (index, option) in options.iter().enumerate() {
                let label = option_label(index);
                blocks.push(Block::line(TextStyle::Body, format!("   {label}. {option}")));
            }
        }

        blocks.push(Block::line(
            TextStyle::Meta,
            normalizer::metadata_line(
                question.question_type,
                question.difficulty,
                &question.blooms_level,
                &question.topic,
            ),
        ));
        blocks.push(Block::Spacer);
    }

    blocks
}

/// Renders blocks onto US-letter pages with the standard Helvetica faces.
pub(crate) fn render_pdf(blocks: &[Block]) -> Result<Vec<u8>, ExportError> {
    let pages = paginate(blocks);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for lines in &pages {
        let page_id = add_page(&mut doc, pages_id, lines)?;
        kids.push(Object::Reference(page_id));
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

struct PlacedLine {
    style: TextStyle,
    y: i64,
    text: String,
}

fn paginate(blocks: &[Block]) -> Vec<Vec<PlacedLine>> {
    let top = PAGE_HEIGHT - MARGIN;
    let mut pages = vec![Vec::new()];
    let mut cursor = top;

    for block in blocks {
        match block {
            Block::Spacer => cursor -= SPACER_HEIGHT,
            Block::Line { style, text } => {
                for wrapped in wrap(text, max_chars(*style)) {
                    if cursor - style.leading() < MARGIN {
                        pages.push(Vec::new());
                        cursor = top;
                    }
                    cursor -= style.leading();
                    if let Some(page) = pages.last_mut() {
                        page.push(PlacedLine { style: *style, y: cursor, text: wrapped });
                    }
                }
            }
        }
    }

    pages
}

fn add_page(
    doc: &mut Document,
    parent: ObjectId,
    lines: &[PlacedLine],
) -> Result<ObjectId, ExportError> {
    let mut operations = Vec::with_capacity(lines.len() * 5);
    for line in lines {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![line.style.font().into(), Object::Integer(line.style.size())],
        ));
        operations.push(Operation::new(
            "Td",
            vec![Object::Integer(MARGIN), Object::Integer(line.y)],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(to_latin(&line.text))]));
        operations.push(Operation::new("ET", vec![]));
    }

    let content = Content { operations }.encode()?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => parent,
        "Contents" => content_id,
    }))
}

/// `a`..`z`, then `aa`, `ab`, and so on.
fn option_label(index: usize) -> String {
    let mut label = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        n -= 1;
        label.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    label.iter().rev().collect()
}

fn max_chars(style: TextStyle) -> usize {
    let usable = (PAGE_WIDTH - 2 * MARGIN) as f64;
    (usable / (style.size() as f64 * AVERAGE_GLYPH_RATIO)).floor() as usize
}

/// Greedy wrap on whitespace. Leading indentation of the first line is kept and
/// words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let indent_len = text.len() - text.trim_start_matches(' ').len();
    let mut lines = Vec::new();
    let mut current = " ".repeat(indent_len);
    let mut current_len = indent_len;

    for word in text.split_whitespace() {
        let mut word = word.chars().collect::<Vec<_>>();
        while word.len() > width {
            // Only an indent-only line has room left for a split chunk.
            let room =
                if current.trim().is_empty() { width.saturating_sub(current_len) } else { 0 };
            if room == 0 {
                if !current.trim().is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                current.clear();
                current_len = 0;
                continue;
            }
            let rest = word.split_off(room);
            current.extend(word.iter());
            lines.push(std::mem::take(&mut current));
            current_len = 0;
            word = rest;
        }

        let needs_space = current_len > 0 && !current.ends_with(' ');
        let added = word.len() + usize::from(needs_space);
        if current_len + added > width && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        } else if needs_space {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if !current.trim().is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Encodes text as WinAnsi (CP1252), the single-byte encoding the fonts declare.
/// Characters outside it become `?`.
fn to_latin(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            ' '..='~' | '\u{a0}'..='\u{ff}' => ch as u32 as u8,
            _ => win_ansi_special(ch).unwrap_or(b'?'),
        })
        .collect()
}

/// The 0x80..=0x9F range of CP1252, which differs from Latin-1.
fn win_ansi_special(ch: char) -> Option<u8> {
    let byte = match ch {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}
