//! Page text to blocks, with caption detection

use regex::Regex;
use std::sync::OnceLock;

use crate::types::{BlockType, TextBlock};

use super::parser::PageText;

/// Upper bound on the estimated line height, in points
const MAX_LINE_HEIGHT: f32 = 14.0;

/// Longest line still treated as a section header
const MAX_HEADER_LEN: usize = 80;

fn caption_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(Fig(?:ure)?s?\.?|Tab(?:le)?s?\.?|Eq(?:uation)?s?\.?)\s*\(?(\d+(?:\.\d+)?)\)?\s*[:.|-]",
        )
        .expect("Invalid regex")
    })
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\d+(?:\.\d+)*\.?\s+[A-Z][^.]*|[A-Z][A-Z0-9 \-]{3,})$").expect("Invalid regex")
    })
}

/// Kind and number of a caption, e.g. `(Figure, "2.1")` for "Fig. 2.1: ..."
pub fn caption_label(text: &str) -> Option<(BlockType, String)> {
    let caps = caption_pattern().captures(text.trim_start())?;
    let prefix = caps.get(1)?.as_str().to_ascii_lowercase();
    let number = caps.get(2)?.as_str().to_string();

    let kind = if prefix.starts_with("fig") {
        BlockType::Figure
    } else if prefix.starts_with("tab") {
        BlockType::Table
    } else {
        BlockType::Equation
    };
    Some((kind, number))
}

fn classify(text: &str) -> BlockType {
    if let Some((kind, _)) = caption_label(text) {
        return kind;
    }
    let single_line = !text.contains('\n');
    if single_line && text.len() <= MAX_HEADER_LEN && header_pattern().is_match(text) {
        return BlockType::SectionHeader;
    }
    BlockType::Text
}

/// Split a page into paragraph blocks.
///
/// Blank lines end a paragraph. A caption line is always a block of its
/// own; text right after it starts a new block. Text extraction gives no
/// coordinates, so each block's bbox is estimated from its line span over
/// the page height.
pub fn split_blocks(page: &PageText) -> Vec<TextBlock> {
    let lines: Vec<&str> = page.text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let [width, height] = page.size;
    let line_height = (height / lines.len() as f32).min(MAX_LINE_HEIGHT);

    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut start: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
            continue;
        }
        if caption_label(trimmed).is_some() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
            spans.push((i, i + 1));
            continue;
        }
        start.get_or_insert(i);
    }
    if let Some(s) = start {
        spans.push((s, lines.len()));
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(n, (first, end))| {
            let text = lines[first..end]
                .iter()
                .map(|l| l.trim())
                .collect::<Vec<_>>()
                .join("\n");
            TextBlock {
                block_type: classify(&text),
                bbox: [
                    0.0,
                    first as f32 * line_height,
                    width,
                    end as f32 * line_height,
                ],
                page_idx: page.index,
                id: format!("/page/{}/block/{}", page.index, n),
                text,
            }
        })
        .collect()
}
