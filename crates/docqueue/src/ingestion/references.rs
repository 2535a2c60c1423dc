//! Resolve in-text references ("Figure 2", "Table 1", "Eq. 3") to caption blocks

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{BlockType, Page, Reference, TextBlock};

use super::blocks::caption_label;

/// Narrowest highlight emitted for a reference, in points
const MIN_REFERENCE_WIDTH: f32 = 5.0;

struct ReferencePattern {
    regex: Regex,
    kind: BlockType,
    /// Bare forms like "(3)" are only kept when they resolve
    require_match: bool,
}

fn reference_patterns() -> &'static [ReferencePattern] {
    static PATTERNS: OnceLock<Vec<ReferencePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let number = r"(\d+(?:\.\d+)?(?:\s*-\s*\d+(?:\.\d+)?)?)";
        let pattern = |prefix: &str, kind, require_match| ReferencePattern {
            regex: Regex::new(&format!(r"\b(?:{})\s*{}", prefix, number)).expect("Invalid regex"),
            kind,
            require_match,
        };
        vec![
            pattern(r"Fig(?:ure)?s?\.?", BlockType::Figure, false),
            pattern(r"Tab(?:le)?s?\.?", BlockType::Table, false),
            pattern(r"Eq(?:uation)?s?\.?", BlockType::Equation, false),
            ReferencePattern {
                regex: Regex::new(r"\((\d+(?:\.\d+)?)\)").expect("Invalid regex"),
                kind: BlockType::Equation,
                require_match: true,
            },
        ]
    })
}

/// A caption that references can resolve to
struct Target {
    page: usize,
    block_id: String,
}

type FigureGraph = HashMap<(BlockType, String), Vec<Target>>;

/// Caption blocks across the document, in page order
pub fn collect_figures(pages: &[Page]) -> Vec<TextBlock> {
    pages
        .iter()
        .flat_map(|page| page.blocks.iter())
        .filter(|block| block.block_type.is_referenceable())
        .cloned()
        .collect()
}

fn build_graph(figures: &[TextBlock]) -> FigureGraph {
    let mut graph = FigureGraph::new();
    for figure in figures {
        let Some((kind, number)) = caption_label(&figure.text) else {
            continue;
        };
        let targets = graph.entry((kind, number)).or_default();
        if !targets.iter().any(|t| t.block_id == figure.id) {
            targets.push(Target {
                page: figure.page_idx,
                block_id: figure.id.clone(),
            });
        }
    }
    graph
}

/// Closest candidate: same page first, then earlier pages, then later ones
fn nearest<'a>(targets: &'a [Target], current_page: usize) -> Option<&'a Target> {
    targets.iter().min_by_key(|t| {
        if t.page == current_page {
            (0, 0)
        } else if t.page < current_page {
            (1, current_page - t.page)
        } else {
            (2, t.page - current_page)
        }
    })
}

/// Fill `references` on every page. Returns how many resolved.
pub fn map_references(pages: &mut [Page], figures: &[TextBlock]) -> usize {
    let graph = build_graph(figures);
    let mut resolved = 0;

    for page in pages.iter_mut() {
        let mut references = Vec::new();

        for block in page.blocks.iter().filter(|b| !b.block_type.is_referenceable()) {
            for pattern in reference_patterns() {
                let Some(caps) = pattern.regex.captures(&block.text) else {
                    continue;
                };
                let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let mention = whole.as_str();
                let target = graph
                    .get(&(pattern.kind, number.as_str().to_string()))
                    .and_then(|targets| nearest(targets, page.index));

                match target {
                    Some(target) => {
                        let boxes = reference_bboxes(mention, block);
                        tracing::debug!(
                            "Reference mapped: {} -> {} ({} occurrences)",
                            mention,
                            target.block_id,
                            boxes.len()
                        );
                        resolved += 1;
                        references.extend(boxes.into_iter().map(|bbox| Reference {
                            text: mention.to_string(),
                            bbox,
                            figure_id: Some(target.block_id.clone()),
                            not_matched: false,
                        }));
                    }
                    None if !pattern.require_match => {
                        if let Some(bbox) = reference_bboxes(mention, block).into_iter().next() {
                            references.push(Reference {
                                text: mention.to_string(),
                                bbox,
                                figure_id: None,
                                not_matched: true,
                            });
                        }
                    }
                    None => {}
                }
            }
        }

        page.references = references;
    }

    resolved
}

/// Estimate where each occurrence of `mention` sits inside `block`
fn reference_bboxes(mention: &str, block: &TextBlock) -> Vec<[f32; 4]> {
    let [x0, y0, x1, y1] = block.bbox;
    let lines: Vec<&str> = block.text.lines().collect();
    if lines.is_empty() || mention.is_empty() {
        return Vec::new();
    }

    let line_height = (y1 - y0) / lines.len() as f32;
    let mut boxes = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let line_len = line.chars().count();
        if line_len == 0 {
            continue;
        }
        let char_width = (x1 - x0) / line_len as f32;
        let top = y0 + i as f32 * line_height;
        let bottom = top + line_height;

        for (byte_start, _) in line.match_indices(mention) {
            let start = line[..byte_start].chars().count() as f32;
            let len = mention.chars().count() as f32;
            let left = x0 + start * char_width;
            let mut right = left + len * char_width;
            if right - left < MIN_REFERENCE_WIDTH {
                right = left + MIN_REFERENCE_WIDTH;
            }
            boxes.push([left.clamp(x0, x1), top, right.clamp(x0, x1), bottom]);
        }
    }

    boxes
}
