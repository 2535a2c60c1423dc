//! PDF loading and per-page text extraction

use lopdf::{Document, Object, ObjectId};

use crate::error::{Error, Result};

/// US Letter, used when a page carries no readable MediaBox
const DEFAULT_PAGE_SIZE: [f32; 2] = [612.0, 792.0];

/// How far up the page tree an inherited MediaBox is searched
const MAX_PARENT_DEPTH: usize = 8;

/// Text and geometry of a single page
#[derive(Debug, Clone)]
pub struct PageText {
    /// 0-based page index
    pub index: usize,
    /// Width and height in points
    pub size: [f32; 2],
    pub text: String,
}

/// A PDF that parsed far enough to count its pages
pub struct LoadedPdf {
    filename: String,
    document: Document,
    data: Vec<u8>,
}

impl LoadedPdf {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    pub fn file_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// PDF parser: lopdf for structure, pdf-extract as a text fallback
pub struct PdfParser;

impl PdfParser {
    /// Parse the document structure
    pub fn load(filename: &str, data: Vec<u8>) -> Result<LoadedPdf> {
        if !data.starts_with(b"%PDF") {
            return Err(Error::file_parse(filename, "File is not a PDF document"));
        }

        let document = Document::load_mem(&data)
            .map_err(|e| Error::file_parse(filename, format!("Failed to load PDF: {}", e)))?;

        if document.get_pages().is_empty() {
            return Err(Error::file_parse(filename, "PDF has no pages"));
        }

        Ok(LoadedPdf {
            filename: filename.to_string(),
            document,
            data,
        })
    }

    /// Extract normalized text for every page, in page order.
    ///
    /// Blocking and potentially slow on large or font-heavy documents; run
    /// it off the async runtime.
    pub fn extract_pages(pdf: &LoadedPdf) -> Result<Vec<PageText>> {
        let mut pages = Vec::new();

        for (index, (page_number, page_id)) in pdf.document.get_pages().into_iter().enumerate() {
            let text = match pdf.document.extract_text(&[page_number]) {
                Ok(text) => normalize_text(&text),
                Err(e) => {
                    tracing::debug!("Could not extract text for page {}: {}", page_number, e);
                    String::new()
                }
            };
            pages.push(PageText {
                index,
                size: page_size(&pdf.document, page_id),
                text,
            });
        }

        if pages.iter().all(|p| p.text.trim().is_empty()) {
            tracing::warn!(
                "Per-page extraction found no text in {}, trying whole-document fallback",
                pdf.filename
            );
            let text = Self::extract_whole_document(pdf)?;
            if let Some(first) = pages.first_mut() {
                first.text = text;
            }
        }

        Ok(pages)
    }

    fn extract_whole_document(pdf: &LoadedPdf) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(&pdf.data).map_err(|e| {
            Error::file_parse(&pdf.filename, format!("Text extraction failed: {}", e))
        })?;
        let text = normalize_text(&text);

        if text.trim().is_empty() {
            return Err(Error::file_parse(
                &pdf.filename,
                "PDF appears to be image-based or has no extractable text",
            ));
        }
        Ok(text)
    }
}

/// Read the page's MediaBox, following inherited values up the page tree
fn page_size(document: &Document, page_id: ObjectId) -> [f32; 2] {
    let mut current = Some(page_id);

    for _ in 0..MAX_PARENT_DEPTH {
        let Some(id) = current else { break };
        let Ok(dict) = document.get_object(id).and_then(Object::as_dict) else {
            break;
        };

        if let Ok(Object::Array(values)) = dict.get(b"MediaBox") {
            let coords: Vec<f32> = values.iter().filter_map(|v| v.as_float().ok()).collect();
            if let [x0, y0, x1, y1] = coords[..] {
                return [(x1 - x0).abs(), (y1 - y0).abs()];
            }
        }

        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    DEFAULT_PAGE_SIZE
}

/// Replace typographic glyphs with plain equivalents and drop blank lines
pub(crate) fn normalize_text(text: &str) -> String {
    text.replace('\0', "")
        .replace(['\u{2010}', '\u{2011}', '\u{2013}'], "-")
        .replace('\u{2014}', "--")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace('\u{2026}', "...")
        .replace('\u{00A0}', " ")
        .replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}
