//! Page-level text extraction from uploaded documents.
//!
//! Extraction degrades instead of failing: a document that cannot be parsed,
//! or a page without extractable text, contributes an empty segment and the
//! rest of the batch carries on.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF-";
const FORM_FEED: char = '\u{c}';

/// Uploaded document: raw bytes plus the name it was uploaded under.
#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    bytes: Vec<u8>,
}

impl Document {
    /// Wraps in-memory bytes.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Reads a document from disk, using the file name as identifier.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    /// Identifier supplied with the upload.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw document bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Detected document format.
    pub fn kind(&self) -> DocumentKind {
        if self.bytes.starts_with(PDF_MAGIC) || self.name.to_ascii_lowercase().ends_with(".pdf") {
            DocumentKind::Pdf
        } else {
            DocumentKind::Text
        }
    }
}

/// Formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Portable Document Format, one segment per page.
    Pdf,
    /// UTF-8 text, pages separated by form feeds.
    Text,
}

/// Text extracted from a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageText {
    /// Owning document identifier.
    pub document: String,
    /// 1-based page number within the document.
    pub page: usize,
    /// Extracted text; empty when the page was unreadable.
    pub text: String,
}

/// Counters describing how well extraction went.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    /// Documents processed.
    pub documents: usize,
    /// Page segments emitted (including empty ones).
    pub pages: usize,
    /// Pages that produced no text.
    pub empty_pages: usize,
    /// Documents that could not be parsed at all.
    pub unreadable_documents: usize,
}

/// Concatenated text of every page of every document, in input order.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    /// Page segments joined without a separator.
    pub text: String,
    /// Extraction statistics.
    pub report: ExtractionReport,
}

impl Corpus {
    /// True when extraction produced no characters at all.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Extracts every page of `document`, in page order.
///
/// Never fails: an unparseable document yields a single empty page.
pub fn extract_pages(document: &Document) -> Vec<PageText> {
    extract_document(document).0
}

/// Extracts all documents into a single corpus string.
pub fn extract_corpus(documents: &[Document]) -> Corpus {
    let mut corpus = Corpus::default();
    for document in documents {
        corpus.report.documents += 1;
        let (pages, readable) = extract_document(document);
        if !readable {
            corpus.report.unreadable_documents += 1;
        }
        for page in pages {
            corpus.report.pages += 1;
            if page.text.trim().is_empty() {
                corpus.report.empty_pages += 1;
                debug!(document = %page.document, page = page.page, "page produced no text");
            }
            corpus.text.push_str(&page.text);
        }
    }
    corpus
}

fn extract_document(document: &Document) -> (Vec<PageText>, bool) {
    let (segments, readable) = match document.kind() {
        DocumentKind::Pdf => match pdf_segments(document) {
            Ok(segments) => (segments, true),
            Err(err) => {
                warn!(document = document.name(), error = %err, "unreadable pdf; contributing empty text");
                (vec![String::new()], false)
            }
        },
        DocumentKind::Text => (text_segments(document.bytes()), true),
    };
    let pages = segments
        .into_iter()
        .enumerate()
        .map(|(idx, text)| PageText {
            document: document.name().to_string(),
            page: idx + 1,
            text,
        })
        .collect();
    (pages, readable)
}

fn pdf_segments(document: &Document) -> Result<Vec<String>, lopdf::Error> {
    let pdf = lopdf::Document::load_mem(document.bytes())?;
    let pages = pdf.get_pages();
    if pages.is_empty() {
        return Ok(vec![String::new()]);
    }
    let segments = pages
        .keys()
        .map(|&number| match pdf.extract_text(&[number]) {
            Ok(text) => text,
            Err(err) => {
                warn!(document = document.name(), page = number, error = %err, "page text extraction failed");
                String::new()
            }
        })
        .collect();
    Ok(segments)
}

fn text_segments(bytes: &[u8]) -> Vec<String> {
    let decoded = String::from_utf8_lossy(bytes);
    decoded.split(FORM_FEED).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_pdf_by_magic_or_extension() {
        assert_eq!(
            Document::new("upload", b"%PDF-1.5 ...".to_vec()).kind(),
            DocumentKind::Pdf
        );
        assert_eq!(
            Document::new("Report.PDF", b"garbage".to_vec()).kind(),
            DocumentKind::Pdf
        );
        assert_eq!(
            Document::new("notes.txt", b"hello".to_vec()).kind(),
            DocumentKind::Text
        );
    }

    #[test]
    fn text_pages_split_on_form_feed() {
        let doc = Document::new("notes.txt", b"first page\x0csecond page".to_vec());
        let pages = extract_pages(&doc);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].text, "first page");
        assert_eq!(pages[1].page, 2);
        assert_eq!(pages[1].text, "second page");
    }

    fn pdf_with_pages(pages: &[Option<&str>]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut pdf = lopdf::Document::with_version("1.5");
        let pages_id = pdf.new_object_id();
        let font_id = pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = pdf.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let kids: Vec<Object> = pages
            .iter()
            .map(|text| {
                let operations = match text {
                    Some(text) => vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 12.into()]),
                        Operation::new("Td", vec![72.into(), 720.into()]),
                        Operation::new("Tj", vec![Object::string_literal(*text)]),
                        Operation::new("ET", vec![]),
                    ],
                    None => Vec::new(),
                };
                let content = Content { operations }.encode().unwrap();
                let content_id = pdf.add_object(Stream::new(dictionary! {}, content));
                pdf.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "Resources" => resources_id,
                })
                .into()
            })
            .collect();
        let count = kids.len() as i64;
        pdf.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = pdf.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        pdf.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        pdf.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn pdf_pages_are_read_in_order_and_blank_pages_counted() {
        let bytes = pdf_with_pages(&[Some("Capital Paris"), None, Some("River Seine")]);
        let doc = Document::new("upload", bytes);
        assert_eq!(doc.kind(), DocumentKind::Pdf);

        let pages = extract_pages(&doc);
        let numbers: Vec<usize> = pages.iter().map(|p| p.page).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(pages[0].text.contains("Capital Paris"));
        assert!(pages[1].text.trim().is_empty());
        assert!(pages[2].text.contains("River Seine"));

        let corpus = extract_corpus(&[doc]);
        assert_eq!(corpus.report.pages, 3);
        assert_eq!(corpus.report.empty_pages, 1);
        assert_eq!(corpus.report.unreadable_documents, 0);
        let first = corpus.text.find("Capital Paris").unwrap();
        let third = corpus.text.find("River Seine").unwrap();
        assert!(first < third);
        let expected: String = pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(corpus.text, expected);
    }

    #[test]
    fn corrupt_pdf_contributes_empty_segment() {
        let docs = vec![
            Document::new("a.txt", b"Alpha. ".to_vec()),
            Document::new("broken.pdf", b"%PDF-1.4 not really a pdf".to_vec()),
            Document::new("b.txt", b"Beta.".to_vec()),
        ];
        let corpus = extract_corpus(&docs);
        assert_eq!(corpus.text, "Alpha. Beta.");
        assert_eq!(corpus.report.documents, 3);
        assert_eq!(corpus.report.pages, 3);
        assert_eq!(corpus.report.empty_pages, 1);
        assert_eq!(corpus.report.unreadable_documents, 1);
    }

    #[test]
    fn pages_concatenate_without_separator() {
        let docs = vec![Document::new("doc.txt", b"one\x0c\x0ctwo".to_vec())];
        let corpus = extract_corpus(&docs);
        assert_eq!(corpus.text, "onetwo");
        assert_eq!(corpus.report.empty_pages, 1);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let doc = Document::new("latin1.txt", vec![b'c', b'a', b'f', 0xe9]);
        let pages = extract_pages(&doc);
        assert_eq!(pages[0].text, "caf\u{fffd}");
    }

    #[test]
    fn empty_input_yields_empty_corpus() {
        let corpus = extract_corpus(&[]);
        assert!(corpus.is_empty());
        assert_eq!(corpus.report, ExtractionReport::default());
    }
}
