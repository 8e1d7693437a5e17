//! Format loaders: turn a source file into [`TextUnit`]s.
//!
//! A [`LoaderRegistry`] maps lower-cased file extensions to [`DocumentLoader`]
//! implementations. Adding a format means registering another loader; the
//! ingestion driver never branches on extensions itself.
//!
//! | Extension | Loader | Units |
//! |-----------|--------|-------|
//! | `.txt` `.text` `.md` `.markdown` | [`TextLoader`] | one, whole file |
//! | `.pdf` | [`PdfLoader`] | one per page (`page`) |
//! | `.docx` | [`DocxLoader`] | one, paragraphs separated by blank lines |
//! | `.xlsx` | [`XlsxLoader`] | one per worksheet (`sheet`) |
//! | `.html` `.htm` | [`HtmlLoader`] | one, visible text |
//!
//! Loaders never panic on malformed input; they return a [`LoadError`] and
//! the driver marks the file failed.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use thiserror::Error;

use crate::models::TextUnit;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Worksheets beyond this are ignored.
const XLSX_MAX_SHEETS: usize = 100;
/// Cells beyond this are ignored per worksheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no loader registered for extension '{0}'")]
    Unsupported(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid UTF-8", .0.display())]
    Encoding(PathBuf),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("stem '{stem}' already produced by {existing}")]
    StemCollision { stem: String, existing: String },
}

/// A parser for one family of file formats.
pub trait DocumentLoader: Send + Sync {
    /// Short identifier recorded in unit metadata (`loader`).
    fn name(&self) -> &str;

    /// Lower-cased extensions including the leading dot.
    fn extensions(&self) -> &[&'static str];

    /// Parse `bytes`, the content of `path`. `path` only names the file in
    /// errors.
    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError>;
}

/// Extension to loader dispatch table.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn DocumentLoader>>,
    by_extension: HashMap<String, usize>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
            by_extension: HashMap::new(),
        }
    }

    /// A registry with every built-in loader.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TextLoader));
        registry.register(Box::new(PdfLoader));
        registry.register(Box::new(DocxLoader));
        registry.register(Box::new(XlsxLoader));
        registry.register(Box::new(HtmlLoader));
        registry
    }

    /// Register a loader. A later registration takes over any extension it shares
    /// with an earlier one.
    pub fn register(&mut self, loader: Box<dyn DocumentLoader>) {
        let idx = self.loaders.len();
        for ext in loader.extensions() {
            self.by_extension.insert(ext.to_ascii_lowercase(), idx);
        }
        self.loaders.push(loader);
    }

    pub fn get(&self, extension: &str) -> Option<&dyn DocumentLoader> {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .map(|&idx| self.loaders[idx].as_ref())
    }

    pub fn is_supported(&self, extension: &str) -> bool {
        self.get(extension).is_some()
    }

    /// Sorted list of registered extensions.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.by_extension.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Read and load `path` with the loader registered for its extension.
    pub fn load(&self, path: &Path) -> Result<Vec<TextUnit>, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_bytes(path, &bytes)
    }

    /// Load content already read from `path`, so callers that hashed the
    /// bytes chunk exactly what they hashed.
    pub fn load_bytes(&self, path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
        let ext = extension_of(path);
        let loader = self
            .get(&ext)
            .ok_or_else(|| LoadError::Unsupported(ext.clone()))?;
        let units = loader.load(path, bytes)?;
        Ok(units
            .into_iter()
            .map(|unit| unit.with_meta("loader", loader.name()))
            .collect())
    }
}

/// Lower-cased extension of `path` including the leading dot, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

fn decode_utf8<'a>(path: &Path, bytes: &'a [u8]) -> Result<&'a str, LoadError> {
    let text = std::str::from_utf8(bytes).map_err(|_| LoadError::Encoding(path.to_path_buf()))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

// ── Plain text ──────────────────────────────────────────────────────────

pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn name(&self) -> &str {
        "text"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".txt", ".text", ".md", ".markdown"]
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
        Ok(vec![TextUnit::new(decode_utf8(path, bytes)?)])
    }
}

// ── PDF ─────────────────────────────────────────────────────────────────

pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn name(&self) -> &str {
        "pdf"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".pdf"]
    }

    fn load(&self, _path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
        pdf_units(bytes)
    }
}

fn pdf_units(bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| LoadError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextUnit::new(text).with_meta("page", i + 1))
        .collect())
}

// ── OOXML shared helpers ────────────────────────────────────────────────

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, LoadError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| LoadError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, LoadError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| LoadError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| LoadError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Numbered entries such as `xl/worksheets/sheet3.xml`, sorted by number.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

// ── DOCX ────────────────────────────────────────────────────────────────

pub struct DocxLoader;

impl DocumentLoader for DocxLoader {
    fn name(&self) -> &str {
        "docx"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".docx"]
    }

    fn load(&self, _path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
        Ok(vec![TextUnit::new(docx_text(bytes)?)])
    }
}

fn docx_text(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = open_archive(bytes)?;
    if !has_entry(&archive, "word/document.xml") {
        return Err(LoadError::Ooxml("word/document.xml not found".to_string()));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    docx_paragraphs(&xml)
}

/// Concatenate `w:t` runs, one paragraph (`w:p`) per blank-line-separated block.
fn docx_paragraphs(xml: &[u8]) -> Result<String, LoadError> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| LoadError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push(' '),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

// ── XLSX ────────────────────────────────────────────────────────────────

pub struct XlsxLoader;

impl DocumentLoader for XlsxLoader {
    fn name(&self) -> &str {
        "xlsx"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".xlsx"]
    }

    fn load(&self, _path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
        xlsx_units(bytes)
    }
}

fn xlsx_units(bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet_names = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut units = Vec::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = xlsx_sheet_text(&xml, &shared_strings)?;
        units.push(TextUnit::new(text).with_meta("sheet", idx + 1));
    }
    Ok(units)
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, LoadError> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| LoadError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values joined by spaces within a row, rows joined by newlines.
fn xlsx_sheet_text(xml: &[u8], shared_strings: &[String]) -> Result<String, LoadError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type: Option<Vec<u8>> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"t")
                        .map(|a| a.value.into_owned());
                }
                // `<v>` holds stored values, `<t>` inline strings.
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().map_err(|e| LoadError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                if !value.is_empty() {
                    let resolved = if cell_type.as_deref() == Some(&b"s"[..]) {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(text) = resolved {
                        row.push(text);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_type = None,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" "));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

// ── HTML ────────────────────────────────────────────────────────────────

pub struct HtmlLoader;

impl DocumentLoader for HtmlLoader {
    fn name(&self) -> &str {
        "html"
    }

    fn extensions(&self) -> &[&'static str] {
        &[".html", ".htm"]
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Vec<TextUnit>, LoadError> {
        Ok(vec![TextUnit::new(html_text(decode_utf8(path, bytes)?))])
    }
}

/// Visible text nodes, one per line. Script, style and head content are skipped.
fn html_text(source: &str) -> String {
    let document = scraper::Html::parse_document(source);
    let mut lines = Vec::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|el| {
                matches!(el.name(), "script" | "style" | "noscript" | "head" | "template")
            })
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    lines.join("\n")
}
