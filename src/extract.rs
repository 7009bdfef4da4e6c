//! Multi-format text extraction.
//!
//! [`Extractor::extract`] turns the raw bytes of a downloaded file into plain
//! UTF-8 text. Dispatch is by the lower-cased extension of the file name,
//! through a registry mapping extensions to extraction functions; the
//! declared content type is never consulted.
//!
//! | Extension | Extraction |
//! |-----------|-----------|
//! | `pdf` | page texts in page order, concatenated |
//! | `docx` | one paragraph per line |
//! | `txt` | UTF-8, invalid bytes replaced |
//! | `xlsx` | one line per row, cells joined by a space, sheets in workbook order |
//! | `csv` | one line per record, fields joined by a space |
//! | `pptx` | one line per text-bearing shape, slides in presentation order |
//! | `png`, `jpg`, `jpeg` | OCR via the configured [`OcrEngine`] |
//!
//! Extraction never fails. Unsupported extensions, unreadable files and OCR
//! problems all come back as a bracketed note (e.g.
//! `[Unsupported file format: zip]`) so that one bad file in a multi-file
//! question shows up inline in the context instead of aborting the request.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::config::{ExtractConfig, OcrMode};
use crate::models::ExtractedDocument;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Inline note used when OCR is switched off.
pub const OCR_DISABLED_NOTE: &str = "[Image OCR is not supported in this environment]";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Ooxml(String),
    Csv(String),
    OcrUnavailable,
    Ocr(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::Csv(e) => write!(f, "CSV parsing failed: {}", e),
            ExtractError::OcrUnavailable => write!(f, "OCR is disabled"),
            ExtractError::Ocr(e) => write!(f, "OCR failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Signature of a registered document extractor.
pub type ExtractFn = fn(&[u8]) -> Result<String, ExtractError>;

/// Text recognition for image files.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<String, ExtractError>;
}

/// OCR engine used when OCR is not configured.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _image: &[u8]) -> Result<String, ExtractError> {
        Err(ExtractError::OcrUnavailable)
    }
}

/// Runs the `tesseract` command line tool, image on stdin, text on stdout.
pub struct TesseractOcr {
    binary: PathBuf,
}

impl TesseractOcr {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &[u8]) -> Result<String, ExtractError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExtractError::Ocr(format!("{}: {}", self.binary.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::Ocr("stdin unavailable".to_string()))?;

        // Feed stdin from a second thread so a full stdout pipe cannot deadlock us.
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(image));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (output, written)
        });

        let (output, written) = output;
        let output = output.map_err(|e| ExtractError::Ocr(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        written.map_err(|e| ExtractError::Ocr(e.to_string()))?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

enum Handler {
    Document(ExtractFn),
    Image,
}

/// Extension registry plus the OCR engine for images.
pub struct Extractor {
    handlers: BTreeMap<String, Handler>,
    ocr: Box<dyn OcrEngine>,
    max_file_bytes: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::with_ocr(Box::new(DisabledOcr), usize::MAX)
    }
}

impl Extractor {
    /// Registry with every built-in format and the given OCR engine.
    pub fn with_ocr(ocr: Box<dyn OcrEngine>, max_file_bytes: usize) -> Self {
        let mut handlers = BTreeMap::new();
        let documents: [(&str, ExtractFn); 6] = [
            ("pdf", extract_pdf),
            ("docx", extract_docx),
            ("txt", extract_txt),
            ("xlsx", extract_xlsx),
            ("csv", extract_csv),
            ("pptx", extract_pptx),
        ];
        for (ext, f) in documents {
            handlers.insert(ext.to_string(), Handler::Document(f));
        }
        for ext in IMAGE_EXTENSIONS {
            handlers.insert(ext.to_string(), Handler::Image);
        }
        Self {
            handlers,
            ocr,
            max_file_bytes,
        }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        let ocr: Box<dyn OcrEngine> = match config.ocr {
            OcrMode::Disabled => Box::new(DisabledOcr),
            OcrMode::Tesseract => Box::new(TesseractOcr::new(config.tesseract_path.clone())),
        };
        Self::with_ocr(ocr, config.max_file_bytes)
    }

    /// Adds or replaces the extractor for `ext` (case-insensitive).
    pub fn register(&mut self, ext: &str, f: ExtractFn) {
        self.handlers
            .insert(ext.to_ascii_lowercase(), Handler::Document(f));
    }

    pub fn supports(&self, file_name: &str) -> bool {
        extension_of(file_name).is_some_and(|ext| self.handlers.contains_key(&ext))
    }

    /// Extracts text from `bytes`. Always returns a string.
    pub fn extract(&self, bytes: &[u8], file_name: &str) -> String {
        let ext = extension_of(file_name).unwrap_or_default();

        if bytes.len() > self.max_file_bytes {
            tracing::warn!(file = file_name, bytes = bytes.len(), "file too large to extract");
            return format!(
                "[File too large to extract: {} ({} bytes, limit {})]",
                file_name,
                bytes.len(),
                self.max_file_bytes
            );
        }

        match self.handlers.get(&ext) {
            Some(Handler::Document(f)) => match f(bytes) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(file = file_name, error = %e, degraded = true, "extraction failed");
                    format!("[Could not extract text from {}: {}]", file_name, e)
                }
            },
            Some(Handler::Image) => match self.ocr.recognize(bytes) {
                Ok(text) => text,
                Err(ExtractError::OcrUnavailable) => OCR_DISABLED_NOTE.to_string(),
                Err(e) => {
                    tracing::warn!(file = file_name, error = %e, degraded = true, "OCR failed");
                    format!("[Image OCR failed for {}: {}]", file_name, e)
                }
            },
            None => {
                let shown = if ext.is_empty() { "(none)" } else { ext.as_str() };
                format!("[Unsupported file format: {}]", shown)
            }
        }
    }

    pub fn extract_document(&self, bytes: &[u8], file_name: &str) -> ExtractedDocument {
        ExtractedDocument {
            file_name: file_name.to_string(),
            text: self.extract(bytes, file_name),
        }
    }
}

/// Extracts with the built-in registry and OCR disabled.
pub fn extract_text(bytes: &[u8], file_name: &str) -> String {
    Extractor::default().extract(bytes, file_name)
}

/// Lower-cased suffix after the last `.`; `None` when the name has no dot.
fn extension_of(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
}

// ============ Plain text ============

fn extract_txt(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = extract_txt(bytes)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        lines.push(record.iter().collect::<Vec<_>>().join(" "));
    }
    Ok(lines.join("\n"))
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages.concat())
}

// ============ OOXML helpers ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn read_optional_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, ExtractError> {
    if !archive.file_names().any(|n| n == name) {
        return Ok(None);
    }
    read_zip_entry_bounded(archive, name, MAX_XML_ENTRY_BYTES).map(Some)
}

fn xml_reader(xml: &[u8]) -> quick_xml::Reader<&[u8]> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    reader
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.prefix().is_none() && a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// The namespaced relationship id (`r:id`) of an element.
fn rel_id(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Relationship ids of every `element` in a part, in document order.
fn ordered_rel_ids(xml: &[u8], element: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut ids = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == element {
                    if let Some(id) = rel_id(&e) {
                        ids.push(id);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

/// Maps relationship ids to archive paths, resolving targets against `base_dir`.
fn relationship_targets(xml: &[u8], base_dir: &str) -> Result<HashMap<String, String>, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                        let path = match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("{}{}", base_dir, target),
                        };
                        targets.insert(id, path);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Part names in the order the main part lists them, falling back to
/// numeric order of `{prefix}N.xml` when the manifest cannot be read.
fn ordered_parts(
    archive: &mut Archive<'_>,
    main_part: &str,
    rels_part: &str,
    element: &[u8],
    base_dir: &str,
    prefix: &str,
) -> Result<Vec<String>, ExtractError> {
    if let (Some(main), Some(rels)) = (
        read_optional_entry(archive, main_part)?,
        read_optional_entry(archive, rels_part)?,
    ) {
        let ids = ordered_rel_ids(&main, element)?;
        let targets = relationship_targets(&rels, base_dir)?;
        let names: Vec<String> = ids
            .iter()
            .filter_map(|id| targets.get(id).cloned())
            .filter(|name| archive.file_names().any(|n| n == name))
            .collect();
        if !names.is_empty() {
            return Ok(names);
        }
    }

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
    Ok(names)
}

fn text_of(te: &quick_xml::events::BytesText<'_>) -> String {
    te.unescape().map(|t| t.into_owned()).unwrap_or_default()
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&xml).map(|paragraphs| paragraphs.join("\n"))
}

/// Paragraph texts of a WordprocessingML body in document order.
///
/// Paragraphs nested in text boxes are emitted as their own entries before
/// the enclosing paragraph closes. `mc:Fallback` copies of alternate content
/// are skipped.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut paragraphs = Vec::new();
    let mut in_text = false;
    let mut in_props = false;
    let mut fallback_depth = 0usize;
    loop {
        let event = reader.read_event_into(&mut buf);
        if let Ok(Event::Start(e)) = &event {
            if e.local_name().as_ref() == b"Fallback" {
                fallback_depth += 1;
            }
        }
        if fallback_depth > 0 {
            match event {
                Ok(Event::End(e)) if e.local_name().as_ref() == b"Fallback" => {
                    fallback_depth -= 1;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
                _ => {}
            }
            buf.clear();
            continue;
        }
        match event {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => open.push(String::new()),
                b"pPr" => in_props = true,
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                // Tab stops declared in paragraph properties are not content.
                b"tab" if !in_props => {
                    if let Some(p) = open.last_mut() {
                        p.push('\t');
                    }
                }
                b"br" | b"cr" => {
                    if let Some(p) = open.last_mut() {
                        p.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(p) = open.last_mut() {
                    p.push_str(&text_of(&te));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(p) = open.pop() {
                        paragraphs.push(p);
                    }
                }
                b"pPr" => in_props = false,
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

// ============ PPTX ============

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = ordered_parts(
        &mut archive,
        "ppt/presentation.xml",
        "ppt/_rels/presentation.xml.rels",
        b"sldId",
        "ppt/",
        "ppt/slides/slide",
    )?;
    let mut out = String::new();
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        for shape in slide_shape_texts(&xml)? {
            out.push_str(&shape);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Text of every shape with a text body, paragraphs joined by newlines.
fn slide_shape_texts(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    struct Shape {
        has_body: bool,
        paragraphs: Vec<String>,
    }

    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut shape: Option<Shape> = None;
    let mut shapes = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => {
                    shape = Some(Shape {
                        has_body: false,
                        paragraphs: Vec::new(),
                    })
                }
                b"txBody" => {
                    if let Some(s) = shape.as_mut() {
                        s.has_body = true;
                    }
                }
                b"p" => {
                    if let Some(s) = shape.as_mut().filter(|s| s.has_body) {
                        s.paragraphs.push(String::new());
                    }
                }
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if let Some(s) = shape.as_mut().filter(|s| s.has_body) {
                        s.paragraphs.push(String::new());
                    }
                }
                b"br" => {
                    if let Some(p) = shape.as_mut().and_then(|s| s.paragraphs.last_mut()) {
                        p.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(p) = shape.as_mut().and_then(|s| s.paragraphs.last_mut()) {
                    p.push_str(&text_of(&te));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"sp" => {
                    if let Some(s) = shape.take().filter(|s| s.has_body) {
                        shapes.push(s.paragraphs.join("\n"));
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = match read_optional_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => read_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let date_styles = match read_optional_entry(&mut archive, "xl/styles.xml")? {
        Some(xml) => read_date_styles(&xml)?,
        None => Vec::new(),
    };
    let epoch = match read_optional_entry(&mut archive, "xl/workbook.xml")? {
        Some(xml) if uses_1904_dates(&xml)? => DateEpoch::Y1904,
        _ => DateEpoch::Y1900,
    };
    let sheet_names = ordered_parts(
        &mut archive,
        "xl/workbook.xml",
        "xl/_rels/workbook.xml.rels",
        b"sheet",
        "xl/",
        "xl/worksheets/sheet",
    )?;

    let ctx = CellContext {
        shared_strings: &shared_strings,
        date_styles: &date_styles,
        epoch,
    };
    let mut out = String::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        for row in sheet_rows(&sheet_xml, &ctx)? {
            out.push_str(&row);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Shared string table; rich-text runs of one entry are concatenated and
/// phonetic hints (`rPh`) are skipped.
fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&text_of(&te));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58)
}

/// Whether a custom number format code renders a date or time.
fn is_date_format_code(code: &str) -> bool {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;
    for c in code.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            _ if in_quotes || in_brackets => {}
            'd' | 'D' | 'm' | 'M' | 'y' | 'Y' | 'h' | 'H' | 's' | 'S' => return true,
            _ => {}
        }
    }
    false
}

/// For each cell style index (`cellXfs`), whether it formats numbers as dates.
fn read_date_styles(xml: &[u8]) -> Result<Vec<bool>, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut custom: HashMap<u32, bool> = HashMap::new();
    let mut styles = Vec::new();
    let mut in_cell_xfs = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"numFmt" => {
                    if let (Some(id), Some(code)) = (attr(&e, b"numFmtId"), attr(&e, b"formatCode")) {
                        if let Ok(id) = id.parse::<u32>() {
                            custom.insert(id, is_date_format_code(&code));
                        }
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let id = attr(&e, b"numFmtId")
                        .and_then(|v| v.parse::<u32>().ok())
                        .unwrap_or(0);
                    let is_date = custom
                        .get(&id)
                        .copied()
                        .unwrap_or_else(|| is_builtin_date_format(id));
                    styles.push(is_date);
                }
                _ => {}
            },
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"cellXfs" {
                    in_cell_xfs = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(styles)
}

fn uses_1904_dates(xml: &[u8]) -> Result<bool, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"workbookPr" {
                    let flag = attr(&e, b"date1904").unwrap_or_default();
                    return Ok(flag == "1" || flag.eq_ignore_ascii_case("true"));
                }
            }
            Ok(Event::Eof) => return Ok(false),
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateEpoch {
    Y1900,
    Y1904,
}

/// Converts a spreadsheet date serial to a timestamp string.
fn serial_to_datetime(serial: f64, epoch: DateEpoch) -> Option<String> {
    // 2958466 is 10000-01-01, past the last representable spreadsheet date.
    if !serial.is_finite() || !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let base = match epoch {
        // Day 60 is the fictitious 1900-02-29; serials before it are off by one.
        DateEpoch::Y1900 if serial < 60.0 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        DateEpoch::Y1900 => NaiveDate::from_ymd_opt(1899, 12, 30)?,
        DateEpoch::Y1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?,
    };
    let millis = (serial * 86_400_000.0).round() as i64;
    let dt: NaiveDateTime = base.and_hms_opt(0, 0, 0)? + Duration::milliseconds(millis);
    if serial < 1.0 {
        return Some(dt.format("%H:%M:%S").to_string());
    }
    Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

struct CellContext<'a> {
    shared_strings: &'a [String],
    date_styles: &'a [bool],
    epoch: DateEpoch,
}

impl CellContext<'_> {
    fn render(&self, cell_type: &str, style: Option<usize>, value: &str, inline: &str) -> String {
        match cell_type {
            "s" => value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| self.shared_strings.get(i).cloned())
                .unwrap_or_default(),
            "inlineStr" => inline.to_string(),
            "b" => match value.trim() {
                "1" => "True".to_string(),
                "0" => "False".to_string(),
                other => other.to_string(),
            },
            "str" | "e" => value.to_string(),
            _ => {
                let is_date = style
                    .and_then(|s| self.date_styles.get(s).copied())
                    .unwrap_or(false);
                if is_date {
                    if let Some(rendered) = value
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .and_then(|n| serial_to_datetime(n, self.epoch))
                    {
                        return rendered;
                    }
                }
                value.trim().to_string()
            }
        }
    }
}

/// One line per `<row>`: non-empty cell values joined by a single space.
/// Row numbers skipped between two stored rows become empty lines.
fn sheet_rows(xml: &[u8], ctx: &CellContext<'_>) -> Result<Vec<String>, ExtractError> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut last_row: Option<usize> = None;
    let mut row: Vec<String> = Vec::new();
    let mut cell_type = String::new();
    let mut style: Option<usize> = None;
    let mut value = String::new();
    let mut inline = String::new();
    let mut in_value = false;
    let mut in_inline = false;
    let mut in_inline_text = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    pad_row_gap(&mut rows, &mut last_row, row_number(&e));
                }
                b"c" => {
                    cell_type = attr(&e, b"t").unwrap_or_default();
                    style = attr(&e, b"s").and_then(|s| s.parse().ok());
                    value.clear();
                    inline.clear();
                }
                b"v" => in_value = true,
                b"is" => in_inline = true,
                b"t" if in_inline => in_inline_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"row" {
                    pad_row_gap(&mut rows, &mut last_row, row_number(&e));
                    rows.push(String::new());
                }
            }
            Ok(Event::Text(te)) => {
                if in_value {
                    value.push_str(&text_of(&te));
                } else if in_inline_text {
                    inline.push_str(&text_of(&te));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"is" => in_inline = false,
                b"c" => {
                    let rendered = ctx.render(&cell_type, style, &value, &inline);
                    if !rendered.is_empty() {
                        row.push(rendered);
                    }
                    cell_count += 1;
                }
                b"row" => rows.push(row.join(" ")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn row_number(e: &BytesStart<'_>) -> Option<usize> {
    attr(e, b"r").and_then(|r| r.parse().ok())
}

/// Pushes one empty line per row number missing before `current`.
fn pad_row_gap(rows: &mut Vec<String>, last_row: &mut Option<usize>, current: Option<usize>) {
    let current = match (current, *last_row) {
        (Some(n), _) => n,
        (None, Some(prev)) => prev + 1,
        (None, None) => 1,
    };
    if let Some(prev) = *last_row {
        let missing = current
            .saturating_sub(prev + 1)
            .min(XLSX_MAX_CELLS_PER_SHEET.saturating_sub(rows.len()));
        rows.extend(std::iter::repeat(String::new()).take(missing));
    }
    *last_row = Some(current);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_is_named_in_note() {
        let text = extract_text(b"PK\x03\x04", "bundle.ZIP");
        assert_eq!(text, "[Unsupported file format: zip]");
    }

    #[test]
    fn name_without_extension_is_unsupported() {
        let text = extract_text(b"hello", "README");
        assert!(text.starts_with("[Unsupported file format"));
    }

    #[test]
    fn dispatch_ignores_case() {
        assert_eq!(extract_text(b"hello", "NOTES.TXT"), "hello");
    }

    #[test]
    fn txt_replaces_invalid_utf8() {
        let text = extract_text(b"caf\xC3\xA9 \xFF ok", "a.txt");
        assert_eq!(text, "caf\u{e9} \u{fffd} ok");
    }

    #[test]
    fn txt_drops_bom() {
        assert_eq!(extract_text(b"\xEF\xBB\xBFhi", "a.txt"), "hi");
    }

    #[test]
    fn csv_joins_fields_with_spaces() {
        let text = extract_text(b"name,city\n\"Doe, Jane\",Oslo\nsolo\n", "people.csv");
        assert_eq!(text, "name city\nDoe, Jane Oslo\nsolo");
    }

    #[test]
    fn corrupt_pdf_degrades_to_note() {
        let text = extract_text(b"not a pdf", "broken.pdf");
        assert!(text.starts_with("[Could not extract text from broken.pdf"));
    }

    #[test]
    fn corrupt_docx_degrades_to_note() {
        let text = extract_text(b"not a zip", "memo.docx");
        assert!(text.contains("memo.docx"));
        assert!(text.contains("OOXML"));
    }

    #[test]
    fn images_without_ocr_get_disabled_note() {
        for name in ["scan.png", "photo.JPG", "x.jpeg"] {
            assert_eq!(extract_text(b"\x89PNG", name), OCR_DISABLED_NOTE);
        }
    }

    struct FailingOcr;

    impl OcrEngine for FailingOcr {
        fn recognize(&self, _image: &[u8]) -> Result<String, ExtractError> {
            Err(ExtractError::Ocr("engine crashed".to_string()))
        }
    }

    #[test]
    fn ocr_failure_becomes_note() {
        let extractor = Extractor::with_ocr(Box::new(FailingOcr), usize::MAX);
        let text = extractor.extract(b"\x89PNG", "scan.png");
        assert!(text.starts_with("[Image OCR failed for scan.png"));
        assert!(text.contains("engine crashed"));
    }

    #[test]
    fn missing_tesseract_binary_becomes_note() {
        let extractor = Extractor::with_ocr(
            Box::new(TesseractOcr::new(PathBuf::from("/nonexistent/tesseract-bin"))),
            usize::MAX,
        );
        let text = extractor.extract(b"\x89PNG", "scan.png");
        assert!(text.starts_with("[Image OCR failed"));
    }

    #[test]
    fn oversized_file_is_not_parsed() {
        let extractor = Extractor::with_ocr(Box::new(DisabledOcr), 4);
        let text = extractor.extract(b"0123456789", "big.txt");
        assert!(text.starts_with("[File too large to extract: big.txt"));
    }

    #[test]
    fn registered_extractor_overrides_default() {
        fn shout(bytes: &[u8]) -> Result<String, ExtractError> {
            Ok(String::from_utf8_lossy(bytes).to_uppercase())
        }
        let mut extractor = Extractor::default();
        assert!(!extractor.supports("a.md"));
        extractor.register("MD", shout);
        assert!(extractor.supports("a.md"));
        assert_eq!(extractor.extract(b"hi", "a.md"), "HI");
    }

    #[test]
    fn docx_paragraphs_keep_runs_and_spacing() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
            <w:p/>
            <w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:t>A</w:t><w:tab/><w:t>B &amp; C</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let paragraphs = docx_paragraphs(xml).unwrap();
        assert_eq!(paragraphs, vec!["Hello world", "", "A\tB & C"]);
    }

    #[test]
    fn docx_alternate_content_is_read_once() {
        let xml = br#"<w:document xmlns:w="w" xmlns:mc="mc" xmlns:wps="wps"><w:body><w:p><w:r>
            <mc:AlternateContent>
                <mc:Choice Requires="wps"><w:drawing><wps:txbx><w:txbxContent><w:p><w:r><w:t>Box</w:t></w:r></w:p></w:txbxContent></wps:txbx></w:drawing></mc:Choice>
                <mc:Fallback><w:pict><w:txbxContent><w:p><w:r><w:t>Box</w:t></w:r></w:p></w:txbxContent></w:pict></mc:Fallback>
            </mc:AlternateContent>
        </w:r><w:r><w:t>Body</w:t></w:r></w:p></w:body></w:document>"#;
        assert_eq!(docx_paragraphs(xml).unwrap(), vec!["Box", "Body"]);
    }

    #[test]
    fn sparse_sheet_rows_keep_their_gaps() {
        let ctx = CellContext {
            shared_strings: &[],
            date_styles: &[],
            epoch: DateEpoch::Y1900,
        };
        let xml = br#"<worksheet><sheetData>
            <row r="2"><c r="A2" t="inlineStr"><is><t>a</t></is></c></row>
            <row r="4"><c r="A4" t="inlineStr"><is><t>b</t></is></c></row>
            <row r="5"/>
            <row><c t="inlineStr"><is><t>c</t></is></c></row>
        </sheetData></worksheet>"#;
        assert_eq!(sheet_rows(xml, &ctx).unwrap(), vec!["a", "", "b", "", "c"]);
    }

    #[test]
    fn pptx_shapes_without_text_body_are_skipped() {
        let xml = br#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
            <p:sp><p:txBody><a:p><a:r><a:t>Title</a:t></a:r></a:p></p:txBody></p:sp>
            <p:pic><p:blipFill/></p:pic>
            <p:sp><p:spPr/></p:sp>
            <p:sp><p:txBody><a:p><a:r><a:t>one</a:t></a:r></a:p><a:p><a:r><a:t>two</a:t></a:r></a:p></p:txBody></p:sp>
        </p:spTree></p:cSld></p:sld>"#;
        assert_eq!(slide_shape_texts(xml).unwrap(), vec!["Title", "one\ntwo"]);
    }

    #[test]
    fn date_format_detection() {
        assert!(is_builtin_date_format(14));
        assert!(!is_builtin_date_format(0));
        assert!(is_date_format_code("yyyy-mm-dd"));
        assert!(is_date_format_code("[$-409]d-mmm;@"));
        assert!(!is_date_format_code("#,##0.00"));
        assert!(!is_date_format_code("0.0\"days\""));
        assert!(!is_date_format_code("[Red]0.00"));
    }

    #[test]
    fn serials_convert_to_timestamps() {
        assert_eq!(
            serial_to_datetime(45306.0, DateEpoch::Y1900).as_deref(),
            Some("2024-01-15 00:00:00")
        );
        assert_eq!(
            serial_to_datetime(45306.5, DateEpoch::Y1900).as_deref(),
            Some("2024-01-15 12:00:00")
        );
        assert_eq!(
            serial_to_datetime(1.0, DateEpoch::Y1900).as_deref(),
            Some("1900-01-01 00:00:00")
        );
        assert_eq!(
            serial_to_datetime(0.25, DateEpoch::Y1900).as_deref(),
            Some("06:00:00")
        );
        assert_eq!(
            serial_to_datetime(1.0, DateEpoch::Y1904).as_deref(),
            Some("1904-01-02 00:00:00")
        );
    }
}
