//! Per-extension text extraction strategies.
//!
//! The [`ExtractorRegistry`] maps a lowercase extension (with its leading
//! dot) to an [`Extractor`]. The scanner's allow-list is exactly the set of
//! registered extensions, so adding a format means registering one more
//! strategy and nothing else.
//!
//! | Extension | Strategy | Segments |
//! |-----------|----------|----------|
//! | `.txt .md .csv .py .js .ts .html .css .json .xml .yaml .yml` | [`PlainTextExtractor`] | one |
//! | `.pdf` | [`PdfExtractor`] | one |
//! | `.docx` | [`DocxExtractor`] | one |
//! | `.pptx` | [`PptxExtractor`] | one per slide |
//! | `.xlsx` | [`XlsxExtractor`] | one per worksheet |
//! | `.xls` | [`UnavailableExtractor`] | always skipped |
//!
//! Every failure is an [`ExtractError`]; the loader logs it and skips the file.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

use crate::error::ExtractError;
use crate::models::RawDocument;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Compound File Binary header. Password-protected OOXML files are wrapped
/// in a CFB container instead of a ZIP.
const CFB_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const TEXT_EXTENSIONS: [&str; 12] = [
    ".txt", ".md", ".csv", ".py", ".js", ".ts", ".html", ".css", ".json", ".xml", ".yaml", ".yml",
];

/// A format-specific way of turning a file into raw text segments.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError>;
}

/// Extension → strategy map.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    strategies: BTreeMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in format.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let text: Arc<dyn Extractor> = Arc::new(PlainTextExtractor);
        for ext in TEXT_EXTENSIONS {
            registry.register(ext, text.clone());
        }
        registry.register(".pdf", Arc::new(PdfExtractor));
        registry.register(".docx", Arc::new(DocxExtractor));
        registry.register(".pptx", Arc::new(PptxExtractor));
        registry.register(".xlsx", Arc::new(XlsxExtractor));
        registry.register(
            ".xls",
            Arc::new(UnavailableExtractor {
                format: "legacy Excel (.xls)",
            }),
        );
        registry
    }

    /// Register (or replace) the strategy for `extension`, e.g. `".rst"`.
    pub fn register(&mut self, extension: &str, extractor: Arc<dyn Extractor>) {
        self.strategies
            .insert(normalize_extension(extension), extractor);
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn Extractor>> {
        self.strategies.get(&normalize_extension(extension)).cloned()
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.strategies.contains_key(&normalize_extension(extension))
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(|k| k.as_str())
    }

    /// Dispatch on `path`'s extension.
    pub fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        let ext = file_extension(path);
        match self.get(&ext) {
            Some(strategy) => strategy.extract(path),
            None => Err(ExtractError::UnsupportedExtension(if ext.is_empty() {
                "<none>".to_string()
            } else {
                ext
            })),
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    let lower = ext.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

/// Lowercase extension including the dot, or `""` when the path has none.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// MIME type guessed from the extension.
pub fn mime_type_for(path: &Path) -> String {
    match file_extension(path).as_str() {
        ".md" => "text/markdown".to_string(),
        ".ts" => "application/typescript".to_string(),
        ".py" => "text/x-python".to_string(),
        ".yaml" | ".yml" => "application/yaml".to_string(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    }
}

// ── Plain text ──────────────────────────────────────────────────────────

pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let (text, encoding) = decode_text(&bytes)?;
        Ok(vec![RawDocument::new(text).with_meta("encoding", encoding)])
    }
}

/// Decode text bytes: BOM-declared encoding, then strict UTF-8, then
/// Windows-1252. Content with NUL bytes and no BOM is treated as binary.
pub fn decode_text(bytes: &[u8]) -> Result<(String, &'static str), ExtractError> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        if had_errors {
            return Err(ExtractError::Encoding(format!(
                "invalid {} content",
                encoding.name()
            )));
        }
        return Ok((text.into_owned(), encoding.name()));
    }

    let probe = &bytes[..bytes.len().min(8192)];
    if probe.contains(&0) {
        return Err(ExtractError::Encoding("binary content".to_string()));
    }

    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return Ok((text.into_owned(), UTF_8.name()));
    }
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    Ok((text.into_owned(), WINDOWS_1252.name()))
}

// ── PDF ─────────────────────────────────────────────────────────────────

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let text = extract_pdf(&bytes)?;
        Ok(vec![RawDocument::new(text).with_meta("format", "pdf")])
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
        let msg = e.to_string();
        if msg.to_lowercase().contains("encrypt") {
            ExtractError::Encrypted
        } else {
            ExtractError::Pdf(msg)
        }
    })
}

// ── OOXML ───────────────────────────────────────────────────────────────

pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let text = extract_docx(&bytes)?;
        Ok(vec![RawDocument::new(text).with_meta("format", "docx")])
    }
}

pub struct PptxExtractor;

impl Extractor for PptxExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_pptx(&bytes)
    }
}

pub struct XlsxExtractor;

impl Extractor for XlsxExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_xlsx(&bytes)
    }
}

/// Placeholder for a format whose backend is not built in.
pub struct UnavailableExtractor {
    pub format: &'static str,
}

impl Extractor for UnavailableExtractor {
    fn extract(&self, _path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
        Err(ExtractError::MissingBackend(self.format.to_string()))
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    if bytes.starts_with(&CFB_MAGIC) {
        return Err(ExtractError::Encrypted);
    }
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Numbered part names (`prefix{n}.xml`) in numeric order.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<(u32, String)> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .filter_map(|n| {
            n.trim_start_matches(prefix)
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|num| (num, n.to_string()))
        })
        .collect();
    parts.sort();
    parts
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<RawDocument>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_parts(&archive, "ppt/slides/slide");
    let mut documents = Vec::new();
    for (number, name) in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if text.trim().is_empty() {
            continue;
        }
        documents.push(
            RawDocument::new(text)
                .with_meta("format", "pptx")
                .with_meta("slide_number", number),
        );
    }
    Ok(documents)
}

/// Concatenate `<*:t>` text runs, breaking lines at each closing
/// `paragraph_tag` element.
fn collect_text_runs(xml: &[u8], paragraph_tag: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph_tag && !out.ends_with('\n') && !out.is_empty()
                {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<RawDocument>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheets = numbered_parts(&archive, "xl/worksheets/sheet");
    let mut documents = Vec::new();
    for (number, name) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = extract_sheet_rows(&xml, &shared_strings)?;
        if text.trim().is_empty() {
            continue;
        }
        documents.push(
            RawDocument::new(text)
                .with_meta("format", "xlsx")
                .with_meta("sheet_number", number),
        );
    }
    Ok(documents)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    const PART: &str = "xl/sharedStrings.xml";
    if !archive.file_names().any(|n| n == PART) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, PART)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
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

/// One line per row, cells joined by tabs. Shared-string cells are resolved;
/// other cell values are emitted verbatim.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let cell = if shared {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(cell) = cell {
                        row.push(cell);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => shared = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join("\t")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn builtin_registry_covers_supported_extensions() {
        let registry = ExtractorRegistry::builtin();
        let exts: Vec<&str> = registry.extensions().collect();
        for ext in [
            ".pdf", ".txt", ".md", ".csv", ".xlsx", ".xls", ".pptx", ".docx", ".py", ".js", ".ts",
            ".html", ".css", ".json", ".xml", ".yaml", ".yml",
        ] {
            assert!(exts.contains(&ext), "missing {}", ext);
        }
        assert_eq!(exts.len(), 17);
        assert!(registry.supports("MD"));
        assert!(!registry.supports(".exe"));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let registry = ExtractorRegistry::builtin();
        let err = registry.extract(Path::new("/tmp/tool.exe")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedExtension(ref e) if e == ".exe"));
    }

    #[test]
    fn custom_strategy_registration() {
        struct Upper;
        impl Extractor for Upper {
            fn extract(&self, _path: &Path) -> Result<Vec<RawDocument>, ExtractError> {
                Ok(vec![RawDocument::new("REGISTERED")])
            }
        }
        let mut registry = ExtractorRegistry::empty();
        registry.register("rst", Arc::new(Upper));
        let docs = registry.extract(Path::new("notes.RST")).unwrap();
        assert_eq!(docs[0].text, "REGISTERED");
    }

    #[test]
    fn decode_utf8_and_bom() {
        assert_eq!(decode_text("héllo".as_bytes()).unwrap().0, "héllo");
        let mut with_bom = vec![0xEF, 0xBB, 0xBF];
        with_bom.extend_from_slice(b"plain");
        assert_eq!(decode_text(&with_bom).unwrap().0, "plain");
    }

    #[test]
    fn decode_falls_back_to_windows_1252() {
        let (text, encoding) = decode_text(&[b'c', b'a', b'f', 0xE9]).unwrap();
        assert_eq!(text, "café");
        assert_eq!(encoding, "windows-1252");
    }

    #[test]
    fn decode_rejects_binary() {
        let err = decode_text(&[0x7F, 0x45, 0x4C, 0x46, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?><w:document xmlns:w="w"><w:body><w:p><w:r><w:t>First</w:t></w:r><w:r><w:t> para</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t></w:r></w:p></w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        assert_eq!(extract_docx(&bytes).unwrap(), "First para\nSecond");
    }

    #[test]
    fn pptx_one_document_per_slide_in_numeric_order() {
        let slide = |t: &str| {
            format!(r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, t)
        };
        let s1 = slide("Intro");
        let s2 = slide("Details");
        let s10 = slide("Summary");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let docs = extract_pptx(&bytes).unwrap();
        let texts: Vec<_> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["Intro", "Details", "Summary"]);
        assert_eq!(docs[2].metadata["slide_number"], serde_json::json!(10));
    }

    #[test]
    fn xlsx_resolves_shared_strings_and_numbers() {
        let shared = r#"<sst><si><t>Name</t></si><si><t>Qty</t></si><si><t>bolts</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row><row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>42</v></c></row></sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let docs = extract_xlsx(&bytes).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "Name\tQty\nbolts\t42");
        assert_eq!(docs[0].metadata["sheet_number"], serde_json::json!(1));
    }

    #[test]
    fn xlsx_without_shared_strings() {
        let sheet = r#"<worksheet><sheetData><row><c><v>1.5</v></c></row></sheetData></worksheet>"#;
        let bytes = zip_with(&[("xl/worksheets/sheet1.xml", sheet)]);
        assert_eq!(extract_xlsx(&bytes).unwrap()[0].text, "1.5");
    }

    #[test]
    fn encrypted_office_file_detected() {
        let mut bytes = CFB_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(extract_docx(&bytes), Err(ExtractError::Encrypted)));
    }

    #[test]
    fn invalid_inputs_return_errors() {
        assert!(matches!(extract_pdf(b"not a pdf"), Err(ExtractError::Pdf(_))));
        assert!(matches!(extract_docx(b"not a zip"), Err(ExtractError::Ooxml(_))));
    }

    #[test]
    fn xls_reports_missing_backend() {
        let registry = ExtractorRegistry::builtin();
        let err = registry.extract(Path::new("legacy.xls")).unwrap_err();
        assert!(matches!(err, ExtractError::MissingBackend(_)));
    }

    #[test]
    fn mime_types() {
        assert_eq!(mime_type_for(Path::new("a.pdf")), "application/pdf");
        assert_eq!(mime_type_for(Path::new("a.md")), "text/markdown");
        assert_eq!(mime_type_for(Path::new("a.txt")), "text/plain");
    }
}
