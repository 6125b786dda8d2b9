use regex::Regex;
use std::io::{Cursor, Read};
use std::sync::LazyLock;

/// Extensions the backend will accept for upload.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "txt", "html", "csv", "json", "md", "rtf", "xlsx", "pptx",
];

/// Parsed document content
pub struct ParsedDocument {
    pub content: String,
    pub file_type: String,
}

pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

pub fn is_allowed(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME types matching [`ALLOWED_EXTENSIONS`], in the same order.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "text/html",
    "text/csv",
    "application/json",
    "text/markdown",
    "application/rtf",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    ALLOWED_EXTENSIONS
        .iter()
        .position(|allowed| *allowed == ext)
        .map(|i| ALLOWED_MIME_TYPES[i])
}

/// MIME type for a filename, `application/octet-stream` when unknown.
pub fn guess_mime(filename: &str) -> &'static str {
    extension_of(filename)
        .and_then(|ext| mime_for_extension(&ext))
        .unwrap_or("application/octet-stream")
}

pub fn is_allowed_mime(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
    ALLOWED_MIME_TYPES.contains(&essence.as_str())
}

/// Extract plain text from an uploaded file, dispatching on its extension.
pub fn parse_bytes(filename: &str, bytes: &[u8]) -> Result<ParsedDocument, String> {
    let ext = extension_of(filename).unwrap_or_default();

    let content = match ext.as_str() {
        "txt" | "md" | "csv" => String::from_utf8_lossy(bytes).into_owned(),
        "json" => {
            let value: serde_json::Value =
                serde_json::from_slice(bytes).map_err(|e| format!("JSON parse error: {}", e))?;
            serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?
        }
        "html" => html_to_text(&String::from_utf8_lossy(bytes)),
        "rtf" => rtf_to_text(&String::from_utf8_lossy(bytes)),
        "pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| format!("PDF parse error: {}", e))?,
        "docx" => docx_to_text(bytes)?,
        "pptx" => pptx_to_text(bytes)?,
        "xlsx" => xlsx_to_text(bytes)?,
        _ => return Err(format!("Unsupported file type: .{}", ext)),
    };

    Ok(ParsedDocument {
        content,
        file_type: ext,
    })
}

static SCRIPT_OR_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>").unwrap());
static BLOCK_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)\b[^>]*>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\f]+").unwrap());

/// Strip markup from an HTML page, keeping one line per block element.
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, " ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, " ");
    let text = decode_entities(&text);
    text.lines()
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

static RTF_HEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\'([0-9a-fA-F]{2})").unwrap());
static RTF_DESTINATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\\\*[^{}]*\}|\{\\(fonttbl|colortbl|stylesheet|info)[^{}]*(\{[^{}]*\}[^{}]*)*\}").unwrap());
static RTF_PAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\(par|line)\b ?").unwrap());
static RTF_CONTROL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?").unwrap());

fn rtf_to_text(rtf: &str) -> String {
    let text = RTF_DESTINATION.replace_all(rtf, "");
    let text = RTF_HEX.replace_all(&text, |caps: &regex::Captures| {
        u8::from_str_radix(&caps[1], 16)
            .map(|b| char::from(b).to_string())
            .unwrap_or_default()
    });
    let text = RTF_PAR.replace_all(&text, "\n");
    let text = RTF_CONTROL.replace_all(&text, "");
    text.replace(['{', '}'], "")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, String> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("Invalid Office document: {}", e))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<String>, String> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml).map_err(|e| e.to_string())?;
    Ok(Some(xml))
}

static DOCX_PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<w:p[ >].*?</w:p>").unwrap());
static DOCX_RUN_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<w:t(?: [^>]*)?>(.*?)</w:t>").unwrap());

fn docx_to_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?
        .ok_or("DOCX has no word/document.xml")?;

    let paragraphs: Vec<String> = DOCX_PARAGRAPH
        .find_iter(&xml)
        .map(|p| {
            DOCX_RUN_TEXT
                .captures_iter(p.as_str())
                .map(|c| decode_entities(&c[1]))
                .collect::<String>()
        })
        .collect();
    Ok(paragraphs.join("\n"))
}

static PPTX_SLIDE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());
static DRAWING_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<a:t>(.*?)</a:t>").unwrap());

fn pptx_to_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = PPTX_SLIDE_NAME.captures(name)?[1].parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut out = Vec::new();
    for (_, name) in slides {
        if let Some(xml) = read_entry(&mut archive, &name)? {
            let text: Vec<String> = DRAWING_TEXT
                .captures_iter(&xml)
                .map(|c| decode_entities(&c[1]))
                .collect();
            out.push(text.join("\n"));
        }
    }
    Ok(out.join("\n\n"))
}

static SHARED_STRING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<si>(.*?)</si>").unwrap());
static CELL_TEXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<t(?: [^>]*)?>(.*?)</t>").unwrap());
static SHEET_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^xl/worksheets/sheet(\d+)\.xml$").unwrap());
static ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<row\b[^>]*>(.*?)</row>").unwrap());
static CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)").unwrap());
static CELL_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<v>(.*?)</v>").unwrap());

fn xlsx_to_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = open_archive(bytes)?;

    let shared: Vec<String> = read_entry(&mut archive, "xl/sharedStrings.xml")?
        .map(|xml| {
            SHARED_STRING
                .captures_iter(&xml)
                .map(|si| {
                    CELL_TEXT
                        .captures_iter(&si[1])
                        .map(|t| decode_entities(&t[1]))
                        .collect::<String>()
                })
                .collect()
        })
        .unwrap_or_default();

    let mut sheets: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = SHEET_NAME.captures(name)?[1].parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    sheets.sort();

    let mut out = Vec::new();
    for (_, name) in sheets {
        let Some(xml) = read_entry(&mut archive, &name)? else {
            continue;
        };
        for row in ROW.captures_iter(&xml) {
            let cells: Vec<String> = CELL
                .captures_iter(&row[1])
                .map(|cell| {
                    let attrs = &cell[1];
                    let body = cell.get(2).map(|m| m.as_str()).unwrap_or("");
                    if attrs.contains("t=\"s\"") {
                        CELL_VALUE
                            .captures(body)
                            .and_then(|v| v[1].trim().parse::<usize>().ok())
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or_default()
                    } else if attrs.contains("t=\"inlineStr\"") {
                        CELL_TEXT
                            .captures_iter(body)
                            .map(|t| decode_entities(&t[1]))
                            .collect()
                    } else {
                        CELL_VALUE
                            .captures(body)
                            .map(|v| decode_entities(&v[1]))
                            .unwrap_or_default()
                    }
                })
                .collect();
            if cells.iter().any(|c| !c.is_empty()) {
                out.push(cells.join("\t"));
            }
        }
    }
    Ok(out.join("\n"))
}

/// Split text into overlapping chunks of at most `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return vec![];
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end >= chars.len() {
            break;
        }
        start += step;
    }

    chunks
}
