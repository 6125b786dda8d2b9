//! Flat-file storage for uploaded documents and processed links.
//!
//! Layout under the data directory:
//! - `uploads/<filename>` raw upload, `uploads/<filename>.meta.json` metadata + text
//! - `links/<link_id>/meta.json` preview + text, `links/<link_id>/content.txt` text
//!
//! Everything is read back into memory at startup.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::crawler::LinkPreview;
use crate::error::{AppError, AppResult};

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub filename: String,
    pub content: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMeta {
    #[serde(rename = "type")]
    mime_type: String,
    size: u64,
    timestamp: String,
    content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLink {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkMeta {
    url: String,
    title: Option<String>,
    description: Option<String>,
    image: Option<String>,
    #[serde(default)]
    content: String,
    timestamp: String,
}

pub struct Library {
    uploads_dir: PathBuf,
    links_dir: PathBuf,
    documents: RwLock<BTreeMap<String, StoredDocument>>,
    links: RwLock<BTreeMap<String, StoredLink>>,
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reduce an uploaded filename to a safe basename of `[A-Za-z0-9._-]`.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Directory-safe id for a link: the URL with separators flattened, plus the
/// creation time so re-submitting a URL creates a new entry.
pub fn link_id_for(url: &str, at: DateTime<Utc>) -> String {
    let sanitized: String = url
        .replace("://", "_")
        .chars()
        .map(|c| match c {
            '/' | ':' | '?' | '&' | '=' | '+' | '@' | '#' | '%' | '*' | '|' | '\\' | '"' | '\'' | '<'
            | '>' | ' ' => '_',
            c => c,
        })
        .collect();
    format!("{}_{}.{:06}", sanitized, at.timestamp(), at.timestamp_subsec_micros())
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Uploads share `uploads/` with the metadata sidecars, so a document may
/// not take a sidecar's name.
fn is_document_name(name: &str) -> bool {
    is_plain_name(name) && !name.to_ascii_lowercase().ends_with(META_SUFFIX)
}

impl Library {
    pub fn open(uploads_dir: impl Into<PathBuf>, links_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let library = Self {
            uploads_dir: uploads_dir.into(),
            links_dir: links_dir.into(),
            documents: RwLock::new(BTreeMap::new()),
            links: RwLock::new(BTreeMap::new()),
        };
        fs::create_dir_all(&library.uploads_dir)?;
        fs::create_dir_all(&library.links_dir)?;
        library.load()?;
        Ok(library)
    }

    fn load(&self) -> AppResult<()> {
        let mut documents = BTreeMap::new();
        for entry in fs::read_dir(&self.uploads_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(filename) = name.strip_suffix(META_SUFFIX) else {
                continue;
            };
            match read_json::<DocumentMeta>(&path) {
                Ok(meta) => {
                    documents.insert(filename.to_string(), document_from_meta(filename, meta));
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document metadata"),
            }
        }

        let mut links = BTreeMap::new();
        for entry in fs::read_dir(&self.links_dir)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            match read_json::<LinkMeta>(&dir.join("meta.json")) {
                Ok(meta) => {
                    let content = fs::read_to_string(dir.join("content.txt")).unwrap_or(meta.content);
                    links.insert(
                        id.clone(),
                        StoredLink {
                            id,
                            url: meta.url,
                            title: meta.title,
                            description: meta.description,
                            image: meta.image,
                            content,
                            timestamp: meta.timestamp,
                        },
                    );
                }
                Err(e) => tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable link"),
            }
        }

        tracing::info!(documents = documents.len(), links = links.len(), "library loaded");
        *self.documents.write().unwrap_or_else(PoisonError::into_inner) = documents;
        *self.links.write().unwrap_or_else(PoisonError::into_inner) = links;
        Ok(())
    }

    // ── Documents ──

    /// Writes the raw upload and its metadata, replacing any earlier upload
    /// with the same name.
    pub fn save_document(&self, filename: &str, mime_type: &str, bytes: &[u8], content: String) -> AppResult<StoredDocument> {
        if !is_document_name(filename) {
            return Err(AppError::BadRequest("Invalid filename".into()));
        }
        let meta = DocumentMeta {
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
            timestamp: now_timestamp(),
            content,
        };
        fs::write(self.uploads_dir.join(filename), bytes)?;
        fs::write(
            self.uploads_dir.join(format!("{filename}{META_SUFFIX}")),
            serde_json::to_vec(&meta)?,
        )?;

        let document = document_from_meta(filename, meta);
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(filename.to_string(), document.clone());
        Ok(document)
    }

    pub fn document(&self, filename: &str) -> Option<StoredDocument> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned()
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn delete_document(&self, filename: &str) -> AppResult<()> {
        let removed = is_document_name(filename)
            && self
                .documents
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(filename)
                .is_some();
        if !removed {
            return Err(AppError::NotFound("File not found".into()));
        }
        remove_if_exists(&self.uploads_dir.join(filename))?;
        remove_if_exists(&self.uploads_dir.join(format!("{filename}{META_SUFFIX}")))?;
        Ok(())
    }

    // ── Links ──

    pub fn save_link(&self, preview: LinkPreview) -> AppResult<StoredLink> {
        let now = Utc::now();
        let id = link_id_for(&preview.url, now);
        let meta = LinkMeta {
            url: preview.url,
            title: Some(preview.title),
            description: preview.description,
            image: preview.image,
            content: preview.content,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
        };

        let dir = self.links_dir.join(&id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("meta.json"), serde_json::to_vec(&meta)?)?;
        fs::write(dir.join("content.txt"), &meta.content)?;

        let link = StoredLink {
            id: id.clone(),
            url: meta.url,
            title: meta.title,
            description: meta.description,
            image: meta.image,
            content: meta.content,
            timestamp: meta.timestamp,
        };
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, link.clone());
        Ok(link)
    }

    pub fn link(&self, id: &str) -> Option<StoredLink> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn links(&self) -> Vec<StoredLink> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn delete_link(&self, id: &str) -> AppResult<()> {
        let removed = is_plain_name(id)
            && self
                .links
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id)
                .is_some();
        if !removed {
            return Err(AppError::NotFound("Link not found".into()));
        }
        let dir = self.links_dir.join(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn document_from_meta(filename: &str, meta: DocumentMeta) -> StoredDocument {
    StoredDocument {
        id: filename.to_string(),
        filename: filename.to_string(),
        content: meta.content,
        mime_type: meta.mime_type,
        size: meta.size,
        timestamp: meta.timestamp,
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AppResult<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn library(dir: &Path) -> Library {
        Library::open(dir.join("uploads"), dir.join("links")).unwrap()
    }

    fn preview(url: &str) -> LinkPreview {
        LinkPreview {
            url: url.into(),
            title: "Example".into(),
            description: Some("An example".into()),
            image: None,
            content: "page text".into(),
        }
    }

    #[test]
    fn secure_filename_strips_paths_and_symbols() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\my report.pdf"), "my_report.pdf");
        assert_eq!(secure_filename(".hidden.txt"), "hidden.txt");
        assert_eq!(secure_filename("notes-v2_final.md"), "notes-v2_final.md");
    }

    #[test]
    fn link_id_flattens_url() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(
            link_id_for("https://example.com/a?b=c d", at),
            "https_example.com_a_b_c_d_1714564800.000000"
        );
    }

    #[test]
    fn documents_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path());
        lib.save_document("notes.txt", "text/plain", b"raw", "raw".into())
            .unwrap();
        assert!(dir.path().join("uploads/notes.txt.meta.json").exists());

        let reloaded = library(dir.path());
        let doc = reloaded.document("notes.txt").unwrap();
        assert_eq!(doc.content, "raw");
        assert_eq!(doc.mime_type, "text/plain");
        assert_eq!(doc.size, 3);
        assert_eq!(reloaded.documents().len(), 1);
    }

    #[test]
    fn sidecar_names_cannot_be_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path());
        lib.save_document("notes.txt", "text/plain", b"real notes", "real notes".into())
            .unwrap();

        let crafted = br#"{"type":"text/plain","size":1,"timestamp":"","content":"replaced"}"#;
        for name in ["notes.txt.meta.json", "notes.txt.META.JSON"] {
            let err = lib
                .save_document(name, "application/json", crafted, "x".into())
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }

        let reloaded = library(dir.path());
        let docs: Vec<(String, String)> = reloaded
            .documents()
            .into_iter()
            .map(|d| (d.filename, d.content))
            .collect();
        assert_eq!(docs, vec![("notes.txt".to_string(), "real notes".to_string())]);
    }

    #[test]
    fn delete_document_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path());
        lib.save_document("a.md", "text/markdown", b"# a", "# a".into())
            .unwrap();
        lib.delete_document("a.md").unwrap();
        assert!(lib.document("a.md").is_none());
        assert!(!dir.path().join("uploads/a.md").exists());
        assert!(matches!(lib.delete_document("a.md"), Err(AppError::NotFound(_))));
        assert!(matches!(lib.delete_document("../a.md"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn links_survive_reload_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path());
        let link = lib.save_link(preview("https://example.com")).unwrap();
        assert!(dir.path().join("links").join(&link.id).join("content.txt").exists());

        let reloaded = library(dir.path());
        let stored = reloaded.link(&link.id).unwrap();
        assert_eq!(stored.title.as_deref(), Some("Example"));
        assert_eq!(stored.content, "page text");

        reloaded.delete_link(&link.id).unwrap();
        assert!(reloaded.links().is_empty());
        assert!(!dir.path().join("links").join(&link.id).exists());
        assert!(matches!(reloaded.delete_link(&link.id), Err(AppError::NotFound(_))));
    }
}
