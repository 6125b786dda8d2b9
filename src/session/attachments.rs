use std::sync::Arc;

use super::{load_key, save_key, SessionError, SessionResult, DOCUMENTS_KEY, LINKS_KEY};
use crate::db::models::{Chat, DocumentRef, LinkRef};
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Document,
    Link,
}

/// Documents and links the user has added, with their selection state.
pub struct Attachments {
    db: Arc<Database>,
    documents: Vec<DocumentRef>,
    links: Vec<LinkRef>,
}

impl Attachments {
    pub fn load(db: Arc<Database>) -> SessionResult<Self> {
        let documents = load_key(&db, DOCUMENTS_KEY)?;
        let links = load_key(&db, LINKS_KEY)?;
        Ok(Self { db, documents, links })
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.documents
    }

    pub fn links(&self) -> &[LinkRef] {
        &self.links
    }

    pub fn kind_of(&self, id: &str) -> Option<ReferenceKind> {
        if self.documents.iter().any(|d| d.id == id) {
            Some(ReferenceKind::Document)
        } else if self.links.iter().any(|l| l.id == id) {
            Some(ReferenceKind::Link)
        } else {
            None
        }
    }

    /// Replace the references with the backend's listing. Known ids keep
    /// their `selected` flag; ones first seen here start unselected.
    pub fn sync(&mut self, mut documents: Vec<DocumentRef>, mut links: Vec<LinkRef>) -> SessionResult<()> {
        for doc in &mut documents {
            doc.selected = self.documents.iter().any(|d| d.id == doc.id && d.selected);
        }
        for link in &mut links {
            link.selected = self.links.iter().any(|l| l.id == link.id && l.selected);
        }
        self.documents = documents;
        self.links = links;
        save_key(&self.db, DOCUMENTS_KEY, &self.documents)?;
        save_key(&self.db, LINKS_KEY, &self.links)
    }

    /// Register a document, replacing an earlier one with the same id.
    pub fn add_document(&mut self, document: DocumentRef) -> SessionResult<()> {
        self.documents.retain(|d| d.id != document.id);
        self.documents.push(document);
        save_key(&self.db, DOCUMENTS_KEY, &self.documents)
    }

    pub fn add_link(&mut self, link: LinkRef) -> SessionResult<()> {
        self.links.retain(|l| l.id != link.id);
        self.links.push(link);
        save_key(&self.db, LINKS_KEY, &self.links)
    }

    /// Flip `selected` on the document or link with this id; returns the new state.
    pub fn toggle_selected(&mut self, id: &str) -> SessionResult<bool> {
        if let Some(doc) = self.documents.iter_mut().find(|d| d.id == id) {
            doc.selected = !doc.selected;
            let selected = doc.selected;
            save_key(&self.db, DOCUMENTS_KEY, &self.documents)?;
            return Ok(selected);
        }
        if let Some(link) = self.links.iter_mut().find(|l| l.id == id) {
            link.selected = !link.selected;
            let selected = link.selected;
            save_key(&self.db, LINKS_KEY, &self.links)?;
            return Ok(selected);
        }
        Err(SessionError::UnknownReference(id.to_string()))
    }

    pub fn delete(&mut self, id: &str) -> SessionResult<()> {
        let (docs, links) = (self.documents.len(), self.links.len());
        self.documents.retain(|d| d.id != id);
        self.links.retain(|l| l.id != id);
        if self.documents.len() != docs {
            save_key(&self.db, DOCUMENTS_KEY, &self.documents)
        } else if self.links.len() != links {
            save_key(&self.db, LINKS_KEY, &self.links)
        } else {
            Err(SessionError::UnknownReference(id.to_string()))
        }
    }

    /// Text of the selected references for a chat request. A chat with its
    /// own selection lists overrides the global `selected` flags.
    pub fn context(&self, chat: Option<&Chat>) -> String {
        let doc_selected = |d: &DocumentRef| match chat.and_then(|c| c.selected_documents.as_ref()) {
            Some(ids) => ids.contains(&d.id),
            None => d.selected,
        };
        let link_selected = |l: &LinkRef| match chat.and_then(|c| c.selected_links.as_ref()) {
            Some(ids) => ids.contains(&l.id),
            None => l.selected,
        };

        let documents = self
            .documents
            .iter()
            .filter(|d| doc_selected(*d))
            .map(|d| format!("Document: {}\n{}", d.name, d.content));
        let links = self.links.iter().filter(|l| link_selected(*l)).map(|l| {
            let label = l.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(&l.url);
            format!("Link: {}\n{}", label, l.content)
        });

        documents.chain(links).collect::<Vec<_>>().join("\n\n")
    }
}
