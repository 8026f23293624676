// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory document store.
//!
//! Holds the process-wide set of documents behind a single shared/exclusive
//! lock. `create` and `replace_section` take the lock exclusively; lookups
//! and rendering take it shared.

use crate::text::truncate_bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Maximum number of documents the store will ever hold.
pub const MAX_DOCUMENTS: usize = 100;
/// Maximum number of sections a document may declare at creation.
pub const MAX_SECTIONS: usize = 10;
/// Maximum number of lines a section may hold.
pub const MAX_LINES: usize = 10;
/// Maximum byte length of a single stored line.
pub const MAX_LINE_LEN: usize = 255;
/// Maximum byte length of a title or section name.
pub const MAX_NAME_LEN: usize = 63;

/// A single named, bounded section within a document.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub name: String,
    pub lines: Vec<String>,
}

/// A titled document with a fixed set of named sections, frozen after
/// creation.
#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pub sections: Vec<Section>,
}

impl Document {
    fn section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }
}

/// A stable reference to a document returned by `create`/`find`: an index
/// into the store plus a snapshot of its immutable metadata.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    pub index: usize,
    pub title: String,
    pub section_names: Vec<String>,
}

impl DocumentHandle {
    pub fn section_index(&self, name: &str) -> Option<usize> {
        self.section_names.iter().position(|n| n == name)
    }
}

struct StoreInner {
    documents: Vec<Document>,
    by_title: HashMap<String, usize>,
}

/// Process-wide collection of documents.
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure modes for `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    AlreadyExists,
    CapacityExceeded,
    InvalidShape,
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "document already exists"),
            Self::CapacityExceeded => write!(f, "document capacity exceeded"),
            Self::InvalidShape => write!(f, "invalid section count or titles"),
        }
    }
}

impl std::error::Error for CreateError {}

/// Failure mode for a section lookup, distinguishing which part is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLookupError {
    DocumentNotFound,
    SectionNotFound,
}

impl std::fmt::Display for SectionLookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DocumentNotFound => write!(f, "document not found"),
            Self::SectionNotFound => write!(f, "section not found"),
        }
    }
}

impl std::error::Error for SectionLookupError {}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                documents: Vec::new(),
                by_title: HashMap::new(),
            }),
        }
    }

    /// Create a new document with the given section names. Exclusive access
    /// for the duration.
    pub async fn create(
        &self,
        title: &str,
        section_names: &[String],
    ) -> Result<DocumentHandle, CreateError> {
        if section_names.is_empty()
            || section_names.len() > MAX_SECTIONS
            || section_names.iter().any(|name| name.is_empty())
        {
            return Err(CreateError::InvalidShape);
        }

        let mut inner = self.inner.write().await;

        if inner.documents.len() >= MAX_DOCUMENTS {
            return Err(CreateError::CapacityExceeded);
        }
        if inner.by_title.contains_key(title) {
            return Err(CreateError::AlreadyExists);
        }

        let sections: Vec<Section> = section_names
            .iter()
            .map(|name| Section {
                name: truncate_bytes(name, MAX_NAME_LEN),
                lines: Vec::new(),
            })
            .collect();

        let title = truncate_bytes(title, MAX_NAME_LEN);
        let index = inner.documents.len();
        let handle = DocumentHandle {
            index,
            title: title.clone(),
            section_names: sections.iter().map(|s| s.name.clone()).collect(),
        };

        inner.documents.push(Document {
            title: title.clone(),
            sections,
        });
        inner.by_title.insert(title, index);

        Ok(handle)
    }

    /// Look up a document by title. Shared access.
    pub async fn find(&self, title: &str) -> Option<DocumentHandle> {
        let inner = self.inner.read().await;
        let index = *inner.by_title.get(title)?;
        let doc = &inner.documents[index];
        Some(DocumentHandle {
            index,
            title: doc.title.clone(),
            section_names: doc.sections.iter().map(|s| s.name.clone()).collect(),
        })
    }

    /// Render the full catalog: each title on its own line followed by an
    /// indented numbered list of its section names, in insertion order.
    pub async fn list_all(&self) -> String {
        let inner = self.inner.read().await;
        let mut out = String::new();
        for doc in &inner.documents {
            out.push_str(&doc.title);
            out.push('\n');
            for (i, section) in doc.sections.iter().enumerate() {
                out.push_str(&format!("    {}. {}\n", i + 1, section.name));
            }
        }
        out
    }

    /// Render a single section: document header, section header, then each
    /// stored line indented.
    pub async fn list_section(
        &self,
        title: &str,
        section_name: &str,
    ) -> Result<String, SectionLookupError> {
        let inner = self.inner.read().await;
        let index = *inner
            .by_title
            .get(title)
            .ok_or(SectionLookupError::DocumentNotFound)?;
        let doc = &inner.documents[index];
        let section_index = doc
            .section_index(section_name)
            .ok_or(SectionLookupError::SectionNotFound)?;
        let section = &doc.sections[section_index];

        let mut out = String::new();
        out.push_str(&doc.title);
        out.push('\n');
        out.push_str(&format!("    {}. {}\n", section_index + 1, section.name));
        for line in &section.lines {
            out.push_str("       ");
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    /// Unconditionally replace a section's content. Excess lines beyond
    /// `MAX_LINES` are dropped. Exclusive access for the duration. Callers
    /// resolve `doc_index`/`section_index` ahead of time via `find`.
    pub async fn replace_section(&self, doc_index: usize, section_index: usize, mut lines: Vec<String>) {
        lines.truncate(MAX_LINES);
        let mut inner = self.inner.write().await;
        if let Some(section) = inner
            .documents
            .get_mut(doc_index)
            .and_then(|doc| doc.sections.get_mut(section_index))
        {
            section.lines = lines;
        }
    }
}
