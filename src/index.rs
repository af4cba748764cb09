//! Section index.
//!
//! # Responsibilities
//! - Hold the generic value of every section in the current snapshot
//! - Track which remote document each section came from
//! - Apply whole-document replacements atomically under one write lock
//!
//! # Design Decisions
//! - Readers clone the generic value out and decode it outside the lock
//! - A section is owned by exactly one document; a push update that names a
//!   section owned by another document is rejected for that section instead
//!   of silently moving ownership
//! - Sections that disappear from a document on update are removed

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::format::Document;

/// The outcome of replacing one document's sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionChange {
    /// Document the update came from.
    pub document: String,
    /// Sections whose value was added or changed.
    pub updated: Vec<String>,
    /// Sections the document no longer carries.
    pub removed: Vec<String>,
    /// Sections skipped because another document owns them.
    pub rejected: Vec<String>,
}

impl SectionChange {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug, Default)]
struct IndexState {
    sections: HashMap<String, Value>,
    /// section name -> owning document id
    owners: HashMap<String, String>,
    /// document id -> section names it currently provides
    documents: HashMap<String, Vec<String>>,
}

/// Thread-safe map of section name to generic value.
#[derive(Debug, Default)]
pub struct SectionIndex {
    state: RwLock<IndexState>,
}

impl SectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a single anonymous document (local source).
    pub fn from_document(document: Document) -> Self {
        let state = IndexState {
            sections: document.into_iter().collect(),
            ..IndexState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    /// Clone out the generic value of one section.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.read().sections.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().sections.contains_key(name)
    }

    /// All section names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().sections.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The document a section currently comes from, if it came from one.
    pub fn owner(&self, name: &str) -> Option<String> {
        self.read().owners.get(name).cloned()
    }

    /// Merge a document fetched at startup. Later documents win for a
    /// section name that an earlier document also provided.
    pub fn install_document(&self, data_id: &str, document: Document) {
        let mut state = self.write();
        let mut names = Vec::with_capacity(document.len());
        for (name, value) in document {
            if let Some(previous) = state.owners.get(&name).cloned() {
                if previous != data_id {
                    tracing::warn!(
                        section = %name,
                        previous = %previous,
                        data_id = %data_id,
                        "Section provided by several documents, later document wins"
                    );
                    if let Some(list) = state.documents.get_mut(&previous) {
                        list.retain(|n| n != &name);
                    }
                }
            }
            state.owners.insert(name.clone(), data_id.to_string());
            state.sections.insert(name.clone(), value);
            names.push(name);
        }
        state.documents.insert(data_id.to_string(), names);
    }

    /// Replace every section a document provides with its pushed content.
    pub fn replace_document(&self, data_id: &str, document: Document) -> SectionChange {
        let mut change = SectionChange {
            document: data_id.to_string(),
            ..SectionChange::default()
        };
        let mut state = self.write();

        // Drop the old name-to-document associations first.
        let previous = state.documents.remove(data_id).unwrap_or_default();
        for name in previous {
            if state.owners.get(&name).map(String::as_str) == Some(data_id) {
                state.owners.remove(&name);
                if !document.contains_key(&name) {
                    state.sections.remove(&name);
                    change.removed.push(name);
                }
            }
        }

        let mut names = Vec::with_capacity(document.len());
        for (name, value) in document {
            if let Some(owner) = state.owners.get(&name) {
                tracing::error!(
                    section = %name,
                    owner = %owner,
                    data_id = %data_id,
                    "Section already provided by another document, update rejected"
                );
                change.rejected.push(name);
                continue;
            }
            state.owners.insert(name.clone(), data_id.to_string());
            let changed = state.sections.get(&name) != Some(&value);
            if changed {
                state.sections.insert(name.clone(), value);
                change.updated.push(name.clone());
            }
            names.push(name);
        }
        state.documents.insert(data_id.to_string(), names);
        change
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexState> {
        self.state.read().expect("section index lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexState> {
        self.state.write().expect("section index lock poisoned")
    }
}
