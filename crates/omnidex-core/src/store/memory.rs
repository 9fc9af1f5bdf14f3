//! In-memory [`IndexStore`] for tests and embedding in other tools.
//!
//! Documents live in a `HashMap` behind `std::sync::RwLock`. Queries are a
//! case-insensitive term match over title and content; titles weigh ten
//! times more than body text.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{FieldFilters, IndexedDocument, PassRecord, QueryHit};
use crate::normalize::escape_html;

use super::IndexStore;

const HIGHLIGHT_WORDS: usize = 32;

pub struct InMemoryStore {
    docs: RwLock<HashMap<String, IndexedDocument>>,
    passes: RwLock<Vec<PassRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            passes: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every recorded pass, oldest first.
    pub fn passes(&self) -> Vec<PassRecord> {
        self.passes.read().unwrap().clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn query_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn score(doc: &IndexedDocument, terms: &[String]) -> f64 {
    let title = doc.title.to_lowercase();
    let content = doc.content.to_lowercase();
    terms
        .iter()
        .map(|t| (title.matches(t.as_str()).count() * 10 + content.matches(t.as_str()).count()) as f64)
        .sum()
}

fn highlight(text: &str, terms: &[String]) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let is_hit = |w: &str| {
        let lower = w.to_lowercase();
        terms.iter().any(|t| lower.contains(t.as_str()))
    };
    let first = words.iter().position(|w| is_hit(w)).unwrap_or(0);
    let start = first.saturating_sub(4);
    let end = (start + HIGHLIGHT_WORDS).min(words.len());

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    for (i, word) in words[start..end].iter().enumerate() {
        if i > 0 || start > 0 {
            out.push(' ');
        }
        if is_hit(word) {
            out.push_str("<mark>");
            out.push_str(&escape_html(word));
            out.push_str("</mark>");
        } else {
            out.push_str(&escape_html(word));
        }
    }
    if end < words.len() {
        out.push_str(" ...");
    }
    out
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn upsert(&self, doc: &IndexedDocument) -> Result<bool> {
        let mut docs = self.docs.write().unwrap();
        if let Some(existing) = docs.get(&doc.index_id) {
            if existing.modified_at > doc.modified_at {
                return Ok(false);
            }
        }
        docs.insert(doc.index_id.clone(), doc.clone());
        Ok(true)
    }

    async fn restamp(&self, index_id: &str, modified_at: i64, source_name: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap();
        match docs.get_mut(index_id) {
            Some(doc) if doc.modified_at <= modified_at => {
                doc.modified_at = modified_at;
                doc.source_name = source_name.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, index_id: &str) -> Result<bool> {
        Ok(self.docs.write().unwrap().remove(index_id).is_some())
    }

    async fn get(&self, index_id: &str) -> Result<Option<IndexedDocument>> {
        Ok(self.docs.read().unwrap().get(index_id).cloned())
    }

    async fn get_all(&self, source_tag: &str) -> Result<Vec<IndexedDocument>> {
        let docs = self.docs.read().unwrap();
        let mut out: Vec<IndexedDocument> = docs
            .values()
            .filter(|d| d.source_tag == source_tag)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(out)
    }

    async fn query(
        &self,
        text: &str,
        filters: &FieldFilters,
        limit: usize,
    ) -> Result<Vec<QueryHit>> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.docs.read().unwrap();
        let mut hits: Vec<QueryHit> = docs
            .values()
            .filter(|d| filters.matches(d))
            .filter_map(|d| {
                let s = score(d, &terms);
                (s > 0.0).then(|| QueryHit {
                    doc: d.clone(),
                    score: s,
                    highlight: highlight(&d.content, &terms),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc.index_id.cmp(&b.doc.index_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, filters: &FieldFilters) -> Result<u64> {
        let docs = self.docs.read().unwrap();
        Ok(docs.values().filter(|d| filters.matches(d)).count() as u64)
    }

    async fn record_pass(&self, record: &PassRecord) -> Result<()> {
        self.passes.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn last_pass(&self, source_name: &str) -> Result<Option<PassRecord>> {
        let passes = self.passes.read().unwrap();
        Ok(passes
            .iter()
            .rev()
            .find(|p| p.source_name == source_name)
            .cloned())
    }
}
