//! Document retrieval by index id.
//!
//! Used by `omnidex get`. Returns the stored record together with its
//! rendered display view.

use anyhow::{bail, Result};
use serde::Serialize;

use omnidex_core::models::{format_ts_iso, DisplayRecord, IndexedDocument};
use omnidex_core::store::IndexStore;

use crate::config::Config;
use crate::registry::SourceRegistry;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document: IndexedDocument,
    /// Absent when the stored tag is no longer registered.
    pub display: Option<DisplayRecord>,
}

pub async fn get_document(store: &dyn IndexStore, index_id: &str) -> Result<Option<DocumentView>> {
    let Some(document) = store.get(index_id).await? else {
        return Ok(None);
    };
    let display = match SourceRegistry::global().dispatch(&document.source_tag) {
        Ok(kind) => Some((kind.render)(&document)),
        Err(e) => {
            tracing::warn!(index_id, error = %e, "no renderer for stored document");
            None
        }
    };
    Ok(Some(DocumentView { document, display }))
}

pub async fn run_get(config: &Config, index_id: &str, json: bool) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let view = get_document(&store, index_id).await;
    store.close().await;
    let Some(view) = view? else {
        bail!("document not found: {}", index_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let doc = &view.document;
    println!("--- Document ---");
    println!("id:           {}", doc.index_id);
    println!(
        "title:        {}",
        if doc.title.is_empty() { "(untitled)" } else { &doc.title }
    );
    println!("doctype:      {}", doc.source_tag);
    println!("source:       {}", doc.source_name);
    println!("remote_id:    {}", doc.remote_id);
    if let Some(url) = &doc.url {
        println!("url:          {}", url);
    }
    if let Some(owner) = &doc.owner {
        println!("owner:        {}", owner);
    }
    println!("created_at:   {}", format_ts_iso(doc.created_at));
    println!("modified_at:  {}", format_ts_iso(doc.modified_at));
    println!("indexed_at:   {}", format_ts_iso(doc.indexed_at));
    println!("content_kind: {}", doc.content_kind);
    for (key, value) in &doc.extra_fields {
        println!("{:<13} {}", format!("{}:", key), value);
    }
    println!();
    println!("--- Content ---");
    println!("{}", doc.content);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use omnidex_core::models::{index_id, ContentKind};
    use omnidex_core::store::memory::InMemoryStore;

    use super::*;

    #[tokio::test]
    async fn missing_document_is_none() {
        let store = InMemoryStore::new();
        assert!(get_document(&store, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_document_is_rendered() {
        let store = InMemoryStore::new();
        let id = index_id("disqus", "42");
        store
            .upsert(&IndexedDocument {
                index_id: id.clone(),
                source_tag: "disqus".into(),
                source_name: "comments".into(),
                remote_id: "42".into(),
                title: "Launch thread".into(),
                url: Some("https://blog.example/launch".into()),
                created_at: 10,
                modified_at: 10,
                indexed_at: 11,
                content: "great launch".into(),
                content_html: "<p>great launch</p>".into(),
                content_kind: ContentKind::Html,
                owner: None,
                fingerprint: None,
                extra_fields: BTreeMap::from([("forum".to_string(), "blog".to_string())]),
            })
            .await
            .unwrap();

        let view = get_document(&store, &id).await.unwrap().unwrap();
        assert_eq!(view.document.remote_id, "42");
        assert_eq!(view.display.unwrap().template_key, "search_item_disqus");
    }
}
