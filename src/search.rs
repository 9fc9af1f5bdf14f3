//! Query-time dispatch.
//!
//! A search runs in two steps: the [`IndexStore`] ranks stored documents,
//! then every hit is handed to the render mapping of its doctype, looked up
//! by tag in the [`SourceRegistry`]. Hits carrying a tag this build does not
//! know are skipped with a warning so one stale row never breaks a search.

use anyhow::Result;
use serde::Serialize;

use omnidex_core::models::{DisplayRecord, FieldFilters};
use omnidex_core::normalize::excerpt;
use omnidex_core::store::IndexStore;

use crate::config::Config;
use crate::registry::SourceRegistry;
use crate::sqlite_store::SqliteStore;

/// One rendered search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub score: f64,
    pub source_name: String,
    pub source_tag: String,
    #[serde(flatten)]
    pub display: DisplayRecord,
}

/// Rank, then render each hit through its doctype's display mapping.
pub async fn search_documents(
    store: &dyn IndexStore,
    text: &str,
    filters: &FieldFilters,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let registry = SourceRegistry::global();
    let hits = store.query(text, filters, limit).await?;
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let kind = match registry.dispatch(&hit.doc.source_tag) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(index_id = %hit.doc.index_id, error = %e, "skipping result");
                continue;
            }
        };
        let mut display = (kind.render)(&hit.doc);
        if !hit.highlight.is_empty() {
            display.highlight = Some(hit.highlight);
        }
        results.push(SearchResult {
            score: hit.score,
            source_name: hit.doc.source_name,
            source_tag: hit.doc.source_tag,
            display,
        });
    }
    Ok(results)
}

/// Filters and output options for `omnidex search`.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub source_tag: Option<String>,
    pub source_name: Option<String>,
    pub owner: Option<String>,
    pub since: Option<i64>,
    pub limit: Option<usize>,
    pub json: bool,
}

pub async fn run_search(config: &Config, query: &str, args: SearchArgs) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let filters = FieldFilters {
        source_tag: args.source_tag,
        source_name: args.source_name,
        owner: args.owner,
        modified_since: args.since,
        ..Default::default()
    };
    let limit = args.limit.unwrap_or(config.search.limit);
    let results = search_documents(&store, query, &filters, limit).await?;
    store.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let display = &result.display;
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            display.kind_label,
            if display.title.is_empty() { "(untitled)" } else { &display.title }
        );
        println!("    modified: {}", display.modified);
        println!("    source: {} ({})", result.source_name, result.source_tag);
        if let Some(url) = &display.url {
            println!("    url: {}", url);
        }
        for badge in &display.badges {
            println!("    {}: {}", badge.label.to_lowercase(), badge.value);
        }
        if let Some(highlight) = &display.highlight {
            let plain = highlight.replace("<mark>", "").replace("</mark>", "");
            println!(
                "    excerpt: \"{}\"",
                excerpt(&plain, config.search.excerpt_chars).replace('\n', " ").trim()
            );
        }
        println!("    id: {}", display.index_id);
        println!();
    }
    Ok(())
}
