//! Operations view: what each configured source holds and when it last
//! synchronized. Used by `omnidex status`.

use anyhow::Result;
use serde::Serialize;

use omnidex_core::models::{format_ts_display, now_ts, FieldFilters, PassRecord};
use omnidex_core::store::IndexStore;

use crate::config::Config;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub doctype: String,
    pub enabled: bool,
    pub documents: u64,
    /// `None` when the source has never completed a pass.
    pub last_pass: Option<PassRecord>,
}

/// One entry per configured source, in name order.
pub async fn collect_status(config: &Config, store: &dyn IndexStore) -> Result<Vec<SourceStatus>> {
    let mut out = Vec::with_capacity(config.sources.len());
    for (name, source) in &config.sources {
        let filters = FieldFilters {
            source_name: Some(name.clone()),
            ..Default::default()
        };
        out.push(SourceStatus {
            name: name.clone(),
            doctype: source.doctype.clone(),
            enabled: source.enabled,
            documents: store.count(&filters).await?,
            last_pass: store.last_pass(name).await?,
        });
    }
    Ok(out)
}

pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let statuses = collect_status(config, &store).await;
    let total = store.count(&FieldFilters::default()).await;
    store.close().await;
    let (statuses, total) = (statuses?, total?);

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("omnidex status");
    println!("==============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Documents:   {}", format_number(total));
    println!();

    if statuses.is_empty() {
        println!("  No sources configured.");
        return Ok(());
    }

    println!(
        "  {:<20} {:<16} {:>8}   {:<16} {}",
        "SOURCE", "DOCTYPE", "DOCS", "LAST SYNC", "LAST COUNTS"
    );
    println!("  {}", "-".repeat(90));
    let now = now_ts();
    for s in &statuses {
        let (synced, counts) = match &s.last_pass {
            Some(pass) => (
                format_ts_relative(pass.finished_at, now),
                summarize(pass),
            ),
            None => ("never".to_string(), String::new()),
        };
        let name = if s.enabled {
            s.name.clone()
        } else {
            format!("{} (off)", s.name)
        };
        println!(
            "  {:<20} {:<16} {:>8}   {:<16} {}",
            name,
            s.doctype,
            format_number(s.documents),
            synced,
            counts
        );
    }
    println!();
    Ok(())
}

fn summarize(pass: &PassRecord) -> String {
    let c = &pass.counts;
    let mut line = format!(
        "+{} ~{} -{} ={} !{}",
        c.new, c.updated, c.deleted, c.unchanged, c.failed
    );
    if !pass.listing_complete {
        line.push_str(" (partial listing)");
    }
    if let Some(error) = &pass.error {
        line.push_str(&format!(" error: {}", error));
    }
    line
}

/// "3 hours ago" style for recent passes, a date otherwise.
fn format_ts_relative(ts: i64, now: i64) -> String {
    let delta = now - ts;
    if delta < 0 {
        return format_ts_display(ts);
    }
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86_400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86_400 * 30 => format!("{} day{} ago", d / 86_400, plural(d / 86_400)),
        _ => format_ts_display(ts),
    }
}
