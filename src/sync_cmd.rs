//! `omnidex sync <all|name>`.

use std::sync::Arc;

use anyhow::{bail, Result};

use omnidex_core::store::IndexStore;

use crate::config::Config;
use crate::engine::{self, PassOutcome, SourceReport, SyncOptions};
use crate::progress::{ProgressMode, SyncProgressReporter};
use crate::sources;
use crate::sqlite_store::SqliteStore;

pub async fn run_sync(
    config: &Config,
    target: &str,
    full: bool,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let built = sources::instantiate(config, target)?;
    if built.sources.is_empty() && built.skipped.is_empty() {
        println!("No enabled sources configured.");
        return Ok(());
    }

    let store = Arc::new(SqliteStore::open(&config.db.path).await?);
    let opts = SyncOptions {
        workers: config.sync.workers,
        full,
        dry_run,
    };
    let reporter: Arc<dyn SyncProgressReporter> = Arc::from(progress.reporter());
    let index: Arc<dyn IndexStore> = store.clone();

    let mut reports = built.skipped;
    tokio::select! {
        done = engine::sync_sources(built.sources, index, opts, reporter) => reports.extend(done),
        _ = tokio::signal::ctrl_c() => {
            // Dropping the pass futures aborts them; every write that
            // already committed stays in the index.
            tracing::warn!("interrupted; abandoning running passes");
            store.close().await;
            bail!("sync interrupted");
        }
    }
    store.close().await;

    reports.sort_by(|a, b| a.name.cmp(&b.name));
    print_reports(&reports, dry_run);

    let failed = reports
        .iter()
        .filter(|r| !matches!(r.outcome, PassOutcome::Completed(_)))
        .count();
    if failed > 0 {
        bail!("{} of {} sources did not sync", failed, reports.len());
    }
    Ok(())
}

fn print_reports(reports: &[SourceReport], dry_run: bool) {
    let verb = if dry_run { "would sync" } else { "synced" };
    for report in reports {
        match &report.outcome {
            PassOutcome::Completed(pass) => {
                let c = &pass.counts;
                println!(
                    "{} {} ({}): new {}, updated {}, deleted {}, unchanged {}, failed {}{}",
                    verb,
                    report.name,
                    report.tag,
                    c.new,
                    c.updated,
                    c.deleted,
                    c.unchanged,
                    c.failed,
                    if pass.listing_complete { "" } else { " (listing incomplete, deletions skipped)" }
                );
            }
            PassOutcome::Rejected(reason) => {
                println!("skipped {} ({}): {}", report.name, report.tag, reason);
            }
            PassOutcome::Failed(reason) => {
                println!("failed {} ({}): {}", report.name, report.tag, reason);
            }
        }
    }
}
