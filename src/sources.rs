//! Configured source instances: construction, credential checks, and the
//! `sources` / `doctypes` listings.

use std::sync::Arc;

use anyhow::{bail, Result};
use futures::future::join_all;

use crate::config::Config;
use crate::doctype::DocumentSource;
use crate::engine::{PassOutcome, SourceReport};
use crate::error::SourceError;
use crate::http::HttpSettings;
use crate::registry::SourceRegistry;

/// Sources that were built, plus reports for the ones skipped because
/// their credential material could not be resolved.
pub struct Instantiated {
    pub sources: Vec<Arc<dyn DocumentSource>>,
    pub skipped: Vec<SourceReport>,
}

/// Build the sources selected by `target` (`"all"` or one instance name).
///
/// `"all"` skips disabled sources; naming a disabled source explicitly is
/// an error. A source whose credential cannot be resolved is skipped with
/// a report, any other construction failure is fatal.
pub fn instantiate(config: &Config, target: &str) -> Result<Instantiated> {
    let selected: Vec<_> = if target == "all" {
        config.sources.iter().filter(|(_, s)| s.enabled).collect()
    } else {
        match config.sources.get_key_value(target) {
            Some((_, s)) if !s.enabled => bail!("source '{}' is disabled", target),
            Some(entry) => vec![entry],
            None => bail!("unknown source '{}'", target),
        }
    };

    let http = HttpSettings::from_config(&config.sync);
    let registry = SourceRegistry::global();
    let mut out = Instantiated {
        sources: Vec::with_capacity(selected.len()),
        skipped: Vec::new(),
    };
    for (name, source_config) in selected {
        match registry.instantiate(name, source_config, &http, &config.config_dir) {
            Ok(source) => out.sources.push(source),
            Err(e @ SourceError::Credential { .. }) => {
                tracing::error!(source = %name, error = %e, "source skipped");
                out.skipped
                    .push(SourceReport::rejected(name, &source_config.doctype, e));
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("sources.{}", name))),
        }
    }
    Ok(out)
}

/// `omnidex sources`: every configured instance and whether its
/// credentials are accepted right now.
pub async fn list_sources(config: &Config) -> Result<()> {
    let built = instantiate(config, "all")?;
    let checks = join_all(built.sources.iter().map(|source| async move {
        let status = match source.validate_credentials().await {
            Ok(()) => "OK".to_string(),
            Err(e @ SourceError::Credential { .. }) => format!("REJECTED ({})", e),
            Err(e) => format!("UNAVAILABLE ({})", e),
        };
        (source.name().to_string(), status)
    }))
    .await;

    println!("{:<20} {:<16} STATUS", "SOURCE", "DOCTYPE");
    for (name, source) in &config.sources {
        let status = if !source.enabled {
            "DISABLED".to_string()
        } else if let Some((_, status)) = checks.iter().find(|(n, _)| n == name) {
            status.clone()
        } else if let Some(report) = built.skipped.iter().find(|r| &r.name == name) {
            match &report.outcome {
                PassOutcome::Rejected(reason) => format!("REJECTED ({})", reason),
                _ => "REJECTED".to_string(),
            }
        } else {
            "UNKNOWN".to_string()
        };
        println!("{:<20} {:<16} {}", name, source.doctype, status);
    }
    Ok(())
}

/// `omnidex doctypes`: the compiled-in registry.
pub fn list_doctypes() {
    println!("{:<18} {:<28} DESCRIPTION", "DOCTYPE", "TEMPLATE");
    for kind in SourceRegistry::global().kinds() {
        println!("{:<18} {:<28} {}", kind.tag, kind.template_key, kind.description);
    }
}
