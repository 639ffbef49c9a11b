//! One-shot enrichment of a single subject, printed as JSON.
//!
//! Usage: `enrich-subject <subject_id> [--email E] [--phone P] [--name "N"]`,
//! see `--help`.
//!
//! Runs against the live sources configured in the environment and keeps
//! results in memory only.

use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;

use rust_subject_enrichment::config::Config;
use rust_subject_enrichment::models::{EnrichmentOutcome, EnrichmentRequest, IdentityAttributes};
use rust_subject_enrichment::orchestrator::Orchestrator;
use rust_subject_enrichment::registry::AdapterRegistry;
use rust_subject_enrichment::store::{EnrichmentStore, InMemoryEnrichmentStore};

/// Enrich one subject against the configured sources and print the report
#[derive(Parser, Debug)]
#[clap(name = "enrich-subject")]
#[clap(about = "Run one enrichment pass for a subject and print the result as JSON")]
struct Args {
    /// Subject identifier
    subject_id: String,

    /// Email address to look up
    #[clap(long)]
    email: Option<String>,

    /// Phone number, E.164 or national format
    #[clap(long)]
    phone: Option<String>,

    /// Display name used to derive usernames
    #[clap(long)]
    name: Option<String>,
}

impl From<Args> for EnrichmentRequest {
    fn from(args: Args) -> Self {
        EnrichmentRequest {
            subject_id: args.subject_id,
            attributes: IdentityAttributes {
                email: args.email,
                phone: args.phone,
                display_name: args.name,
            },
            force: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_subject_enrichment=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let request = EnrichmentRequest::from(Args::parse());
    let subject_id = request.subject_id.clone();

    let config = Config::from_env()?;
    let registry = Arc::new(AdapterRegistry::from_config(&config)?);
    let store = Arc::new(InMemoryEnrichmentStore::new());
    let orchestrator = Orchestrator::from_config(&config, registry, store.clone());

    eprintln!("=== Enriching subject {} ===", subject_id);
    match orchestrator.enrich(request).await? {
        EnrichmentOutcome::Completed { failed_lookups, .. } => {
            let report = store.get_profile(&subject_id).await?;
            let history = store.get_lookup_history(&subject_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "report": report,
                    "lookups": history,
                }))?
            );
            eprintln!("✓ Done ({} failed lookup(s))", failed_lookups);
        }
        EnrichmentOutcome::NoQueryableAttributes => {
            bail!("provide at least one of --email, --phone, --name")
        }
        other => eprintln!("Nothing to do: {:?}", other),
    }

    Ok(())
}
