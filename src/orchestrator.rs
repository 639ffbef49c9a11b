//! Enrichment orchestrator: single-flight, fan-out, fan-in, correlate, score, persist.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::correlation::correlate;
use crate::errors::{AdapterError, PipelineError};
use crate::models::{
    AdapterKind, AdapterQuery, EnrichmentOutcome, EnrichmentProfile, EnrichmentReport,
    EnrichmentRequest, Findings, FindingsBundle, IdentityAttributes, LookupAudit, LookupOutcome,
    PassToken, PhoneValidation, TriggerStatus,
};
use crate::registry::{AdapterRegistry, RegisteredAdapter};
use crate::scoring::score;
use crate::single_flight::SingleFlight;
use crate::store::{EnrichmentStore, PassStart};
use crate::validation::is_valid_username;

/// Upper bound on username variants probed per subject.
pub const MAX_USERNAME_CANDIDATES: usize = 5;

/// Username variants derived from the email local-part and display name,
/// deduplicated, in priority order, at most [`MAX_USERNAME_CANDIDATES`].
pub fn username_candidates(attributes: &IdentityAttributes) -> Vec<String> {
    let mut raw: Vec<String> = Vec::new();

    if let Some(email) = attributes.email.as_deref() {
        if let Some((local, _)) = email.split_once('@') {
            let local = local.split('+').next().unwrap_or(local);
            raw.push(local.to_lowercase());
        }
    }

    if let Some(name) = attributes.display_name.as_deref() {
        // A single-token name may already be a handle; try it as written first
        let trimmed = name.trim();
        if !trimmed.contains(char::is_whitespace) && is_valid_username(trimmed) {
            raw.push(trimmed.to_string());
        }

        let tokens: Vec<String> = name
            .split_whitespace()
            .map(|t| {
                t.chars()
                    .filter(|c| c.is_alphanumeric())
                    .flat_map(char::to_lowercase)
                    .collect::<String>()
            })
            .filter(|t| !t.is_empty())
            .collect();

        match tokens.as_slice() {
            [] => {}
            [single] => raw.push(single.clone()),
            [first, .., last] => {
                let initial: String = first.chars().take(1).collect();
                raw.push(format!("{}{}", first, last));
                raw.push(format!("{}.{}", first, last));
                raw.push(format!("{}_{}", first, last));
                raw.push(format!("{}.{}", initial, last));
                raw.push(format!("{}{}", initial, last));
            }
        }
    }

    let mut candidates: Vec<String> = Vec::new();
    for candidate in raw {
        if is_valid_username(&candidate) && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
        if candidates.len() == MAX_USERNAME_CANDIDATES {
            break;
        }
    }
    candidates
}

/// All queries one pass fans out, in a fixed order.
fn build_queries(attributes: &IdentityAttributes) -> Vec<AdapterQuery> {
    let mut queries = Vec::new();
    if let Some(ref email) = attributes.email {
        queries.push(AdapterQuery::Email(email.clone()));
    }
    if let Some(ref phone) = attributes.phone {
        queries.push(AdapterQuery::Phone(phone.clone()));
    }
    queries.extend(
        username_candidates(attributes)
            .into_iter()
            .map(AdapterQuery::Username),
    );
    queries
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One adapter call scheduled by a pass.
struct Job {
    adapter: RegisteredAdapter,
    query: AdapterQuery,
}

enum Begin {
    Started(PassToken),
    AlreadyRunning,
    AlreadyCompleted,
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn EnrichmentStore>,
    guard: SingleFlight,
    worker_pool: usize,
    margin: Duration,
    pass_slots: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(registry: Arc<AdapterRegistry>, store: Arc<dyn EnrichmentStore>) -> Self {
        Self::from_config(&Config::default(), registry, store)
    }

    pub fn from_config(
        config: &Config,
        registry: Arc<AdapterRegistry>,
        store: Arc<dyn EnrichmentStore>,
    ) -> Self {
        Self {
            registry,
            store,
            guard: SingleFlight::new(config.single_flight_ttl()),
            worker_pool: config.worker_pool_size.max(1),
            margin: config.pipeline_margin(),
            pass_slots: Arc::new(Semaphore::new(config.max_concurrent_passes.max(1))),
        }
    }

    pub fn with_worker_pool(mut self, size: usize) -> Self {
        self.worker_pool = size.max(1);
        self
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub fn store(&self) -> &Arc<dyn EnrichmentStore> {
        &self.store
    }

    /// Overall fan-in deadline: the longest adapter budget plus a margin.
    pub fn pass_deadline(&self) -> Duration {
        self.registry.max_timeout() + self.margin
    }

    /// Run one enrichment pass to completion.
    pub async fn enrich(
        &self,
        request: EnrichmentRequest,
    ) -> Result<EnrichmentOutcome, PipelineError> {
        let attributes = request.attributes.normalized();
        if !attributes.is_queryable() {
            tracing::info!("Subject {} has no queryable attributes", request.subject_id);
            return Ok(EnrichmentOutcome::NoQueryableAttributes);
        }

        match self
            .begin(&request.subject_id, &attributes, request.force)
            .await?
        {
            Begin::Started(token) => self.run_pass(token, attributes).await,
            Begin::AlreadyRunning => Ok(EnrichmentOutcome::AlreadyRunning),
            Begin::AlreadyCompleted => Ok(EnrichmentOutcome::AlreadyCompleted),
        }
    }

    /// Fire-and-forget: claim the subject, then run the pass in the background.
    pub async fn trigger(&self, request: EnrichmentRequest) -> Result<TriggerStatus, PipelineError> {
        let attributes = request.attributes.normalized();
        if !attributes.is_queryable() {
            tracing::info!(
                "Skipping trigger for {}: no queryable attributes",
                request.subject_id
            );
            return Ok(TriggerStatus::SkippedNoAttributes);
        }

        let token = match self
            .begin(&request.subject_id, &attributes, request.force)
            .await?
        {
            Begin::Started(token) => token,
            Begin::AlreadyRunning => return Ok(TriggerStatus::AlreadyRunning),
            Begin::AlreadyCompleted => return Ok(TriggerStatus::AlreadyCompleted),
        };

        let this = self.clone();
        tokio::spawn(async move {
            let _slot = match this.pass_slots.clone().acquire_owned().await {
                Ok(slot) => slot,
                Err(e) => {
                    tracing::error!("Pass slots closed, abandoning {}: {}", token.subject_id, e);
                    this.abort(&token, "pass scheduler unavailable").await;
                    return;
                }
            };

            let subject_id = token.subject_id.clone();
            if let Err(e) = this.run_pass(token, attributes).await {
                tracing::error!("Background enrichment for {} failed: {}", subject_id, e);
            }
        });

        Ok(TriggerStatus::Started)
    }

    /// Single-flight: in-process guard first, then the store's test-and-set.
    async fn begin(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
        force: bool,
    ) -> Result<Begin, PipelineError> {
        if !self.guard.try_acquire(subject_id).await {
            tracing::info!("Enrichment already running for {}", subject_id);
            return Ok(Begin::AlreadyRunning);
        }

        let start = match self.store.begin_pass(subject_id, attributes, force).await {
            Ok(start) => start,
            Err(e) => {
                self.guard.release(subject_id).await;
                tracing::error!("Failed to begin pass for {}: {}", subject_id, e);
                return Err(PipelineError::PersistenceFailed(e.to_string()));
            }
        };

        match start {
            PassStart::Started(token) => {
                tracing::info!("Pass {} started for subject {}", token.pass_id, subject_id);
                Ok(Begin::Started(token))
            }
            PassStart::AlreadyRunning => {
                self.guard.release(subject_id).await;
                tracing::info!("Enrichment already running for {} (store)", subject_id);
                Ok(Begin::AlreadyRunning)
            }
            PassStart::AlreadyCompleted => {
                self.guard.release(subject_id).await;
                tracing::info!("Subject {} already enriched, not forced", subject_id);
                Ok(Begin::AlreadyCompleted)
            }
        }
    }

    async fn abort(&self, token: &PassToken, reason: &str) {
        if let Err(e) = self.store.abort_pass(token, reason).await {
            tracing::error!("Failed to abort pass {}: {}", token.pass_id, e);
        }
        self.guard.release(&token.subject_id).await;
    }

    async fn run_pass(
        &self,
        token: PassToken,
        attributes: IdentityAttributes,
    ) -> Result<EnrichmentOutcome, PipelineError> {
        let subject_id = token.subject_id.clone();

        let queries = build_queries(&attributes);
        tracing::info!(
            "Enriching {}: {} quer{} across {} adapters",
            subject_id,
            queries.len(),
            if queries.len() == 1 { "y" } else { "ies" },
            self.registry.len()
        );

        let mut bundle = self.fan_out(&subject_id, queries).await;
        bundle.sort();
        bundle
            .audit
            .sort_by(|a, b| (&a.adapter, &a.query_value).cmp(&(&b.adapter, &b.query_value)));

        let profile_id = Uuid::new_v4();
        for account in &mut bundle.accounts {
            account.profile_id = Some(profile_id);
        }

        let clusters = correlate(&bundle.accounts);
        let assessment = score(
            &bundle.breaches,
            &bundle.accounts,
            bundle.phone.as_ref(),
            bundle.email.as_ref(),
        );
        tracing::info!(
            "Subject {} scored {:.2} ({}), {} cluster(s)",
            subject_id,
            assessment.score,
            assessment.level,
            clusters.len()
        );

        let failed_lookups = bundle
            .audit
            .iter()
            .filter(|a| !matches!(a.outcome, LookupOutcome::Success | LookupOutcome::Empty))
            .count();

        let now = Utc::now();
        let report = EnrichmentReport {
            profile: EnrichmentProfile {
                profile_id,
                subject_id: subject_id.clone(),
                input: attributes,
                created_at: now,
                updated_at: now,
            },
            accounts: bundle.accounts,
            breaches: bundle.breaches,
            clusters,
            assessment,
            phone: bundle.phone,
            email: bundle.email,
        };

        if let Err(e) = self.store.commit_pass(&token, &report, &bundle.audit).await {
            tracing::error!("Failed to persist pass for {}: {}", subject_id, e);
            self.abort(&token, &e.to_string()).await;
            return Err(PipelineError::PersistenceFailed(e.to_string()));
        }
        self.guard.release(&subject_id).await;

        tracing::info!("Enrichment for {} completed", subject_id);
        Ok(EnrichmentOutcome::Completed {
            profile_id,
            assessment: report.assessment,
            accounts: report.accounts.len(),
            breaches: report.breaches.len(),
            clusters: report.clusters.len(),
            failed_lookups,
        })
    }

    /// Launch every applicable (adapter, query) call on the worker pool and
    /// collect whatever finishes before the pass deadline.
    async fn fan_out(&self, subject_id: &str, queries: Vec<AdapterQuery>) -> FindingsBundle {
        let jobs: Vec<Job> = queries
            .iter()
            .flat_map(|query| {
                self.registry.applicable(query).map(move |adapter| Job {
                    adapter: adapter.clone(),
                    query: query.clone(),
                })
            })
            .collect();

        let mut bundle = FindingsBundle::default();
        if jobs.is_empty() {
            return bundle;
        }

        let budget = self.pass_deadline();
        let deadline = Instant::now() + budget;
        let permits = Arc::new(Semaphore::new(self.worker_pool));
        let mut tasks = JoinSet::new();

        for (index, job) in jobs.iter().enumerate() {
            let adapter = job.adapter.clone();
            let query = job.query.clone();
            let permits = permits.clone();

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(AdapterError::Unavailable)),
                };

                tracing::debug!("Calling {} with {:?}", adapter.name(), query);
                let result = AssertUnwindSafe(adapter.invoke(&query))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(AdapterError::transport(format!(
                            "adapter panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                (index, result)
            });
        }

        let mut finished = vec![false; jobs.len()];
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, result)))) => {
                    finished[index] = true;
                    record(&mut bundle, subject_id, &jobs[index], result);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Adapter task for {} did not complete: {}", subject_id, e);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Pass deadline of {:?} reached for {}, abandoning outstanding calls",
                        budget,
                        subject_id
                    );
                    break;
                }
            }
        }
        tasks.abort_all();

        for (index, job) in jobs.iter().enumerate() {
            if !finished[index] {
                record(&mut bundle, subject_id, job, Err(AdapterError::Timeout(budget)));
            }
        }

        tracing::info!(
            "Fan-in for {}: {} call(s), {} breach(es), {} account(s)",
            subject_id,
            jobs.len(),
            bundle.breaches.len(),
            bundle.accounts.len()
        );
        bundle
    }
}

/// Fold one call's result into the bundle and its audit entry.
fn record(
    bundle: &mut FindingsBundle,
    subject_id: &str,
    job: &Job,
    result: Result<Findings, AdapterError>,
) {
    let (outcome, result_count, detail) = match result {
        Ok(findings) => {
            let count = findings.result_count();
            bundle.absorb(findings);
            let outcome = if count == 0 {
                LookupOutcome::Empty
            } else {
                LookupOutcome::Success
            };
            (outcome, count, None)
        }
        Err(e) => {
            tracing::warn!(
                "Adapter {} failed for {:?}: {}",
                job.adapter.name(),
                job.query,
                e
            );
            let mut detail = e.to_string();
            if let AdapterError::MalformedInput { ref suggestion, .. } = e {
                if let Some(s) = suggestion {
                    detail = format!("{} ({})", detail, s);
                }
                if job.adapter.kind() == AdapterKind::Phone {
                    bundle.phone = Some(PhoneValidation::unparsed(
                        job.query.value(),
                        suggestion.clone(),
                    ));
                }
            }
            (e.outcome(), 0, Some(detail))
        }
    };

    bundle.audit.push(LookupAudit {
        subject_id: subject_id.to_string(),
        adapter: job.adapter.name().to_string(),
        query_value: job.query.value().to_string(),
        outcome,
        result_count,
        detail,
        recorded_at: Utc::now(),
    });
}
