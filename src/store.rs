//! Persistence collaborator for the enrichment pipeline.
//!
//! The orchestrator is the only writer of pass state. Read queries serve the
//! presentation layer.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    EnrichmentReport, EnrichmentStatus, IdentityAttributes, LookupAudit, PassToken,
    RiskAssessment, Subject,
};

/// How long an `in_progress` subject may go untouched before a new pass
/// may take it over. A process that dies mid-pass leaves such rows behind.
pub const DEFAULT_STALE_PASS_AFTER: Duration = Duration::from_secs(300);

/// Result of trying to start a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStart {
    Started(PassToken),
    /// Another pass holds the subject.
    AlreadyRunning,
    /// The last pass completed and the caller did not force a re-run.
    AlreadyCompleted,
}

#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    /// Ingestion upsert. Identity attributes are only replaced while the
    /// subject has never been enriched.
    async fn observe_subject(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
    ) -> Result<Subject, AppError>;

    async fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>, AppError>;

    async fn get_subject_status(
        &self,
        subject_id: &str,
    ) -> Result<Option<EnrichmentStatus>, AppError>;

    /// Test-and-set the subject to `in_progress`, creating it if unseen.
    /// An `in_progress` row older than the store's stale window is taken over.
    async fn begin_pass(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
        force: bool,
    ) -> Result<PassStart, AppError>;

    /// Write every record of the pass atomically and mark the subject `completed`.
    async fn commit_pass(
        &self,
        token: &PassToken,
        report: &EnrichmentReport,
        audit: &[LookupAudit],
    ) -> Result<(), AppError>;

    /// Mark the subject `failed` so a later trigger may retry.
    async fn abort_pass(&self, token: &PassToken, reason: &str) -> Result<(), AppError>;

    /// Latest completed pass for the subject.
    async fn get_profile(&self, subject_id: &str) -> Result<Option<EnrichmentReport>, AppError>;

    async fn get_risk_assessment(
        &self,
        subject_id: &str,
    ) -> Result<Option<RiskAssessment>, AppError>;

    /// Audit entries, oldest first.
    async fn get_lookup_history(&self, subject_id: &str) -> Result<Vec<LookupAudit>, AppError>;
}

struct SubjectRow {
    subject: Subject,
    active_pass: Option<Uuid>,
}

#[derive(Default)]
struct Inner {
    subjects: HashMap<String, SubjectRow>,
    /// Completed passes per subject, oldest first.
    reports: HashMap<String, Vec<EnrichmentReport>>,
    audit: HashMap<String, Vec<LookupAudit>>,
}

/// Store kept in process memory. Used by the CLI and tests.
#[derive(Clone)]
pub struct InMemoryEnrichmentStore {
    inner: Arc<Mutex<Inner>>,
    fail_commits: Arc<AtomicBool>,
    stale_after: Duration,
}

impl Default for InMemoryEnrichmentStore {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            fail_commits: Arc::default(),
            stale_after: DEFAULT_STALE_PASS_AFTER,
        }
    }
}

impl InMemoryEnrichmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Make every following `commit_pass` fail, to exercise the abort path.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of completed passes stored for the subject.
    pub async fn pass_count(&self, subject_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.reports.get(subject_id).map(Vec::len).unwrap_or(0)
    }
}

fn stale_token(token: &PassToken) -> AppError {
    AppError::BadRequest(format!(
        "Pass {} is not the active pass for subject {}",
        token.pass_id, token.subject_id
    ))
}

#[async_trait]
impl EnrichmentStore for InMemoryEnrichmentStore {
    async fn observe_subject(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
    ) -> Result<Subject, AppError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .subjects
            .entry(subject_id.to_string())
            .or_insert_with(|| SubjectRow {
                subject: Subject::new(subject_id, attributes.clone()),
                active_pass: None,
            });

        if row.subject.status == EnrichmentStatus::NotStarted {
            row.subject.attributes = attributes.clone();
            row.subject.updated_at = Utc::now();
        }
        Ok(row.subject.clone())
    }

    async fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.subjects.get(subject_id).map(|row| row.subject.clone()))
    }

    async fn get_subject_status(
        &self,
        subject_id: &str,
    ) -> Result<Option<EnrichmentStatus>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.subjects.get(subject_id).map(|row| row.subject.status))
    }

    async fn begin_pass(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
        force: bool,
    ) -> Result<PassStart, AppError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .subjects
            .entry(subject_id.to_string())
            .or_insert_with(|| SubjectRow {
                subject: Subject::new(subject_id, attributes.clone()),
                active_pass: None,
            });

        match row.subject.status {
            EnrichmentStatus::InProgress => {
                let abandoned = (Utc::now() - row.subject.updated_at)
                    .to_std()
                    .map(|age| age >= self.stale_after)
                    .unwrap_or(false);
                if !abandoned {
                    return Ok(PassStart::AlreadyRunning);
                }
                tracing::warn!(
                    "Taking over stale pass for subject {} (last update {})",
                    subject_id,
                    row.subject.updated_at
                );
            }
            EnrichmentStatus::Completed if !force => return Ok(PassStart::AlreadyCompleted),
            EnrichmentStatus::NotStarted => row.subject.attributes = attributes.clone(),
            _ => {}
        }

        let token = PassToken::new(subject_id);
        row.subject.status = EnrichmentStatus::InProgress;
        row.subject.updated_at = token.started_at;
        row.active_pass = Some(token.pass_id);
        Ok(PassStart::Started(token))
    }

    async fn commit_pass(
        &self,
        token: &PassToken,
        report: &EnrichmentReport,
        audit: &[LookupAudit],
    ) -> Result<(), AppError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(AppError::InternalError(
                "Injected commit failure".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        let row = inner
            .subjects
            .get_mut(&token.subject_id)
            .filter(|row| row.active_pass == Some(token.pass_id))
            .ok_or_else(|| stale_token(token))?;

        row.subject.status = EnrichmentStatus::Completed;
        row.subject.last_score = Some(report.assessment.score);
        row.subject.last_risk_level = Some(report.assessment.level);
        row.subject.updated_at = Utc::now();
        row.active_pass = None;

        inner
            .reports
            .entry(token.subject_id.clone())
            .or_default()
            .push(report.clone());
        inner
            .audit
            .entry(token.subject_id.clone())
            .or_default()
            .extend_from_slice(audit);

        tracing::debug!(
            "Committed pass {} for subject {}",
            token.pass_id,
            token.subject_id
        );
        Ok(())
    }

    async fn abort_pass(&self, token: &PassToken, reason: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .subjects
            .get_mut(&token.subject_id)
            .filter(|row| row.active_pass == Some(token.pass_id))
            .ok_or_else(|| stale_token(token))?;

        row.subject.status = EnrichmentStatus::Failed;
        row.subject.updated_at = Utc::now();
        row.active_pass = None;

        tracing::warn!(
            "Aborted pass {} for subject {}: {}",
            token.pass_id,
            token.subject_id,
            reason
        );
        Ok(())
    }

    async fn get_profile(&self, subject_id: &str) -> Result<Option<EnrichmentReport>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .reports
            .get(subject_id)
            .and_then(|reports| reports.last())
            .cloned())
    }

    async fn get_risk_assessment(
        &self,
        subject_id: &str,
    ) -> Result<Option<RiskAssessment>, AppError> {
        Ok(self
            .get_profile(subject_id)
            .await?
            .map(|report| report.assessment))
    }

    async fn get_lookup_history(&self, subject_id: &str) -> Result<Vec<LookupAudit>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner.audit.get(subject_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichmentProfile, RiskLevel};

    fn attrs(email: &str) -> IdentityAttributes {
        IdentityAttributes {
            email: Some(email.to_string()),
            phone: None,
            display_name: None,
        }
    }

    fn report(subject_id: &str, score: f64) -> EnrichmentReport {
        let now = Utc::now();
        EnrichmentReport {
            profile: EnrichmentProfile {
                profile_id: Uuid::new_v4(),
                subject_id: subject_id.to_string(),
                input: attrs("jane@example.com"),
                created_at: now,
                updated_at: now,
            },
            accounts: vec![],
            breaches: vec![],
            clusters: vec![],
            assessment: RiskAssessment {
                score,
                level: RiskLevel::Minimal,
                factors: vec![],
                recommendations: vec![],
            },
            phone: None,
            email: None,
        }
    }

    fn started(start: PassStart) -> PassToken {
        match start {
            PassStart::Started(token) => token,
            other => panic!("expected a started pass, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_begin_pass_is_test_and_set() {
        let store = InMemoryEnrichmentStore::new();
        let a = attrs("jane@example.com");

        let token = started(store.begin_pass("s1", &a, false).await.unwrap());
        assert_eq!(token.subject_id, "s1");
        assert_eq!(
            store.begin_pass("s1", &a, false).await.unwrap(),
            PassStart::AlreadyRunning
        );
        assert_eq!(
            store.get_subject_status("s1").await.unwrap(),
            Some(EnrichmentStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn test_stale_in_progress_pass_is_taken_over() {
        let store = InMemoryEnrichmentStore::new().with_stale_after(Duration::ZERO);
        let a = attrs("jane@example.com");

        let abandoned = started(store.begin_pass("s1", &a, false).await.unwrap());
        let takeover = started(store.begin_pass("s1", &a, false).await.unwrap());
        assert_ne!(abandoned.pass_id, takeover.pass_id);

        // Only the newest token may finish the pass.
        assert!(store
            .commit_pass(&abandoned, &report("s1", 0.1), &[])
            .await
            .is_err());
        store.commit_pass(&takeover, &report("s1", 0.2), &[]).await.unwrap();
        assert_eq!(store.pass_count("s1").await, 1);
        assert_eq!(
            store.get_subject_status("s1").await.unwrap(),
            Some(EnrichmentStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_commit_completes_and_blocks_unforced_rerun() {
        let store = InMemoryEnrichmentStore::new();
        let a = attrs("jane@example.com");
        let token = started(store.begin_pass("s1", &a, false).await.unwrap());

        store.commit_pass(&token, &report("s1", 0.28), &[]).await.unwrap();

        let subject = store.get_subject("s1").await.unwrap().unwrap();
        assert_eq!(subject.status, EnrichmentStatus::Completed);
        assert_eq!(subject.last_score, Some(0.28));
        assert_eq!(
            store.begin_pass("s1", &a, false).await.unwrap(),
            PassStart::AlreadyCompleted
        );

        let forced = started(store.begin_pass("s1", &a, true).await.unwrap());
        store.commit_pass(&forced, &report("s1", 0.5), &[]).await.unwrap();
        assert_eq!(store.pass_count("s1").await, 2);
        assert_eq!(
            store.get_risk_assessment("s1").await.unwrap().unwrap().score,
            0.5
        );
    }

    #[tokio::test]
    async fn test_abort_marks_failed_and_allows_retry() {
        let store = InMemoryEnrichmentStore::new();
        let a = attrs("jane@example.com");
        let token = started(store.begin_pass("s1", &a, false).await.unwrap());

        store.abort_pass(&token, "disk full").await.unwrap();
        assert_eq!(
            store.get_subject_status("s1").await.unwrap(),
            Some(EnrichmentStatus::Failed)
        );

        // Stale token cannot commit.
        assert!(store.commit_pass(&token, &report("s1", 0.1), &[]).await.is_err());
        started(store.begin_pass("s1", &a, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_observe_only_updates_attributes_before_enrichment() {
        let store = InMemoryEnrichmentStore::new();
        store.observe_subject("s1", &attrs("old@example.com")).await.unwrap();
        store.observe_subject("s1", &attrs("new@example.com")).await.unwrap();

        let token = started(
            store
                .begin_pass("s1", &attrs("new@example.com"), false)
                .await
                .unwrap(),
        );
        store.commit_pass(&token, &report("s1", 0.0), &[]).await.unwrap();

        let subject = store
            .observe_subject("s1", &attrs("later@example.com"))
            .await
            .unwrap();
        assert_eq!(subject.attributes.email.as_deref(), Some("new@example.com"));
    }
}
