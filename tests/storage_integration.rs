use chrono::Utc;
use std::collections::BTreeSet;
use std::env;
use std::time::Duration;
use uuid::Uuid;

use rust_subject_enrichment::db::Database;
use rust_subject_enrichment::db_storage::PgEnrichmentStore;
use rust_subject_enrichment::models::{
    BreachRecord, EnrichmentProfile, EnrichmentReport, EnrichmentStatus, IdentityAttributes,
    LookupAudit, LookupOutcome, RiskAssessment, RiskFactor, RiskLevel,
};
use rust_subject_enrichment::store::{EnrichmentStore, PassStart};

/// Integration smoke test for the Postgres store: begin, commit, read back.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pass_lifecycle_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let store = PgEnrichmentStore::new(db.pool.clone());

    // Unique id so repeated runs do not collide.
    let subject_id = format!("smoke-{}", Uuid::new_v4());
    let attributes = IdentityAttributes {
        email: Some("jane.doe@example.com".to_string()),
        phone: None,
        display_name: Some("Jane Doe".to_string()),
    };

    let PassStart::Started(token) = store.begin_pass(&subject_id, &attributes, false).await?
    else {
        anyhow::bail!("expected a fresh subject to start");
    };
    assert_eq!(
        store.begin_pass(&subject_id, &attributes, false).await?,
        PassStart::AlreadyRunning
    );

    let now = Utc::now();
    let report = EnrichmentReport {
        profile: EnrichmentProfile {
            profile_id: Uuid::new_v4(),
            subject_id: subject_id.clone(),
            input: attributes.clone(),
            created_at: now,
            updated_at: now,
        },
        accounts: vec![],
        breaches: vec![BreachRecord {
            name: "Adobe".to_string(),
            breach_date: None,
            data_classes: BTreeSet::from(["Passwords".to_string()]),
            verified: true,
        }],
        clusters: vec![],
        assessment: RiskAssessment {
            score: 0.15,
            level: RiskLevel::Minimal,
            factors: vec![RiskFactor::DataBreaches],
            recommendations: vec!["Assume exposed credentials; require a password reset".to_string()],
        },
        phone: None,
        email: None,
    };
    let audit = vec![LookupAudit {
        subject_id: subject_id.clone(),
        adapter: "breach".to_string(),
        query_value: "jane.doe@example.com".to_string(),
        outcome: LookupOutcome::Success,
        result_count: 1,
        detail: None,
        recorded_at: now,
    }];

    store.commit_pass(&token, &report, &audit).await?;

    assert_eq!(
        store.get_subject_status(&subject_id).await?,
        Some(EnrichmentStatus::Completed)
    );
    assert_eq!(
        store.begin_pass(&subject_id, &attributes, false).await?,
        PassStart::AlreadyCompleted
    );

    let stored = store
        .get_profile(&subject_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("profile missing after commit"))?;
    assert_eq!(stored.breaches.len(), 1);
    assert_eq!(stored.assessment.level, RiskLevel::Minimal);

    let history = store.get_lookup_history(&subject_id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, LookupOutcome::Success);
    Ok(())
}

/// A subject left `in_progress` past the stale window can be claimed again,
/// and the abandoned token can no longer commit.
#[tokio::test]
#[ignore]
async fn stale_pass_takeover_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let store = PgEnrichmentStore::new(db.pool.clone()).with_stale_after(Duration::ZERO);

    let subject_id = format!("stale-{}", Uuid::new_v4());
    let attributes = IdentityAttributes {
        email: Some("jane.doe@example.com".to_string()),
        phone: None,
        display_name: None,
    };

    let PassStart::Started(abandoned) = store.begin_pass(&subject_id, &attributes, false).await?
    else {
        anyhow::bail!("expected a fresh subject to start");
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let PassStart::Started(takeover) = store.begin_pass(&subject_id, &attributes, false).await?
    else {
        anyhow::bail!("expected the stale pass to be taken over");
    };
    assert_ne!(abandoned.pass_id, takeover.pass_id);

    assert!(store.abort_pass(&abandoned, "worker vanished").await.is_err());
    store.abort_pass(&takeover, "cleanup").await?;
    assert_eq!(
        store.get_subject_status(&subject_id).await?,
        Some(EnrichmentStatus::Failed)
    );
    Ok(())
}
