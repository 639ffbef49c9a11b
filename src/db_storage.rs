use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    AccountPayload, BreachRecord, CorrelationCluster, CorrelationRule, DiscoveredAccount,
    EmailValidation, EnrichmentProfile, EnrichmentReport, EnrichmentStatus, IdentityAttributes,
    LookupAudit, LookupOutcome, PassToken, PhoneValidation, RiskAssessment, RiskFactor, RiskLevel,
    Subject,
};
use crate::store::{EnrichmentStore, PassStart, DEFAULT_STALE_PASS_AFTER};

/// Postgres-backed enrichment store.
pub struct PgEnrichmentStore {
    pool: PgPool,
    stale_after: Duration,
}

impl PgEnrichmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            stale_after: DEFAULT_STALE_PASS_AFTER,
        }
    }

    /// Age after which an `in_progress` row counts as abandoned.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T, AppError> {
    value.parse::<T>().map_err(AppError::InternalError)
}

type SubjectRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<f64>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn subject_from_row(row: SubjectRow) -> Result<Subject, AppError> {
    let (subject_id, email, phone, display_name, status, last_score, last_level, created_at, updated_at) =
        row;
    Ok(Subject {
        subject_id,
        attributes: IdentityAttributes {
            email,
            phone,
            display_name,
        },
        status: parse_column(&status)?,
        last_score,
        last_risk_level: last_level.as_deref().map(parse_column::<RiskLevel>).transpose()?,
        created_at,
        updated_at,
    })
}

type AccountRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<i64>,
    bool,
    serde_json::Value,
    f64,
);

fn account_from_row(row: AccountRow) -> Result<DiscoveredAccount, AppError> {
    let (
        account_id,
        profile_id,
        source,
        username,
        profile_url,
        display_name,
        bio,
        followers,
        following,
        verified,
        payload,
        confidence,
    ) = row;
    Ok(DiscoveredAccount {
        account_id,
        profile_id: Some(profile_id),
        source,
        username,
        profile_url,
        display_name,
        bio,
        followers,
        following,
        verified,
        payload: serde_json::from_value::<AccountPayload>(payload)?,
        confidence,
    })
}

#[async_trait]
impl EnrichmentStore for PgEnrichmentStore {
    async fn observe_subject(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
    ) -> Result<Subject, AppError> {
        let row: SubjectRow = sqlx::query_as(
            r#"
            INSERT INTO subjects (subject_id, email, phone, display_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subject_id) DO UPDATE
            SET email = CASE WHEN subjects.status = 'not_started' THEN EXCLUDED.email ELSE subjects.email END,
                phone = CASE WHEN subjects.status = 'not_started' THEN EXCLUDED.phone ELSE subjects.phone END,
                display_name = CASE WHEN subjects.status = 'not_started' THEN EXCLUDED.display_name ELSE subjects.display_name END,
                updated_at = now()
            RETURNING subject_id, email, phone, display_name, status, last_score, last_risk_level,
                      created_at, updated_at
            "#,
        )
        .bind(subject_id)
        .bind(&attributes.email)
        .bind(&attributes.phone)
        .bind(&attributes.display_name)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert subject {}", subject_id))?;

        subject_from_row(row)
    }

    async fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>, AppError> {
        let row: Option<SubjectRow> = sqlx::query_as(
            r#"
            SELECT subject_id, email, phone, display_name, status, last_score, last_risk_level,
                   created_at, updated_at
            FROM subjects
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        row.map(subject_from_row).transpose()
    }

    async fn get_subject_status(
        &self,
        subject_id: &str,
    ) -> Result<Option<EnrichmentStatus>, AppError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM subjects WHERE subject_id = $1")
                .bind(subject_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;

        status.map(|(s,)| parse_column(&s)).transpose()
    }

    async fn begin_pass(
        &self,
        subject_id: &str,
        attributes: &IdentityAttributes,
        force: bool,
    ) -> Result<PassStart, AppError> {
        let token = PassToken::new(subject_id);
        let stale_cutoff = token.started_at
            - chrono::Duration::from_std(self.stale_after)
                .map_err(|e| AppError::InternalError(format!("Invalid stale window: {}", e)))?;

        // Conditional upsert is the test-and-set: zero rows means another live
        // pass holds the subject, or it completed and this is not a forced re-run.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO subjects (subject_id, email, phone, display_name, status, active_pass_id, updated_at)
            VALUES ($1, $2, $3, $4, 'in_progress', $5, $6)
            ON CONFLICT (subject_id) DO UPDATE
            SET email = CASE WHEN subjects.status = 'not_started' THEN EXCLUDED.email ELSE subjects.email END,
                phone = CASE WHEN subjects.status = 'not_started' THEN EXCLUDED.phone ELSE subjects.phone END,
                display_name = CASE WHEN subjects.status = 'not_started' THEN EXCLUDED.display_name ELSE subjects.display_name END,
                status = 'in_progress',
                active_pass_id = EXCLUDED.active_pass_id,
                updated_at = EXCLUDED.updated_at
            WHERE (subjects.status <> 'in_progress' OR subjects.updated_at < $8)
              AND ($7 OR subjects.status <> 'completed')
            RETURNING subject_id
            "#,
        )
        .bind(subject_id)
        .bind(&attributes.email)
        .bind(&attributes.phone)
        .bind(&attributes.display_name)
        .bind(token.pass_id)
        .bind(token.started_at)
        .bind(force)
        .bind(stale_cutoff)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to begin pass for subject {}", subject_id))?;

        if claimed.is_some() {
            tracing::debug!("Pass {} started for subject {}", token.pass_id, subject_id);
            return Ok(PassStart::Started(token));
        }

        match self.get_subject_status(subject_id).await? {
            Some(EnrichmentStatus::Completed) => Ok(PassStart::AlreadyCompleted),
            _ => Ok(PassStart::AlreadyRunning),
        }
    }

    async fn commit_pass(
        &self,
        token: &PassToken,
        report: &EnrichmentReport,
        audit: &[LookupAudit],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let updated = sqlx::query(
            r#"
            UPDATE subjects
            SET status = 'completed',
                last_score = $3,
                last_risk_level = $4,
                active_pass_id = NULL,
                updated_at = now()
            WHERE subject_id = $1 AND active_pass_id = $2
            "#,
        )
        .bind(&token.subject_id)
        .bind(token.pass_id)
        .bind(report.assessment.score)
        .bind(report.assessment.level.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to complete subject")?;

        if updated.rows_affected() == 0 {
            return Err(AppError::BadRequest(format!(
                "Pass {} is not the active pass for subject {}",
                token.pass_id, token.subject_id
            )));
        }

        let profile = &report.profile;
        sqlx::query(
            r#"
            INSERT INTO enrichment_profiles (
                profile_id, subject_id, input, phone_validation, email_validation,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(profile.profile_id)
        .bind(&profile.subject_id)
        .bind(serde_json::to_value(&profile.input)?)
        .bind(report.phone.as_ref().map(serde_json::to_value).transpose()?)
        .bind(report.email.as_ref().map(serde_json::to_value).transpose()?)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert enrichment profile")?;

        for account in &report.accounts {
            sqlx::query(
                r#"
                INSERT INTO discovered_accounts (
                    account_id, profile_id, source, username, profile_url, display_name,
                    bio, followers, following, verified, payload, confidence
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(account.account_id)
            .bind(profile.profile_id)
            .bind(&account.source)
            .bind(&account.username)
            .bind(&account.profile_url)
            .bind(&account.display_name)
            .bind(&account.bio)
            .bind(account.followers)
            .bind(account.following)
            .bind(account.verified)
            .bind(serde_json::to_value(&account.payload)?)
            .bind(account.confidence)
            .execute(&mut *tx)
            .await
            .context("Failed to insert discovered account")?;
        }

        for breach in &report.breaches {
            sqlx::query(
                r#"
                INSERT INTO breach_records (profile_id, breach_name, breach_date, data_classes, verified)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(profile.profile_id)
            .bind(&breach.name)
            .bind(breach.breach_date)
            .bind(breach.data_classes.iter().cloned().collect::<Vec<String>>())
            .bind(breach.verified)
            .execute(&mut *tx)
            .await
            .context("Failed to insert breach record")?;
        }

        for cluster in &report.clusters {
            sqlx::query(
                r#"
                INSERT INTO correlation_clusters (profile_id, rule, match_key, confidence, members)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(profile.profile_id)
            .bind(cluster.rule.as_str())
            .bind(&cluster.match_key)
            .bind(cluster.confidence)
            .bind(&cluster.members)
            .execute(&mut *tx)
            .await
            .context("Failed to insert correlation cluster")?;
        }

        let assessment = &report.assessment;
        sqlx::query(
            r#"
            INSERT INTO risk_assessments (profile_id, score, level, factors, recommendations)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(profile.profile_id)
        .bind(assessment.score)
        .bind(assessment.level.as_str())
        .bind(serde_json::to_value(&assessment.factors)?)
        .bind(&assessment.recommendations)
        .execute(&mut *tx)
        .await
        .context("Failed to insert risk assessment")?;

        for entry in audit {
            sqlx::query(
                r#"
                INSERT INTO lookup_audit (
                    subject_id, pass_id, adapter, query_value, outcome, result_count,
                    detail, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&entry.subject_id)
            .bind(token.pass_id)
            .bind(&entry.adapter)
            .bind(&entry.query_value)
            .bind(entry.outcome.as_str())
            .bind(entry.result_count as i32)
            .bind(&entry.detail)
            .bind(entry.recorded_at)
            .execute(&mut *tx)
            .await
            .context("Failed to append lookup audit")?;
        }

        tx.commit().await.context("Failed to commit enrichment pass")?;

        tracing::info!(
            "Stored pass {} for subject {} (profile {}, {} accounts, {} breaches, {} clusters)",
            token.pass_id,
            token.subject_id,
            profile.profile_id,
            report.accounts.len(),
            report.breaches.len(),
            report.clusters.len()
        );
        Ok(())
    }

    async fn abort_pass(&self, token: &PassToken, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subjects
            SET status = 'failed', active_pass_id = NULL, updated_at = now()
            WHERE subject_id = $1 AND active_pass_id = $2
            "#,
        )
        .bind(&token.subject_id)
        .bind(token.pass_id)
        .execute(&self.pool)
        .await
        .context("Failed to abort pass")?;

        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest(format!(
                "Pass {} is not the active pass for subject {}",
                token.pass_id, token.subject_id
            )));
        }

        tracing::warn!(
            "Aborted pass {} for subject {}: {}",
            token.pass_id,
            token.subject_id,
            reason
        );
        Ok(())
    }

    async fn get_profile(&self, subject_id: &str) -> Result<Option<EnrichmentReport>, AppError> {
        let profile_row: Option<(
            Uuid,
            serde_json::Value,
            Option<serde_json::Value>,
            Option<serde_json::Value>,
            DateTime<Utc>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT profile_id, input, phone_validation, email_validation, created_at, updated_at
            FROM enrichment_profiles
            WHERE subject_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let Some((profile_id, input, phone, email, created_at, updated_at)) = profile_row else {
            return Ok(None);
        };

        let account_rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT account_id, profile_id, source, username, profile_url, display_name, bio,
                   followers, following, verified, payload, confidence
            FROM discovered_accounts
            WHERE profile_id = $1
            ORDER BY source, username, account_id
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let breach_rows: Vec<(String, Option<NaiveDate>, Vec<String>, bool)> = sqlx::query_as(
            r#"
            SELECT breach_name, breach_date, data_classes, verified
            FROM breach_records
            WHERE profile_id = $1
            ORDER BY breach_name
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let cluster_rows: Vec<(String, String, f64, Vec<Uuid>)> = sqlx::query_as(
            r#"
            SELECT rule, match_key, confidence, members
            FROM correlation_clusters
            WHERE profile_id = $1
            ORDER BY id
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let assessment = self
            .assessment_for(profile_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalError(format!("Profile {} has no risk assessment", profile_id))
            })?;

        let accounts = account_rows
            .into_iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let breaches = breach_rows
            .into_iter()
            .map(|(name, breach_date, data_classes, verified)| BreachRecord {
                name,
                breach_date,
                data_classes: data_classes.into_iter().collect(),
                verified,
            })
            .collect();

        let clusters = cluster_rows
            .into_iter()
            .map(|(rule, match_key, confidence, members)| -> Result<_, AppError> {
                Ok(CorrelationCluster {
                    rule: parse_column::<CorrelationRule>(&rule)?,
                    match_key,
                    confidence,
                    members,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Some(EnrichmentReport {
            profile: EnrichmentProfile {
                profile_id,
                subject_id: subject_id.to_string(),
                input: serde_json::from_value(input)?,
                created_at,
                updated_at,
            },
            accounts,
            breaches,
            clusters,
            assessment,
            phone: phone
                .map(serde_json::from_value::<PhoneValidation>)
                .transpose()?,
            email: email
                .map(serde_json::from_value::<EmailValidation>)
                .transpose()?,
        }))
    }

    async fn get_risk_assessment(
        &self,
        subject_id: &str,
    ) -> Result<Option<RiskAssessment>, AppError> {
        let latest: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT profile_id
            FROM enrichment_profiles
            WHERE subject_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        match latest {
            Some((profile_id,)) => self.assessment_for(profile_id).await,
            None => Ok(None),
        }
    }

    async fn get_lookup_history(&self, subject_id: &str) -> Result<Vec<LookupAudit>, AppError> {
        let rows: Vec<(String, String, String, String, i32, Option<String>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT subject_id, adapter, query_value, outcome, result_count, detail, recorded_at
                FROM lookup_audit
                WHERE subject_id = $1
                ORDER BY recorded_at, id
                "#,
            )
            .bind(subject_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        rows.into_iter()
            .map(
                |(subject_id, adapter, query_value, outcome, result_count, detail, recorded_at)| -> Result<LookupAudit, AppError> {
                    Ok(LookupAudit {
                        subject_id,
                        adapter,
                        query_value,
                        outcome: parse_column::<LookupOutcome>(&outcome)?,
                        result_count: result_count.max(0) as usize,
                        detail,
                        recorded_at,
                    })
                },
            )
            .collect()
    }
}

impl PgEnrichmentStore {
    async fn assessment_for(&self, profile_id: Uuid) -> Result<Option<RiskAssessment>, AppError> {
        let row: Option<(f64, String, serde_json::Value, Vec<String>)> = sqlx::query_as(
            r#"
            SELECT score, level, factors, recommendations
            FROM risk_assessments
            WHERE profile_id = $1
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        row.map(|(score, level, factors, recommendations)| -> Result<_, AppError> {
            Ok(RiskAssessment {
                score,
                level: parse_column::<RiskLevel>(&level)?,
                factors: serde_json::from_value::<Vec<RiskFactor>>(factors)?,
                recommendations,
            })
        })
        .transpose()
    }
}
