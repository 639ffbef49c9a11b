use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Subject ============

/// Enrichment lifecycle of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::NotStarted => "not_started",
            EnrichmentStatus::InProgress => "in_progress",
            EnrichmentStatus::Completed => "completed",
            EnrichmentStatus::Failed => "failed",
        }
    }
}

impl FromStr for EnrichmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(EnrichmentStatus::NotStarted),
            "in_progress" => Ok(EnrichmentStatus::InProgress),
            "completed" => Ok(EnrichmentStatus::Completed),
            "failed" => Ok(EnrichmentStatus::Failed),
            other => Err(format!("unknown enrichment status '{}'", other)),
        }
    }
}

/// Identity attributes known for a subject. Also the input snapshot of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttributes {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub display_name: Option<String>,
}

impl IdentityAttributes {
    /// Trims every attribute and drops the empty ones.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            email: clean(self.email).map(|e| e.to_lowercase()),
            phone: clean(self.phone),
            display_name: clean(self.display_name),
        }
    }

    pub fn is_queryable(&self) -> bool {
        self.email.is_some() || self.phone.is_some() || self.display_name.is_some()
    }
}

/// The entity being enriched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: String,
    #[serde(flatten)]
    pub attributes: IdentityAttributes,
    pub status: EnrichmentStatus,
    pub last_score: Option<f64>,
    pub last_risk_level: Option<RiskLevel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    pub fn new(subject_id: impl Into<String>, attributes: IdentityAttributes) -> Self {
        let now = Utc::now();
        Self {
            subject_id: subject_id.into(),
            attributes,
            status: EnrichmentStatus::NotStarted,
            last_score: None,
            last_risk_level: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Handle for one in-flight enrichment pass, issued by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassToken {
    pub pass_id: Uuid,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
}

impl PassToken {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            pass_id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            started_at: Utc::now(),
        }
    }
}

// ============ Enrichment records ============

/// One completed enrichment pass. A later pass writes a new profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentProfile {
    pub profile_id: Uuid,
    pub subject_id: String,
    pub input: IdentityAttributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Adapter-specific raw data attached to a discovered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountPayload {
    /// Result of a social profile existence probe.
    SocialProbe {
        platform: String,
        http_status: u16,
        final_url: String,
    },
    /// Pass-through for data that has no typed shape.
    Opaque {
        adapter: String,
        data: serde_json::Value,
    },
}

/// A candidate external account found by one adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredAccount {
    pub account_id: Uuid,
    pub profile_id: Option<Uuid>,
    /// Platform or source name, e.g. "github".
    pub source: String,
    pub username: String,
    pub profile_url: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub verified: bool,
    pub payload: AccountPayload,
    /// Adapter-assigned discovery confidence in [0, 1].
    pub confidence: f64,
}

/// One breach a profile's email appears in. Unique by `name` within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachRecord {
    pub name: String,
    pub breach_date: Option<NaiveDate>,
    pub data_classes: BTreeSet<String>,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationRule {
    UsernameSimilarity,
    DisplayNameMatch,
}

impl CorrelationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationRule::UsernameSimilarity => "username_similarity",
            CorrelationRule::DisplayNameMatch => "display_name_match",
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            CorrelationRule::UsernameSimilarity => 0.9,
            CorrelationRule::DisplayNameMatch => 0.8,
        }
    }
}

impl FromStr for CorrelationRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "username_similarity" => Ok(CorrelationRule::UsernameSimilarity),
            "display_name_match" => Ok(CorrelationRule::DisplayNameMatch),
            other => Err(format!("unknown correlation rule '{}'", other)),
        }
    }
}

/// Two or more accounts judged to denote the same actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCluster {
    pub rule: CorrelationRule,
    /// The normalized value the members share.
    pub match_key: String,
    pub confidence: f64,
    /// Member account ids, sorted.
    pub members: Vec<Uuid>,
}

// ============ Risk ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(RiskLevel::Minimal),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

/// Tags for the signals that contributed to a score, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    SocialPresence,
    SocialFootprint,
    DataBreaches,
    DisposableEmail,
    SuspiciousEmail,
    InvalidPhone,
    VoipPhone,
    UnknownPhoneType,
    ExcessiveBreaches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

// ============ Validation findings ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneLineType {
    Mobile,
    Landline,
    Voip,
    TollFree,
    Premium,
    Unknown,
}

/// Structured view of a phone number produced by the phone adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneValidation {
    pub input: String,
    pub valid: bool,
    pub e164: Option<String>,
    pub country_code: Option<u16>,
    pub national_number: Option<String>,
    /// ISO region, e.g. "US".
    pub region: Option<String>,
    pub line_type: PhoneLineType,
    pub carrier: Option<String>,
    pub location: Option<String>,
    /// Correction hint for numbers that failed to parse.
    pub suggestion: Option<String>,
}

impl PhoneValidation {
    /// Stand-in for a number the phone adapter rejected as malformed.
    pub fn unparsed(input: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            input: input.into(),
            valid: false,
            e164: None,
            country_code: None,
            national_number: None,
            region: None,
            line_type: PhoneLineType::Unknown,
            carrier: None,
            location: None,
            suggestion,
        }
    }

    pub fn has_known_carrier(&self) -> bool {
        self.carrier.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    pub fn has_resolvable_geography(&self) -> bool {
        self.region.is_some() || self.location.as_deref().is_some_and(|l| !l.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", content = "provider", rename_all = "snake_case")]
pub enum ProviderClass {
    FreeMail(String),
    Disposable,
    CustomDomain,
}

/// Deterministic patterns in an email local-part that mark it as low-trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousPattern {
    ConsecutiveSeparators,
    AllDigits,
    TooLong,
    TooShort,
    HighEntropy,
}

/// Email and domain findings produced by the domain adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailValidation {
    pub email: String,
    pub domain: String,
    pub valid_format: bool,
    pub provider: ProviderClass,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
    pub registrar: Option<String>,
    pub domain_created: Option<NaiveDate>,
}

impl EmailValidation {
    pub fn is_disposable(&self) -> bool {
        self.provider == ProviderClass::Disposable
    }

    pub fn is_suspicious(&self) -> bool {
        !self.suspicious_patterns.is_empty()
    }
}

// ============ Adapter plumbing ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Breach,
    Social,
    Phone,
    Domain,
}

/// A normalized lookup key handed to an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AdapterQuery {
    Email(String),
    Phone(String),
    Username(String),
}

impl AdapterQuery {
    pub fn value(&self) -> &str {
        match self {
            AdapterQuery::Email(v) | AdapterQuery::Phone(v) | AdapterQuery::Username(v) => v,
        }
    }
}

/// What a successful adapter call returns. Zero findings is a valid result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Findings {
    Breaches(Vec<BreachRecord>),
    Accounts(Vec<DiscoveredAccount>),
    Phone(PhoneValidation),
    Email(EmailValidation),
}

impl Findings {
    pub fn result_count(&self) -> usize {
        match self {
            Findings::Breaches(b) => b.len(),
            Findings::Accounts(a) => a.len(),
            Findings::Phone(_) | Findings::Email(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupOutcome {
    Success,
    Empty,
    Timeout,
    TransportError,
    MalformedInput,
    Unavailable,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Success => "success",
            LookupOutcome::Empty => "empty",
            LookupOutcome::Timeout => "timeout",
            LookupOutcome::TransportError => "transport_error",
            LookupOutcome::MalformedInput => "malformed_input",
            LookupOutcome::Unavailable => "unavailable",
        }
    }
}

impl FromStr for LookupOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LookupOutcome::Success),
            "empty" => Ok(LookupOutcome::Empty),
            "timeout" => Ok(LookupOutcome::Timeout),
            "transport_error" => Ok(LookupOutcome::TransportError),
            "malformed_input" => Ok(LookupOutcome::MalformedInput),
            "unavailable" => Ok(LookupOutcome::Unavailable),
            other => Err(format!("unknown lookup outcome '{}'", other)),
        }
    }
}

/// Append-only record of one adapter invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupAudit {
    pub subject_id: String,
    pub adapter: String,
    pub query_value: String,
    pub outcome: LookupOutcome,
    pub result_count: usize,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Everything one pass collected from its adapters, before correlation and scoring.
#[derive(Debug, Clone, Default)]
pub struct FindingsBundle {
    pub breaches: Vec<BreachRecord>,
    pub accounts: Vec<DiscoveredAccount>,
    pub phone: Option<PhoneValidation>,
    pub email: Option<EmailValidation>,
    pub audit: Vec<LookupAudit>,
}

impl FindingsBundle {
    /// Folds one adapter's findings in. Breaches stay unique by name.
    pub fn absorb(&mut self, findings: Findings) {
        match findings {
            Findings::Breaches(breaches) => {
                for breach in breaches {
                    match self.breaches.iter_mut().find(|b| b.name == breach.name) {
                        Some(existing) => {
                            existing.data_classes.extend(breach.data_classes);
                            existing.verified |= breach.verified;
                            if existing.breach_date.is_none() {
                                existing.breach_date = breach.breach_date;
                            }
                        }
                        None => self.breaches.push(breach),
                    }
                }
            }
            Findings::Accounts(accounts) => self.accounts.extend(accounts),
            Findings::Phone(phone) => self.phone = Some(phone),
            Findings::Email(email) => self.email = Some(email),
        }
    }

    /// Orders breaches and accounts so stored output does not depend on
    /// adapter completion order.
    pub fn sort(&mut self) {
        self.breaches.sort_by(|a, b| a.name.cmp(&b.name));
        self.accounts.sort_by(|a, b| {
            (a.source.as_str(), a.username.as_str(), a.account_id)
                .cmp(&(b.source.as_str(), b.username.as_str(), b.account_id))
        });
    }
}

/// The persisted result of one pass, also what read queries return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub profile: EnrichmentProfile,
    pub accounts: Vec<DiscoveredAccount>,
    pub breaches: Vec<BreachRecord>,
    pub clusters: Vec<CorrelationCluster>,
    pub assessment: RiskAssessment,
    pub phone: Option<PhoneValidation>,
    pub email: Option<EmailValidation>,
}

// ============ Orchestrator I/O ============

/// Input to one enrichment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub subject_id: String,
    #[serde(flatten)]
    pub attributes: IdentityAttributes,
    /// Re-run a subject whose last pass already completed.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Completed {
        profile_id: Uuid,
        assessment: RiskAssessment,
        accounts: usize,
        breaches: usize,
        clusters: usize,
        failed_lookups: usize,
    },
    AlreadyRunning,
    AlreadyCompleted,
    NoQueryableAttributes,
}

/// Immediate answer to a fire-and-forget trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Started,
    AlreadyRunning,
    AlreadyCompleted,
    SkippedNoAttributes,
}
