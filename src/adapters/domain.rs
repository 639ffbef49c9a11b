//! Email domain intelligence: provider classification, local-part analysis,
//! and a best-effort RDAP registrar lookup for custom domains.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{build_http_client, unsupported, SourceAdapter};
use crate::cache_validator::ResponseCache;
use crate::config::Config;
use crate::errors::AdapterError;
use crate::models::{AdapterKind, AdapterQuery, EmailValidation, Findings, ProviderClass};
use crate::validation::{analyze_local_part, is_valid_email, split_email};

const FREE_MAIL_PROVIDERS: &[(&str, &str)] = &[
    ("gmail.com", "Gmail"),
    ("googlemail.com", "Gmail"),
    ("yahoo.com", "Yahoo"),
    ("yahoo.com.br", "Yahoo"),
    ("ymail.com", "Yahoo"),
    ("outlook.com", "Outlook"),
    ("hotmail.com", "Outlook"),
    ("live.com", "Outlook"),
    ("msn.com", "Outlook"),
    ("icloud.com", "iCloud"),
    ("me.com", "iCloud"),
    ("mac.com", "iCloud"),
    ("aol.com", "AOL"),
    ("protonmail.com", "Proton Mail"),
    ("proton.me", "Proton Mail"),
    ("pm.me", "Proton Mail"),
    ("gmx.com", "GMX"),
    ("gmx.de", "GMX"),
    ("yandex.com", "Yandex"),
    ("yandex.ru", "Yandex"),
    ("mail.ru", "Mail.ru"),
    ("zoho.com", "Zoho"),
    ("uol.com.br", "UOL"),
    ("bol.com.br", "BOL"),
    ("terra.com.br", "Terra"),
];

const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "discard.email",
    "dispostable.com",
    "emailondeck.com",
    "fakeinbox.com",
    "getnada.com",
    "guerrillamail.com",
    "guerrillamail.net",
    "maildrop.cc",
    "mailinator.com",
    "mailnesia.com",
    "mintemail.com",
    "mohmal.com",
    "sharklasers.com",
    "temp-mail.org",
    "tempail.com",
    "tempmail.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

/// Classify a lower-cased email domain.
pub fn classify_provider(domain: &str) -> ProviderClass {
    if let Some((_, name)) = FREE_MAIL_PROVIDERS.iter().find(|(d, _)| *d == domain) {
        return ProviderClass::FreeMail(name.to_string());
    }
    if DISPOSABLE_DOMAINS.contains(&domain) {
        return ProviderClass::Disposable;
    }
    ProviderClass::CustomDomain
}

#[derive(Debug, Default, Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEvent {
    event_action: String,
    event_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEntity {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    vcard_array: Option<serde_json::Value>,
}

/// Registrar name and registration date pulled from an RDAP domain object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationInfo {
    pub registrar: Option<String>,
    pub created: Option<NaiveDate>,
}

/// The `fn` property of a jCard: `["vcard", [["fn", {}, "text", "Name"], ...]]`.
fn vcard_full_name(vcard: &serde_json::Value) -> Option<String> {
    vcard
        .get(1)?
        .as_array()?
        .iter()
        .find(|prop| prop.get(0).and_then(|v| v.as_str()) == Some("fn"))
        .and_then(|prop| prop.get(3))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn parse_rdap(body: &str) -> Option<RegistrationInfo> {
    let domain: RdapDomain = serde_json::from_str(body).ok()?;

    let created = domain
        .events
        .iter()
        .find(|e| e.event_action.eq_ignore_ascii_case("registration"))
        .and_then(|e| DateTime::parse_from_rfc3339(&e.event_date).ok())
        .map(|dt| dt.date_naive());

    let registrar = domain
        .entities
        .iter()
        .filter(|e| e.roles.iter().any(|r| r == "registrar"))
        .find_map(|e| e.vcard_array.as_ref().and_then(vcard_full_name));

    Some(RegistrationInfo { registrar, created })
}

pub struct DomainAdapter {
    client: Client,
    rdap_base_url: String,
    cache: ResponseCache,
}

impl DomainAdapter {
    pub fn new(
        rdap_base_url: impl Into<String>,
        timeout: Duration,
        cache: ResponseCache,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            rdap_base_url: rdap_base_url.into().trim_end_matches('/').to_string(),
            cache,
        })
    }

    pub fn from_config(config: &Config, cache: ResponseCache) -> Result<Self, AdapterError> {
        Self::new(config.rdap_base_url.clone(), config.domain_timeout(), cache)
    }

    /// Registrar lookup. Absent or unreadable registration data is an empty result.
    async fn registration(&self, domain: &str) -> RegistrationInfo {
        let cache_key = format!("rdap:{}", domain);
        let body = match self.cache.get(&cache_key).await {
            Some(body) => body,
            None => {
                let url = format!("{}/domain/{}", self.rdap_base_url, domain);
                tracing::debug!("RDAP lookup: {}", url);

                let response = match self.client.get(&url).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("RDAP request for {} failed: {}", domain, e);
                        return RegistrationInfo::default();
                    }
                };
                if !response.status().is_success() {
                    tracing::debug!("RDAP returned {} for {}", response.status(), domain);
                    return RegistrationInfo::default();
                }
                match response.text().await {
                    Ok(body) => {
                        self.cache.insert(cache_key, body.clone()).await;
                        body
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read RDAP response for {}: {}", domain, e);
                        return RegistrationInfo::default();
                    }
                }
            }
        };

        parse_rdap(&body).unwrap_or_default()
    }
}

#[async_trait]
impl SourceAdapter for DomainAdapter {
    fn name(&self) -> &str {
        "domain"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Domain
    }

    fn accepts(&self, query: &AdapterQuery) -> bool {
        matches!(query, AdapterQuery::Email(_))
    }

    async fn probe(&self, query: &AdapterQuery) -> Result<Findings, AdapterError> {
        let AdapterQuery::Email(email) = query else {
            return Err(unsupported(self.name(), query));
        };

        let Some((local, domain)) = split_email(email).filter(|_| is_valid_email(email)) else {
            return Err(AdapterError::MalformedInput {
                reason: format!("'{}' is not a valid email address", email),
                suggestion: Some("Use the form name@domain.tld".to_string()),
            });
        };

        let provider = classify_provider(&domain);
        let suspicious_patterns = analyze_local_part(local);

        let registration = if provider == ProviderClass::CustomDomain {
            self.registration(&domain).await
        } else {
            RegistrationInfo::default()
        };

        tracing::info!(
            "Domain {}: {:?}, {} suspicious pattern(s)",
            domain,
            provider,
            suspicious_patterns.len()
        );

        Ok(Findings::Email(EmailValidation {
            email: email.clone(),
            domain,
            valid_format: true,
            provider,
            suspicious_patterns,
            registrar: registration.registrar,
            domain_created: registration.created,
        }))
    }
}
