use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{build_http_client, unsupported, SourceAdapter};
use crate::cache_validator::ResponseCache;
use crate::config::Config;
use crate::errors::AdapterError;
use crate::models::{AdapterKind, AdapterQuery, BreachRecord, Findings};
use crate::validation::is_valid_email;

/// Breach entry as returned by a haveibeenpwned-compatible directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BreachDirectoryEntry {
    pub name: String,
    #[serde(default)]
    pub breach_date: Option<String>,
    #[serde(default)]
    pub data_classes: Vec<String>,
    #[serde(default)]
    pub is_verified: bool,
}

impl From<BreachDirectoryEntry> for BreachRecord {
    fn from(entry: BreachDirectoryEntry) -> Self {
        BreachRecord {
            name: entry.name,
            breach_date: entry
                .breach_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            data_classes: entry.data_classes.into_iter().collect(),
            verified: entry.is_verified,
        }
    }
}

/// Looks an email up in a breach directory.
pub struct BreachAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    cache: ResponseCache,
}

impl BreachAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        cache: ResponseCache,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            cache,
        })
    }

    pub fn from_config(config: &Config, cache: ResponseCache) -> Result<Self, AdapterError> {
        Self::new(
            config.breach_api_base_url.clone(),
            config.breach_api_key.clone(),
            config.breach_timeout(),
            cache,
        )
    }

    fn lookup_url(&self, email: &str) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&format!("{}/breachedaccount/", self.base_url))
            .map_err(|e| AdapterError::transport(format!("Failed to build URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AdapterError::transport("Breach API base URL cannot take a path"))?
            .pop_if_empty()
            .push(email);
        url.query_pairs_mut().append_pair("truncateResponse", "false");
        Ok(url)
    }

    /// Fetch raw breach JSON for `email`. A 404 is the directory saying "clean".
    async fn fetch(&self, email: &str) -> Result<String, AdapterError> {
        let cache_key = format!("breach:{}", email);
        if let Some(body) = self.cache.get(&cache_key).await {
            return Ok(body);
        }

        let url = self.lookup_url(email)?;
        tracing::debug!("Breach lookup: {}", url);

        let mut request = self.client.get(url);
        if let Some(ref key) = self.api_key {
            request = request.header("hibp-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::transport(format!("Breach API request failed: {}", e)))?;

        let status = response.status();
        let body = if status == StatusCode::NOT_FOUND {
            "[]".to_string()
        } else if status.is_success() {
            response.text().await.map_err(|e| {
                AdapterError::transport(format!("Failed to read breach API response: {}", e))
            })?
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("Breach API returned error {}: {}", status, error_text);
            return Err(AdapterError::transport(format!(
                "Breach API returned status {}",
                status
            )));
        };

        self.cache.insert(cache_key, body.clone()).await;
        Ok(body)
    }
}

#[async_trait]
impl SourceAdapter for BreachAdapter {
    fn name(&self) -> &str {
        "breach"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Breach
    }

    fn accepts(&self, query: &AdapterQuery) -> bool {
        matches!(query, AdapterQuery::Email(_))
    }

    async fn probe(&self, query: &AdapterQuery) -> Result<Findings, AdapterError> {
        let AdapterQuery::Email(email) = query else {
            return Err(unsupported(self.name(), query));
        };

        if !is_valid_email(email) {
            return Err(AdapterError::MalformedInput {
                reason: format!("'{}' is not a valid email address", email),
                suggestion: Some("Use the form name@domain.tld".to_string()),
            });
        }

        let body = self.fetch(email).await?;
        let entries: Vec<BreachDirectoryEntry> = serde_json::from_str(&body).map_err(|e| {
            AdapterError::transport(format!("Failed to parse breach API response: {}", e))
        })?;

        tracing::info!("Breach directory: {} breach(es) for {}", entries.len(), email);
        Ok(Findings::Breaches(
            entries.into_iter().map(BreachRecord::from).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_entry_conversion() {
        let entry: BreachDirectoryEntry = serde_json::from_value(serde_json::json!({
            "Name": "Adobe",
            "BreachDate": "2013-10-04",
            "DataClasses": ["Passwords", "Email addresses", "Passwords"],
            "IsVerified": true
        }))
        .unwrap();

        let record = BreachRecord::from(entry);
        assert_eq!(record.name, "Adobe");
        assert_eq!(record.breach_date, NaiveDate::from_ymd_opt(2013, 10, 4));
        assert_eq!(record.data_classes.len(), 2);
        assert!(record.verified);
    }

    #[test]
    fn test_lookup_url_keeps_email_in_single_segment() {
        let adapter = BreachAdapter::new(
            "https://breaches.example/api/v3/",
            None,
            Duration::from_secs(1),
            ResponseCache::default(),
        )
        .unwrap();

        let url = adapter.lookup_url("jane.doe@gmail.com").unwrap();
        assert_eq!(url.path(), "/api/v3/breachedaccount/jane.doe@gmail.com");
        assert_eq!(url.query(), Some("truncateResponse=false"));
    }
}
