use async_trait::async_trait;
use phonenumber::country::Id as CountryId;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{build_http_client, unsupported, SourceAdapter};
use crate::config::Config;
use crate::errors::AdapterError;
use crate::models::{AdapterKind, AdapterQuery, Findings, PhoneLineType, PhoneValidation};
use crate::validation::{parse_phone, parse_region};

/// Response of a numverify-compatible validation endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhoneIntelResponse {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub line_type: Option<String>,
}

fn line_type_from_label(label: &str) -> PhoneLineType {
    match label.trim().to_lowercase().replace('-', "_").as_str() {
        "mobile" | "cell" => PhoneLineType::Mobile,
        "landline" | "fixed_line" => PhoneLineType::Landline,
        "voip" => PhoneLineType::Voip,
        "toll_free" => PhoneLineType::TollFree,
        "premium_rate" | "premium" => PhoneLineType::Premium,
        _ => PhoneLineType::Unknown,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Phone intelligence: offline parse, then an optional online carrier/geo lookup.
pub struct PhoneAdapter {
    client: Client,
    default_region: Option<CountryId>,
    intel_base_url: Option<String>,
    intel_api_key: Option<String>,
}

impl PhoneAdapter {
    pub fn new(
        default_region: Option<CountryId>,
        intel_base_url: Option<String>,
        intel_api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            default_region,
            intel_base_url: intel_base_url.map(|u| u.trim_end_matches('/').to_string()),
            intel_api_key,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AdapterError> {
        Self::new(
            parse_region(&config.default_phone_region),
            config.phone_intel_base_url.clone(),
            config.phone_intel_api_key.clone(),
            config.phone_timeout(),
        )
    }

    /// Online lookup of an E.164 number. Any failure yields `None`.
    async fn lookup_intel(&self, e164: &str) -> Option<PhoneIntelResponse> {
        let base_url = self.intel_base_url.as_ref()?;
        let url = format!("{}/validate", base_url);
        let number = e164.trim_start_matches('+');

        let mut request = self.client.get(&url).query(&[("number", number)]);
        if let Some(ref key) = self.intel_api_key {
            request = request.query(&[("access_key", key.as_str())]);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Phone intelligence request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("Phone intelligence returned status {}", response.status());
            return None;
        }

        match response.json::<PhoneIntelResponse>().await {
            Ok(intel) => Some(intel),
            Err(e) => {
                tracing::warn!("Failed to parse phone intelligence response: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for PhoneAdapter {
    fn name(&self) -> &str {
        "phone"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Phone
    }

    fn accepts(&self, query: &AdapterQuery) -> bool {
        matches!(query, AdapterQuery::Phone(_))
    }

    async fn probe(&self, query: &AdapterQuery) -> Result<Findings, AdapterError> {
        let AdapterQuery::Phone(raw) = query else {
            return Err(unsupported(self.name(), query));
        };

        let parsed = parse_phone(raw, self.default_region).map_err(|rejection| {
            tracing::info!("Phone '{}' rejected: {}", raw, rejection.reason);
            AdapterError::MalformedInput {
                reason: rejection.reason,
                suggestion: rejection.suggestion,
            }
        })?;

        let mut validation = PhoneValidation {
            input: raw.clone(),
            valid: true,
            e164: Some(parsed.e164.clone()),
            country_code: Some(parsed.country_code),
            national_number: Some(parsed.national_number),
            region: parsed.region,
            line_type: parsed.line_type,
            carrier: None,
            location: None,
            suggestion: None,
        };

        if let Some(intel) = self.lookup_intel(&parsed.e164).await {
            if intel.valid {
                validation.carrier = non_empty(intel.carrier);
                validation.location = non_empty(intel.location);
                if validation.region.is_none() {
                    validation.region = non_empty(intel.country_code);
                }
                if validation.line_type == PhoneLineType::Unknown {
                    if let Some(label) = intel.line_type.as_deref() {
                        validation.line_type = line_type_from_label(label);
                    }
                }
            } else {
                tracing::debug!("Phone intelligence reports {} as invalid", parsed.e164);
            }
        }

        tracing::info!(
            "Phone {} parsed: {:?}, carrier known: {}",
            parsed.e164,
            validation.line_type,
            validation.has_known_carrier()
        );
        Ok(Findings::Phone(validation))
    }
}
