//! Social-platform existence probe.
//!
//! Existence is decided by HTTP status plus a per-platform "not found" text
//! marker, never by parsing the page. Misclassification in both directions
//! is expected and reflected in the fixed discovery confidence.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::sync::LazyLock;
use std::time::Duration;
use uuid::Uuid;

use super::{build_http_client, unsupported, SourceAdapter};
use crate::errors::AdapterError;
use crate::models::{AccountPayload, AdapterKind, AdapterQuery, DiscoveredAccount, Findings};
use crate::validation::is_valid_username;

/// Confidence assigned to every account found by the existence heuristic.
pub const EXISTENCE_CONFIDENCE: f64 = 0.8;

/// Bodies larger than this are truncated before marker matching.
const MAX_BODY_BYTES: usize = 512 * 1024;

static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]+(?:property|name)=["']og:title["'][^>]*content=["']([^"']*)["']"#)
        .expect("og:title regex is valid")
});

static OG_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<meta[^>]+(?:property|name)=["'](?:og:)?description["'][^>]*content=["']([^"']*)["']"#,
    )
    .expect("og:description regex is valid")
});

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]*)</title>").expect("title regex is valid"));

/// One platform the probe knows how to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialPlatform {
    pub name: String,
    /// Profile URL with a `{username}` placeholder.
    pub url_template: String,
    /// Case-insensitive texts whose presence means "no such profile".
    pub not_found_markers: Vec<String>,
}

impl SocialPlatform {
    pub fn new(name: &str, url_template: &str, markers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            url_template: url_template.to_string(),
            not_found_markers: markers.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn profile_url(&self, username: &str) -> String {
        self.url_template.replace("{username}", username)
    }

    /// True when the page body carries one of the platform's not-found markers.
    pub fn reports_missing(&self, body: &str) -> bool {
        let lower = body.to_lowercase();
        self.not_found_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
    }
}

/// The fixed platform list probed for every username candidate.
pub fn default_platforms() -> Vec<SocialPlatform> {
    vec![
        SocialPlatform::new("github", "https://github.com/{username}", &["Page not found"]),
        SocialPlatform::new("gitlab", "https://gitlab.com/{username}", &["Page Not Found"]),
        SocialPlatform::new(
            "reddit",
            "https://www.reddit.com/user/{username}",
            &["Sorry, nobody on Reddit goes by that name", "page not found"],
        ),
        SocialPlatform::new(
            "twitter",
            "https://x.com/{username}",
            &["This account doesn’t exist", "This account doesn't exist"],
        ),
        SocialPlatform::new(
            "instagram",
            "https://www.instagram.com/{username}/",
            &["Sorry, this page isn't available", "Page Not Found"],
        ),
        SocialPlatform::new(
            "tiktok",
            "https://www.tiktok.com/@{username}",
            &["Couldn't find this account"],
        ),
        SocialPlatform::new(
            "medium",
            "https://medium.com/@{username}",
            &["Out of nothing, something", "PAGE NOT FOUND"],
        ),
        SocialPlatform::new(
            "pinterest",
            "https://www.pinterest.com/{username}/",
            &["User not found", "Sorry! We couldn't find that page"],
        ),
        SocialPlatform::new("keybase", "https://keybase.io/{username}", &["User not found"]),
        SocialPlatform::new("devto", "https://dev.to/{username}", &["This page does not exist"]),
    ]
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Best-effort display name from the page's og:title or `<title>`.
///
/// Platform suffixes like `" · GitHub"` or `" (@handle)"` are cut off.
pub fn extract_display_name(body: &str) -> Option<String> {
    let raw = OG_TITLE
        .captures(body)
        .or_else(|| TITLE.captures(body))
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))?;

    let cut = [" (", " · ", " | ", " - ", " • "]
        .iter()
        .filter_map(|sep| raw.find(sep))
        .min()
        .unwrap_or(raw.len());

    let name = raw[..cut].trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

pub fn extract_bio(body: &str) -> Option<String> {
    OG_DESCRIPTION
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|b| !b.is_empty())
}

/// Probes one platform for a username.
pub struct SocialExistenceAdapter {
    client: Client,
    platform: SocialPlatform,
    name: String,
}

impl SocialExistenceAdapter {
    pub fn new(platform: SocialPlatform, timeout: Duration) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            name: format!("social:{}", platform.name),
            platform,
        })
    }

    pub fn platform(&self) -> &SocialPlatform {
        &self.platform
    }

    fn account(&self, username: &str, url: String, status: StatusCode, final_url: String, body: &str) -> DiscoveredAccount {
        DiscoveredAccount {
            account_id: Uuid::new_v4(),
            profile_id: None,
            source: self.platform.name.clone(),
            username: username.to_string(),
            profile_url: url,
            display_name: extract_display_name(body),
            bio: extract_bio(body),
            followers: None,
            following: None,
            verified: false,
            payload: AccountPayload::SocialProbe {
                platform: self.platform.name.clone(),
                http_status: status.as_u16(),
                final_url,
            },
            confidence: EXISTENCE_CONFIDENCE,
        }
    }
}

#[async_trait]
impl SourceAdapter for SocialExistenceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Social
    }

    fn accepts(&self, query: &AdapterQuery) -> bool {
        matches!(query, AdapterQuery::Username(_))
    }

    async fn probe(&self, query: &AdapterQuery) -> Result<Findings, AdapterError> {
        let AdapterQuery::Username(username) = query else {
            return Err(unsupported(&self.name, query));
        };

        if !is_valid_username(username) {
            return Err(AdapterError::MalformedInput {
                reason: format!("'{}' is not a probeable username", username),
                suggestion: Some("Use 2-40 letters, digits, '.', '_' or '-'".to_string()),
            });
        }

        let url = self.platform.profile_url(username);
        tracing::debug!("Probing {} for '{}': {}", self.platform.name, username, url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AdapterError::transport(format!("{} request failed: {}", self.platform.name, e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            tracing::debug!("{}: no profile '{}' (HTTP {})", self.platform.name, username, status);
            return Ok(Findings::Accounts(Vec::new()));
        }

        if !status.is_success() {
            return Err(AdapterError::transport(format!(
                "{} returned status {}",
                self.platform.name, status
            )));
        }

        let final_url = response.url().to_string();
        let mut body = response.text().await.map_err(|e| {
            AdapterError::transport(format!("Failed to read {} page: {}", self.platform.name, e))
        })?;
        if body.len() > MAX_BODY_BYTES {
            let mut end = MAX_BODY_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        if self.platform.reports_missing(&body) {
            tracing::debug!("{}: not-found marker for '{}'", self.platform.name, username);
            return Ok(Findings::Accounts(Vec::new()));
        }

        tracing::info!("{}: found profile '{}'", self.platform.name, username);
        Ok(Findings::Accounts(vec![self.account(
            username, url, status, final_url, &body,
        )]))
    }
}
