//! Source adapters: one lookup unit per intelligence source.
//!
//! Adapters read external sources and return typed findings. They never
//! write to the store, and "not found" is always an empty success.

pub mod breach;
pub mod domain;
pub mod phone;
pub mod social;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::AdapterError;
use crate::models::{AdapterKind, AdapterQuery, Findings};

pub use breach::BreachAdapter;
pub use domain::DomainAdapter;
pub use phone::PhoneAdapter;
pub use social::{SocialExistenceAdapter, SocialPlatform};

const USER_AGENT: &str = concat!("rust-subject-enrichment/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    /// Name used in logs and the lookup audit, e.g. `"breach"` or `"social:github"`.
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Whether this adapter can do anything with `query`.
    fn accepts(&self, query: &AdapterQuery) -> bool;

    /// Look `query` up. Must not fail on "not found".
    async fn probe(&self, query: &AdapterQuery) -> Result<Findings, AdapterError>;
}

/// Shared HTTP client builder: request timeout plus a descriptive user agent.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| AdapterError::transport(format!("Failed to create HTTP client: {}", e)))
}

/// Rejects queries an adapter was handed by mistake.
pub(crate) fn unsupported(adapter: &str, query: &AdapterQuery) -> AdapterError {
    AdapterError::MalformedInput {
        reason: format!("{} cannot look up {:?}", adapter, query),
        suggestion: None,
    }
}
