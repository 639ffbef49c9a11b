use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres URL; only the HTTP server needs it.
    pub database_url: Option<String>,
    pub port: u16,
    pub breach_api_base_url: String,
    pub breach_api_key: Option<String>,
    pub rdap_base_url: String,
    pub phone_intel_base_url: Option<String>,
    pub phone_intel_api_key: Option<String>,
    /// ISO region used for numbers written without a country code.
    pub default_phone_region: String,
    pub breach_timeout_secs: u64,
    pub social_timeout_secs: u64,
    pub phone_timeout_secs: u64,
    pub domain_timeout_secs: u64,
    /// Added to the longest adapter budget to form the pass deadline.
    pub pipeline_margin_secs: u64,
    /// Upper bound on concurrent adapter calls within one pass.
    pub worker_pool_size: usize,
    /// Upper bound on passes running in the background at once.
    pub max_concurrent_passes: usize,
    pub single_flight_ttl_secs: u64,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url(name: &str, value: String) -> anyhow::Result<String> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_number<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    env_or(name, default)
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid positive number", name))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: optional_env("DB_URL")
                .or_else(|| optional_env("DATABASE_URL"))
                .map(|url| {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })
                .transpose()?,
            port: env_or("PORT", "3000")
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            breach_api_base_url: http_url(
                "BREACH_API_BASE_URL",
                env_or("BREACH_API_BASE_URL", "https://haveibeenpwned.com/api/v3"),
            )?,
            breach_api_key: optional_env("BREACH_API_KEY"),
            rdap_base_url: http_url("RDAP_BASE_URL", env_or("RDAP_BASE_URL", "https://rdap.org"))?,
            phone_intel_base_url: optional_env("PHONE_INTEL_BASE_URL")
                .map(|url| http_url("PHONE_INTEL_BASE_URL", url))
                .transpose()?,
            phone_intel_api_key: optional_env("PHONE_INTEL_API_KEY"),
            default_phone_region: env_or("DEFAULT_PHONE_REGION", "US").to_uppercase(),
            breach_timeout_secs: parse_number("BREACH_TIMEOUT_SECS", "10")?,
            social_timeout_secs: parse_number("SOCIAL_TIMEOUT_SECS", "5")?,
            phone_timeout_secs: parse_number("PHONE_TIMEOUT_SECS", "5")?,
            domain_timeout_secs: parse_number("DOMAIN_TIMEOUT_SECS", "8")?,
            pipeline_margin_secs: parse_number("PIPELINE_MARGIN_SECS", "2")?,
            worker_pool_size: parse_number("ENRICH_WORKER_POOL", "16")?,
            max_concurrent_passes: parse_number("ENRICH_MAX_PASSES", "8")?,
            single_flight_ttl_secs: parse_number("SINGLE_FLIGHT_TTL_SECS", "300")?,
        };

        if config.worker_pool_size == 0 || config.max_concurrent_passes == 0 {
            anyhow::bail!("ENRICH_WORKER_POOL and ENRICH_MAX_PASSES must be at least 1");
        }

        if crate::validation::parse_region(&config.default_phone_region).is_none() {
            anyhow::bail!(
                "DEFAULT_PHONE_REGION '{}' is not a known ISO region",
                config.default_phone_region
            );
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if let Some(ref url) = config.database_url {
            tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]);
        }
        tracing::debug!("Breach API: {}", config.breach_api_base_url);
        tracing::debug!("RDAP: {}", config.rdap_base_url);
        if let Some(ref url) = config.phone_intel_base_url {
            tracing::info!("Phone intelligence lookup configured: {}", url);
        }
        tracing::debug!(
            "Worker pool: {}, max passes: {}",
            config.worker_pool_size,
            config.max_concurrent_passes
        );

        Ok(config)
    }

    pub fn breach_timeout(&self) -> Duration {
        Duration::from_secs(self.breach_timeout_secs)
    }

    pub fn social_timeout(&self) -> Duration {
        Duration::from_secs(self.social_timeout_secs)
    }

    pub fn phone_timeout(&self) -> Duration {
        Duration::from_secs(self.phone_timeout_secs)
    }

    pub fn domain_timeout(&self) -> Duration {
        Duration::from_secs(self.domain_timeout_secs)
    }

    pub fn pipeline_margin(&self) -> Duration {
        Duration::from_secs(self.pipeline_margin_secs)
    }

    pub fn single_flight_ttl(&self) -> Duration {
        Duration::from_secs(self.single_flight_ttl_secs)
    }
}

impl Default for Config {
    /// Public endpoints and default budgets, no database.
    fn default() -> Self {
        Self {
            database_url: None,
            port: 3000,
            breach_api_base_url: "https://haveibeenpwned.com/api/v3".to_string(),
            breach_api_key: None,
            rdap_base_url: "https://rdap.org".to_string(),
            phone_intel_base_url: None,
            phone_intel_api_key: None,
            default_phone_region: "US".to_string(),
            breach_timeout_secs: 10,
            social_timeout_secs: 5,
            phone_timeout_secs: 5,
            domain_timeout_secs: 8,
            pipeline_margin_secs: 2,
            worker_pool_size: 16,
            max_concurrent_passes: 8,
            single_flight_ttl_secs: 300,
        }
    }
}
