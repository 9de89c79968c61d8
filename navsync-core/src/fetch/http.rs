//! JSON-over-HTTP upstream source.
//!
//! One GET per key against a URL template, optionally one GET per batch
//! against a bulk template whose response is a JSON object keyed by key.
//! Retries, throttling and the circuit breaker live in the fetcher; this
//! type only maps HTTP outcomes onto `FetchError`.

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::collections::HashMap;
use tracing::debug;

use super::source::DataSource;
use crate::cache::Payload;
use crate::config::HttpSettings;
use crate::error::{ConfigError, FetchError};

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub struct HttpSource {
    name: String,
    client: Client,
    url_template: String,
    bulk_url_template: Option<String>,
    limiter: Option<String>,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, settings: &HttpSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::invalid("sources.http", format!("build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            client,
            url_template: settings.url_template.clone(),
            bulk_url_template: settings.bulk_url_template.clone(),
            limiter: settings.limiter.clone(),
        })
    }

    fn key_url(&self, key: &str) -> String {
        self.url_template.replace("{key}", &urlencoding::encode(key))
    }

    fn bulk_url(&self, template: &str, keys: &[String]) -> String {
        let joined = keys
            .iter()
            .map(|k| urlencoding::encode(k))
            .collect::<Vec<_>>()
            .join(",");
        template.replace("{keys}", &joined)
    }

    fn get(&self, url: &str, key: &str) -> Result<Response, FetchError> {
        debug!(source = %self.name, url, "GET");
        let resp = self.client.get(url).send().map_err(map_transport_error)?;
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        match classify_status(resp.status(), retry_after.as_deref(), key) {
            Some(err) => Err(err),
            None => Ok(resp),
        }
    }
}

impl DataSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, key: &str) -> Result<Payload, FetchError> {
        let resp = self.get(&self.key_url(key), key)?;
        resp.json::<Payload>()
            .map_err(|e| FetchError::ResponseFormat(format!("invalid JSON for {key}: {e}")))
    }

    fn supports_bulk(&self) -> bool {
        self.bulk_url_template.is_some()
    }

    fn fetch_many(&self, keys: &[String]) -> Result<HashMap<String, Payload>, FetchError> {
        let template = self
            .bulk_url_template
            .as_deref()
            .ok_or_else(|| FetchError::Other(format!("source '{}' has no bulk endpoint", self.name)))?;
        let resp = self.get(&self.bulk_url(template, keys), "<bulk>")?;
        resp.json::<HashMap<String, Payload>>()
            .map_err(|e| FetchError::ResponseFormat(format!("bulk response is not a key map: {e}")))
    }

    fn limiter(&self) -> Option<&str> {
        self.limiter.as_deref()
    }
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
fn classify_status(status: StatusCode, retry_after: Option<&str>, key: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::FORBIDDEN => FetchError::Blocked,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        StatusCode::NOT_FOUND => FetchError::NotFound {
            key: key.to_string(),
        },
        other => FetchError::Other(format!("HTTP {other} for {key}")),
    })
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_connect() || e.is_timeout() {
        FetchError::NetworkUnreachable(e.to_string())
    } else {
        FetchError::Other(e.to_string())
    }
}
