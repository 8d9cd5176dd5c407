use crate::error::LotwError;
use crate::lotw::config::{Credentials, LotwServiceConfig, load_credentials};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::cell::OnceCell;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("lotw-dxcc/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Every QSO since the configured begin date.
    Full,
    /// QSOs received by LoTW after `since`.
    IncrementalQso,
    /// Confirmations received after `since`.
    IncrementalQsl,
}

impl FetchMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::IncrementalQso => "qso",
            Self::IncrementalQsl => "qsl",
        }
    }
}

/// Source of raw report text. `since` is already in query format.
pub trait LogFetcher {
    fn fetch(&self, since: Option<&str>, mode: FetchMode) -> Result<String>;
}

pub fn query_params(
    credentials: &Credentials,
    mode: FetchMode,
    since: &str,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("login", credentials.username.clone()),
        ("password", credentials.password.clone()),
        ("qso_query", "1".to_string()),
        ("qso_qsldetail", "yes".to_string()),
        ("qso_mydetail", "yes".to_string()),
    ];
    match mode {
        FetchMode::Full | FetchMode::IncrementalQso => {
            params.push(("qso_qsl", "no".to_string()));
            params.push(("qso_qsorxsince", since.to_string()));
        }
        FetchMode::IncrementalQsl => {
            params.push(("qso_qsl", "yes".to_string()));
            params.push(("qso_qslsince", since.to_string()));
        }
    }
    params
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

pub struct LotwClient {
    client: Client,
    url: String,
    credentials: Credentials,
    qso_begin_date: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl LotwClient {
    pub fn new(cfg: &LotwServiceConfig, credentials: Credentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/plain"));
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.query_timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to build LoTW HTTP client")?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            credentials,
            qso_begin_date: cfg.qso_begin_date.clone(),
            max_retries: cfg.max_retries.max(1),
            retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        })
    }
}

impl LogFetcher for LotwClient {
    fn fetch(&self, since: Option<&str>, mode: FetchMode) -> Result<String> {
        let since = since.unwrap_or(&self.qso_begin_date);
        let params = query_params(&self.credentials, mode, since);
        info!(mode = mode.label(), since, "querying LoTW");

        let mut last_failure = String::new();
        for attempt in 1..=self.max_retries {
            match self.client.get(&self.url).query(&params).send() {
                Ok(response) if response.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    last_failure = format!("status {}", response.status());
                }
                Ok(response) if !response.status().is_success() => {
                    anyhow::bail!("LoTW query failed with status {}", response.status());
                }
                Ok(response) => {
                    let body = response
                        .text()
                        .context("failed to read LoTW response body")?;
                    debug!(bytes = body.len(), attempt, "LoTW response received");
                    return Ok(body);
                }
                Err(err) if err.is_timeout() => {
                    last_failure = err.to_string();
                }
                Err(err) => return Err(err).context("LoTW query failed"),
            }

            if attempt < self.max_retries {
                let delay = backoff_delay(self.retry_base_delay, attempt);
                warn!(
                    attempt,
                    max = self.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "LoTW unavailable ({last_failure}); retrying"
                );
                thread::sleep(delay);
            }
        }

        Err(LotwError::TransientNetwork(format!(
            "{last_failure} after {} attempts",
            self.max_retries
        ))
        .into())
    }
}

/// Builds the [`LotwClient`] on first use, so runs that end up fetching
/// nothing never require credentials.
pub struct DeferredClient<'a> {
    cfg: &'a LotwServiceConfig,
    client: OnceCell<LotwClient>,
}

impl<'a> DeferredClient<'a> {
    pub fn new(cfg: &'a LotwServiceConfig) -> Self {
        Self {
            cfg,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&LotwClient> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = LotwClient::new(self.cfg, load_credentials()?)?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl LogFetcher for DeferredClient<'_> {
    fn fetch(&self, since: Option<&str>, mode: FetchMode) -> Result<String> {
        self.client()?.fetch(since, mode)
    }
}
