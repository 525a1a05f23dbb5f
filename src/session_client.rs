use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::thread;
use std::time::Duration;
use log::{debug, info, warn};
use crate::config::EngineConfig;
use crate::profile::Query;

/// Failure of a single HTTP exchange, before any retry decision.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
}

/// Outcome of a session operation once the retry policy has run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("gave up after {attempts} timed out attempts")]
    RetryExhausted { attempts: u32 },
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientSetupError {
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// The two request shapes the remote service needs.
pub trait Transport {
    fn post_form(&self, url: &str, form: &[(&'static str, String)]) -> Result<String, TransportError>;
    fn get(&self, url: &str) -> Result<String, TransportError>;
}

/// Blocking reqwest session with a fixed header set and cookie store.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, ClientSetupError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ClientSetupError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| ClientSetupError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(HttpTransport { client })
    }

    fn read(result: reqwest::Result<reqwest::blocking::Response>) -> Result<String, TransportError> {
        let resp = result.map_err(map_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        resp.text().map_err(map_reqwest_error)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn post_form(&self, url: &str, form: &[(&'static str, String)]) -> Result<String, TransportError> {
        Self::read(self.client.post(url).form(form).send())
    }

    fn get(&self, url: &str) -> Result<String, TransportError> {
        Self::read(self.client.get(url).send())
    }
}

/// Bounded retry applied to timeouts only. Backoff doubles after every retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

pub struct SessionClient<T = HttpTransport> {
    transport: T,
    search_url: String,
    retry: RetryPolicy,
}

impl SessionClient<HttpTransport> {
    pub fn from_config(config: &EngineConfig) -> Result<Self, ClientSetupError> {
        Ok(SessionClient::new(HttpTransport::new(config)?, config))
    }
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: T, config: &EngineConfig) -> Self {
        SessionClient {
            transport,
            search_url: config.search_url(),
            retry: config.retry_policy(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Posts the person search form and returns the raw response body.
    pub fn search(&self, query: &Query) -> Result<String, FetchError> {
        info!("Searching for {} {} ({})", query.first_name, query.last_name, query.national_id);
        let form = search_form(query);
        self.with_retry(&self.search_url, |t| t.post_form(&self.search_url, &form))
    }

    pub fn fetch_detail(&self, url: &str) -> Result<String, FetchError> {
        info!("Fetching detail page: {}", url);
        self.with_retry(url, |t| t.get(url))
    }

    fn with_retry<F>(&self, url: &str, send: F) -> Result<String, FetchError>
    where
        F: Fn(&T) -> Result<String, TransportError>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.initial_backoff;

        for attempt in 1..=max_attempts {
            match send(&self.transport) {
                Ok(body) => {
                    debug!("{} answered with {} bytes", url, body.len());
                    return Ok(body);
                }
                Err(TransportError::Timeout) => {
                    if attempt == max_attempts {
                        break;
                    }
                    warn!("Request to {} timed out, retry {}/{} in {:?}", url, attempt, max_attempts - 1, backoff);
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(TransportError::Status(code)) => return Err(FetchError::Status(code)),
                Err(TransportError::Network(msg)) => return Err(FetchError::Network(msg)),
            }
        }

        warn!("Request to {} timed out {} times, giving up", url, max_attempts);
        Err(FetchError::RetryExhausted { attempts: max_attempts })
    }
}

/// Search form: the person's name and id plus filters selecting every gender,
/// relation status and age, with or without company engagement, first page.
fn search_form(query: &Query) -> Vec<(&'static str, String)> {
    let fields: [(&'static str, &str); 20] = [
        ("Typ", "2"),
        ("p", "1"),
        ("FNamn", &query.first_name),
        ("ENamn", &query.last_name),
        ("PNr", &query.national_id),
        ("Telefon", ""),
        ("Gatuadress", ""),
        ("PostNr", ""),
        ("PostOrt", ""),
        ("Kommun", ""),
        ("Man", "true"),
        ("Kvinna", "true"),
        ("Relation", "true"),
        ("EjRelation", "true"),
        ("AlderFran", ""),
        ("AlderTill", ""),
        ("HarBolagsengagemang", "true"),
        ("HarEjBolagsengagemang", "true"),
        ("page", "1"),
        ("clientQueryId", "1"),
    ];
    fields.iter().map(|(k, v)| (*k, v.to_string())).collect()
}
