use crate::encode::{self, WireFormat};
use crate::env;
use crate::record::StructuredRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::error::Error;
use std::time::Duration;

/// Configuration for [`HttpSink`].
///
/// The sink POSTs a JSON array of encoded records to a single collector
/// endpoint. Authorization is either a token (`Authorization: Token <t>`)
/// or basic credentials, never both; passing both is a configuration error
/// surfaced at construction, not at send time.
#[derive(Clone, Debug, Default)]
pub struct HttpSinkConfig {
    /// Full ingest URL, e.g. "http://127.0.0.1:8000/log/ingest".
    pub url: String,
    /// Request timeout in seconds. `None` means 1 second.
    pub timeout_secs: Option<f64>,
    /// Token for `Authorization: Token <token>`.
    pub token: Option<String>,
    /// `(user, password)` for basic authorization.
    pub credentials: Option<(String, String)>,
    /// Flat or nested record layout on the wire.
    pub format: WireFormat,
}

impl HttpSinkConfig {
    /// Read the collector settings from `LOGSHIP_URL`, `LOGSHIP_TOKEN` and
    /// `LOGSHIP_TIMEOUT`, leaving everything else at its default.
    pub fn from_env() -> Self {
        HttpSinkConfig {
            url: env::env_or(env::LOGSHIP_URL_ENV, "http://127.0.0.1:8000/log/ingest"),
            timeout_secs: std::env::var(env::LOGSHIP_TIMEOUT_ENV)
                .ok()
                .and_then(|raw| raw.parse::<f64>().ok()),
            token: std::env::var(env::LOGSHIP_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            credentials: None,
            format: WireFormat::default(),
        }
    }
}

/// Error raised while building a sink from configuration.
#[derive(thiserror::Error, Debug)]
pub enum SinkConfigError {
    /// `token` and `credentials` are mutually exclusive.
    #[error("credentials or token, not both")]
    AmbiguousAuth,

    /// The HTTP client could not be constructed.
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// HTTP implementation of [`LogSink`] for a remote log collector.
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    config: HttpSinkConfig,
}

impl HttpSink {
    /// Construct a new sink instance using the provided configuration.
    ///
    /// **Parameters**
    /// - `config`: [`HttpSinkConfig`] describing the ingest URL, timeout,
    ///   authorization and wire layout.
    ///
    /// **Returns**
    /// - A ready-to-use [`HttpSink`] that can be passed into
    ///   [`init_logging`](crate::init::init_logging) /
    ///   [`init_logging_with_config`](crate::init::init_logging_with_config).
    ///
    /// **Errors**
    /// - [`SinkConfigError::AmbiguousAuth`] if both `token` and
    ///   `credentials` are set.
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkConfigError> {
        if config.token.is_some() && config.credentials.is_some() {
            return Err(SinkConfigError::AmbiguousAuth);
        }
        let timeout = config
            .timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| Duration::from_secs(1));
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    /// POST one batch of already-encoded records.
    ///
    /// Single-record batches are the norm today; the array body keeps
    /// multi-record batching open without a wire change.
    async fn post_batch(&self, batch: &[Value]) -> Result<(), Box<dyn Error + Send + Sync>> {
        let body = serde_json::to_vec(batch).unwrap_or_else(|_| b"[]".to_vec());

        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(body);

        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Token {token}"));
        } else if let Some((user, password)) = &self.config.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let resp = request.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            Err(format!("log ingest failed with status {status}: {text}").into())
        }
    }
}

#[async_trait]
impl LogSink for HttpSink {
    async fn send(&self, record: &StructuredRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        let batch = [encode::to_value(record, self.config.format)];
        self.post_batch(&batch).await
    }
}
