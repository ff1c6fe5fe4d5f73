//! Shared HTTP client and error types for the CLI.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use anyhow::anyhow;
use opdeck_api_models::ProblemDetails;
use opdeck_core::OperationError;
use opdeck_engine::{OperationStore, PollPolicy};
use opdeck_telemetry::Metrics;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, Url};
use serde_json::Value;

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
    Cancelled,
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Cancelled => 130,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
            Self::Cancelled => "operation cancelled".to_string(),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

/// Application context passed to command handlers.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) api: ApiClient,
    pub(crate) store: OperationStore<Value>,
    pub(crate) metrics: Metrics,
}

impl AppContext {
    pub(crate) fn new(
        api: ApiClient,
        poll_policy: PollPolicy,
        event_buffer: usize,
    ) -> CliResult<Self> {
        let metrics = Metrics::new()
            .map_err(|err| CliError::failure(anyhow!("failed to initialise metrics: {err}")))?;
        let store = OperationStore::<Value>::builder()
            .poll_policy(poll_policy)
            .metrics(metrics.clone())
            .feed_capacity(event_buffer)
            .build();
        Ok(Self {
            api,
            store,
            metrics,
        })
    }
}

/// HTTP client bound to the backend base URL.
#[derive(Clone)]
pub(crate) struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client that tags every request with `trace_id` and, when
    /// present, a bearer token.
    pub(crate) fn new(
        base_url: Url,
        timeout: Duration,
        api_token: Option<&str>,
        trace_id: &str,
    ) -> CliResult<Self> {
        let mut default_headers = HeaderMap::new();
        let request_id = HeaderValue::from_str(trace_id).map_err(|_| {
            CliError::failure(anyhow!("trace identifier contains invalid characters"))
        })?;
        default_headers.insert(HEADER_REQUEST_ID, request_id);
        if let Some(token) = api_token {
            let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| CliError::validation("API token contains invalid characters"))?;
            bearer.set_sensitive(true);
            default_headers.insert(AUTHORIZATION, bearer);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;

        Ok(Self { client, base_url })
    }

    /// POST `body` to `path` and return the raw success body.
    pub(crate) async fn post(&self, path: &str, body: &Value) -> Result<Vec<u8>, OperationError> {
        let url = self.url(path)?;
        let request = self.client.post(url);
        let request = if body.is_null() {
            request
        } else {
            request.json(body)
        };
        let response = request
            .send()
            .await
            .map_err(|err| OperationError::network(format!("POST {path} failed: {err}")))?;
        read_success(response).await
    }

    /// GET `path` and return the raw success body.
    pub(crate) async fn get(&self, path: &str) -> Result<Vec<u8>, OperationError> {
        let url = self.url(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| OperationError::network(format!("GET {path} failed: {err}")))?;
        read_success(response).await
    }

    fn url(&self, path: &str) -> Result<Url, OperationError> {
        self.base_url
            .join(path)
            .map_err(|err| {
                OperationError::protocol(format!("invalid request path '{path}': {err}"))
            })
    }
}

async fn read_success(response: Response) -> Result<Vec<u8>, OperationError> {
    if !response.status().is_success() {
        return Err(classify_problem(response).await);
    }
    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|err| OperationError::network(format!("failed to read response body: {err}")))
}

/// Turn a non-2xx response into a network error carrying the best message
/// available.
pub(crate) async fn classify_problem(response: Response) -> OperationError {
    let status = response.status();
    let bytes = response.bytes().await.unwrap_or_default();
    let body_text = String::from_utf8_lossy(&bytes).trim().to_string();

    let message = match serde_json::from_slice::<ProblemDetails>(&bytes) {
        Ok(problem) => format!("{} (status {})", problem.message(), problem.status),
        Err(_) if !body_text.is_empty() => format!("{body_text} (status {status})"),
        Err(_) => format!("request failed with status {status}"),
    };
    OperationError::network(message)
}

/// Parse the API URL provided to the CLI.
pub(crate) fn parse_url(input: &str) -> Result<Url, String> {
    opdeck_config::validate_api_url(input)
        .map_err(|_| format!("invalid URL '{input}': expected an http or https URL"))
}
