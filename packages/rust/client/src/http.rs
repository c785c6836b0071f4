//! Authenticated REST client with bounded retry.
//!
//! Every request carries HTTP Basic credentials (account email + API token).
//! Idempotent requests (GET, PUT) are retried on server errors, throttling and
//! transport failures with exponential backoff. POST is sent exactly once: a
//! retried create could leave a duplicate object behind on the target.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use tenantmove_shared::{HttpSettings, Instance, MigrationError, Result};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("tenantmove/", env!("CARGO_PKG_VERSION"));

/// Longest server-requested `Retry-After` we are willing to sleep for.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest response body kept in an [`MigrationError::Http`] message.
const MAX_ERROR_BODY: usize = 500;

/// REST client bound to one instance.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    instance: Instance,
    max_attempts: u32,
    backoff: Duration,
}

impl ApiClient {
    /// Build a client for `instance` using the given HTTP settings.
    pub fn new(instance: Instance, settings: &HttpSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| MigrationError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            instance,
            max_attempts: settings.max_attempts.max(1),
            backoff: settings.backoff,
        })
    }

    /// The instance this client talks to.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Resolve `path` against the instance base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.instance.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// GET `path` and deserialize the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self.execute(Method::GET, path, query, None).await?;
        decode(response).await
    }

    /// GET `path` as untyped JSON.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.get(path, query).await
    }

    /// POST a JSON body and return the (possibly empty → `null`) JSON response.
    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let body = to_value(body)?;
        let response = self.execute(Method::POST, path, &[], Some(&body)).await?;
        decode(response).await
    }

    /// PUT a JSON body and return the (possibly empty → `null`) JSON response.
    pub async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let body = to_value(body)?;
        let response = self.execute(Method::PUT, path, &[], Some(&body)).await?;
        decode(response).await
    }

    /// Download raw bytes (attachments).
    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let response = self.execute(Method::GET, path, &[], None).await?;
        let url = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MigrationError::Network(format!("{url}: body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Upload a single file as `multipart/form-data` under the `file` field.
    ///
    /// Sent once, never retried.
    pub async fn post_multipart_file(
        &self,
        path: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<Value> {
        let url = self.url(path);
        let form = Form::new().part("file", Part::bytes(content).file_name(filename.to_string()));

        debug!(%url, filename, "uploading file");
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.instance.email, Some(&self.instance.token))
            .header("X-Atlassian-Token", "no-check")
            .multipart(form)
            .send()
            .await
            .map_err(|e| MigrationError::Network(format!("{url}: {e}")))?;

        decode(ensure_success(response).await?).await
    }

    /// Send a request, retrying idempotent methods, and fail on non-success status.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = self.url(path);
        let retryable = method == Method::GET || method == Method::PUT;
        let attempts = if retryable { self.max_attempts } else { 1 };

        for attempt in 1..=attempts {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .basic_auth(&self.instance.email, Some(&self.instance.token));
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(attempt, %method, %url, "sending HTTP request");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt, %method, %url, %status, "received HTTP response");

                    if attempt < attempts && is_retryable_status(status) {
                        let delay = retry_after(&response).unwrap_or_else(|| self.backoff_delay(attempt));
                        warn!(attempt, %method, %url, %status, delay_ms = delay.as_millis(), "retrying request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return ensure_success(response).await;
                }
                Err(err) => {
                    if attempt < attempts && is_retryable_error(&err) {
                        let delay = self.backoff_delay(attempt);
                        warn!(attempt, %method, %url, error = %err, "request failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(MigrationError::Network(format!("{method} {url}: {err}")));
                }
            }
        }

        Err(MigrationError::Network(format!(
            "{method} {url}: exhausted retries without a response"
        )))
    }

    /// Delay before retry number `retry` (1-based): `backoff * 2^(retry-1)`.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(8);
        self.backoff.saturating_mul(1u32 << shift)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Server-provided `Retry-After` in whole seconds, capped.
fn retry_after(response: &Response) -> Option<Duration> {
    let secs: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Turn a non-success response into [`MigrationError::Http`].
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }

    Err(MigrationError::Http {
        status: status.as_u16(),
        url,
        body,
    })
}

/// Decode a JSON body; an empty body decodes as `null`.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    let text = response
        .text()
        .await
        .map_err(|e| MigrationError::Network(format!("{url}: body read failed: {e}")))?;

    let value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)
            .map_err(|e| MigrationError::parse(format!("{url}: invalid JSON: {e}")))?
    };

    serde_json::from_value(value)
        .map_err(|e| MigrationError::parse(format!("{url}: unexpected response shape: {e}")))
}

fn to_value<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|e| MigrationError::validation(format!("request body not serializable: {e}")))
}
