// # SoftLayer REST client
//
// Thin wrapper over `reqwest` shared by the global IP service and the
// virtual guest target source. One method call is one HTTP request; every
// failure is classified for the reconciler's retry policy.

use globalip_core::{Error, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Public SoftLayer REST endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.softlayer.com/rest/v3.1";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Service name used in errors and logs
pub(crate) const SERVICE_NAME: &str = "softlayer";

/// Error code SoftLayer uses for missing objects
const OBJECT_NOT_FOUND: &str = "SoftLayer_Exception_ObjectNotFound";

/// Error body returned by the SoftLayer REST API
#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

pub(crate) struct SoftLayerClient {
    /// API username
    username: String,

    /// API key
    /// ⚠️ NEVER log this value
    api_key: String,

    /// REST base URL without trailing slash
    base_url: String,

    http: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for SoftLayerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftLayerClient")
            .field("username", &self.username)
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl SoftLayerClient {
    pub(crate) fn new(
        username: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        let username = username.into();
        let api_key = api_key.into();
        if username.is_empty() || api_key.is_empty() {
            return Err(Error::config("SoftLayer username and API key are required"));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            username,
            api_key,
            base_url: endpoint
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            http,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base}/{path}.json` with optional object mask and filter
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        mask: Option<&str>,
        filter: Option<&serde_json::Value>,
    ) -> Result<T> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(mask) = mask {
            query.push(("objectMask", mask.to_string()));
        }
        if let Some(filter) = filter {
            query.push(("objectFilter", filter.to_string()));
        }

        let request = self.http.get(self.url(path)).query(&query);
        self.send(request, path).await
    }

    /// `POST {base}/{path}.json` with `{"parameters": [...]}`
    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        parameters: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({ "parameters": parameters });
        let request = self.http.post(self.url(path)).json(&body);
        self.send(request, path).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T> {
        tracing::trace!("SoftLayer request: {}", path);

        let response = request
            .basic_auth(&self.username, Some(&self.api_key))
            .send()
            .await
            .map_err(|e| classify_transport(path, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(path, &e))?;

        if !status.is_success() {
            return Err(classify_status(status, &body, path));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::rejected(
                SERVICE_NAME,
                format!("Unexpected response from {}: {}", path, e),
            )
        })
    }
}

/// Map a non-success HTTP response to an engine error
pub(crate) fn classify_status(status: StatusCode, body: &str, path: &str) -> Error {
    let api_error = serde_json::from_str::<ApiError>(body).ok();
    let code = api_error.as_ref().and_then(|e| e.code.as_deref());
    let message = api_error
        .as_ref()
        .map(|e| e.error.clone())
        .unwrap_or_else(|| format!("{} - {}", status, body.trim()));

    if status == StatusCode::NOT_FOUND || code == Some(OBJECT_NOT_FOUND) {
        return Error::not_found(format!("{}: {}", path, message));
    }

    match status.as_u16() {
        429 | 502..=504 => Error::transient(format!("{} returned {}: {}", path, status, message)),
        // SoftLayer reports validation and quota errors as 500 + exception code
        500 if code.is_some() => Error::rejected(SERVICE_NAME, message),
        500..=599 => Error::transient(format!("{} returned {}: {}", path, status, message)),
        _ => Error::rejected(SERVICE_NAME, message),
    }
}

/// Map a transport-level failure to an engine error
fn classify_transport(path: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        Error::transient(format!("{} request failed: {}", path, e))
    } else {
        Error::rejected(SERVICE_NAME, format!("{} request failed: {}", path, e))
    }
}
