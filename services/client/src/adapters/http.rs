//! services/client/src/adapters/http.rs
//!
//! The JSON-over-HTTP client used by every remote call. It attaches the
//! signed-in identity's bearer token to outgoing requests and performs a
//! single refresh-and-retry when the server rejects that token.

use futures::future::{BoxFuture, FutureExt, Shared};
use quiz_core::ports::{IdentityProvider, PortError, PortResult};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

type SharedRefresh = Shared<BoxFuture<'static, PortResult<String>>>;

/// Whether a request carries the identity's bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Bearer,
    Anonymous,
}

/// The refresh currently associated with a rejected token. Every caller whose
/// request failed with `stale_token` awaits the same `result`.
struct PendingRefresh {
    stale_token: String,
    result: SharedRefresh,
}

//=========================================================================================
// The Main Client Struct
//=========================================================================================

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
    refresh: Mutex<Option<PendingRefresh>>,
}

impl ApiClient {
    /// Creates a new `ApiClient` rooted at `base_url`.
    pub fn new(
        base_url: &Url,
        timeout: Duration,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            identity,
            refresh: Mutex::new(None),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> PortResult<T> {
        self.request::<(), T>(Method::GET, path, None, Auth::Bearer)
            .await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body), Auth::Bearer)
            .await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body), Auth::Bearer)
            .await
    }

    /// Sends a request and decodes the JSON response.
    ///
    /// A 401 on a request that carried a bearer token triggers one forced token
    /// refresh (shared with every other request rejected with the same token)
    /// and one reissue. Any failure after that is mapped and returned.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request_id = Uuid::new_v4();
        let span = info_span!("api_request", %method, path, %request_id);

        async {
            let token = match auth {
                Auth::Bearer => self.bearer_token().await?,
                Auth::Anonymous => None,
            };

            let mut response = self
                .send_once(&method, path, body, token.as_deref(), request_id)
                .await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                if let Some(stale) = token {
                    debug!("Token rejected, refreshing before retry.");
                    let fresh = self.refreshed_token(&stale).await?;
                    response = self
                        .send_once(&method, path, body, Some(&fresh), request_id)
                        .await?;
                }
            }

            decode(response, path).await
        }
        .instrument(span)
        .await
    }

    /// The token to attach when an identity is signed in.
    async fn bearer_token(&self) -> PortResult<Option<String>> {
        if self.identity.current_identity().is_none() {
            return Ok(None);
        }
        self.identity.fresh_token(false).await.map(Some)
    }

    /// Joins the refresh for `stale`, starting it if nobody has yet.
    async fn refreshed_token(&self, stale: &str) -> PortResult<String> {
        let shared = {
            let mut slot = self.refresh.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.stale_token == stale => pending.result.clone(),
                _ => {
                    let identity = Arc::clone(&self.identity);
                    let result = async move { identity.fresh_token(true).await }
                        .boxed()
                        .shared();
                    *slot = Some(PendingRefresh {
                        stale_token: stale.to_string(),
                        result: result.clone(),
                    });
                    result
                }
            }
        };

        let outcome = shared.clone().await;
        if let Err(e) = &outcome {
            warn!("Token refresh failed: {}", e);
            let mut slot = self.refresh.lock().await;
            if slot
                .as_ref()
                .is_some_and(|pending| pending.result.ptr_eq(&shared))
            {
                *slot = None;
            }
        }
        outcome
    }

    async fn send_once<B>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
        token: Option<&str>,
        request_id: Uuid,
    ) -> PortResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("x-request-id", request_id.to_string());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                error!("No response received: {}", e);
            } else {
                error!("Request error: {}", e);
            }
            PortError::Unexpected(e.to_string())
        })
    }
}

//=========================================================================================
// Response Decoding
//=========================================================================================

async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> PortResult<T> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        error!("Failed to read response body: {}", e);
        PortError::Unexpected(e.to_string())
    })?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| {
            error!("Malformed response from {}: {}", path, e);
            PortError::Unexpected(format!("malformed response from {}: {}", path, e))
        });
    }

    if status == StatusCode::NOT_FOUND {
        debug!("{} returned 404", path);
    } else {
        error!("Error response: {} {}", status, body);
    }
    Err(map_status(status, &body, path))
}

/// Maps a non-success status to the port error taxonomy.
pub(crate) fn map_status(status: StatusCode, body: &str, path: &str) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(path.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            PortError::Validation(
                error_message(body).unwrap_or_else(|| "Request was rejected by the server.".to_string()),
            )
        }
        _ => match error_message(body) {
            Some(message) => PortError::Unexpected(format!("HTTP {}: {}", status, message)),
            None => PortError::Unexpected(format!("HTTP {}", status)),
        },
    }
}

/// Extracts a readable message from an error body: `message`, `error`, or
/// `error.message`.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    if let Some(message) = json.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    match json.get("error")? {
        Value::String(message) => Some(message.clone()),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
