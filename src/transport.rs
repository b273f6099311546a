//! Transport to the REST backend and the sources built on top of it.
//!
//! [`Transport`] is the only seam that touches the network. Everything above
//! it (module list, resource collections, auth endpoints) decodes the
//! `{success, data, message, errors}` envelope into a strict [`Result`]
//! through [`RestClient`].

use crate::{
    cache::ResourceSource,
    envelope::decode_envelope,
    error::{Error, Result},
    keyed_cache::KeyedSource,
    module_registry::{ModuleDescriptor, ModuleSource},
    permission::PermissionSummary,
    session::{AuthApi, Credentials, LoginResponse},
};
use async_trait::async_trait;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Backend endpoint paths.
pub mod paths {
    pub const MODULES: &str = "/admin/modules";
    pub const MY_PERMISSIONS: &str = "/me/permissions";
    pub const LOGIN: &str = "/login";
    pub const LOGOUT: &str = "/logout";
    pub const REFRESH_TOKEN: &str = "/refresh-token";
    pub const EMPLOYEES: &str = "/employees";
    pub const DEPARTMENTS: &str = "/departments";
    pub const POSITIONS: &str = "/positions";
    pub const WORK_LOCATIONS: &str = "/work-locations";
    pub const GRANT_STRUCTURE: &str = "/grants/structure";

    /// Positions belonging to one department.
    pub fn department_positions(department_id: u64) -> String {
        format!("/departments/{department_id}/positions")
    }
}

/// Raw JSON transport to the backend.
///
/// Implementations must stop work and return [`Error::Cancelled`] once
/// `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET path`, returning the decoded JSON body.
    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Value>;

    /// `POST path` with a JSON body, returning the decoded JSON body.
    async fn post(&self, path: &str, body: Value, cancel: &CancellationToken) -> Result<Value>;
}

/// Exponential backoff for retryable transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, runs out of
/// retries, or `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = op() => outcome,
        };

        match outcome {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                log::warn!(
                    "Request {label} failed ({e}), retry {attempt}/{} in {delay:?}",
                    policy.max_retries
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            outcome => return outcome,
        }
    }
}

/// Typed client over a [`Transport`].
#[derive(Clone)]
pub struct RestClient {
    transport: Arc<dyn Transport>,
}

impl RestClient {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// `GET` an envelope endpoint and return its payload.
    pub async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let body = self.transport.get(path, cancel).await?;
        decode_envelope(body).map(|response| response.data)
    }

    /// A cache source for the collection at `path`.
    pub fn resource(&self, path: impl Into<String>) -> RemoteResource {
        RemoteResource {
            client: self.clone(),
            path: path.into(),
        }
    }

    /// A keyed cache source for positions by department.
    pub fn department_positions(&self) -> DepartmentPositions {
        DepartmentPositions {
            client: self.clone(),
        }
    }

    async fn post_auth(&self, path: &str, body: Value) -> Result<LoginResponse> {
        let body = self
            .transport
            .post(path, body, &CancellationToken::new())
            .await?;
        let response: LoginResponse = serde_json::from_value(body)?;
        response.into_result()
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl ModuleSource for RestClient {
    async fn fetch_modules(&self) -> Result<Vec<ModuleDescriptor>> {
        self.get_data(paths::MODULES, &CancellationToken::new()).await
    }
}

#[async_trait]
impl AuthApi for RestClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse> {
        self.post_auth(paths::LOGIN, serde_json::to_value(credentials)?)
            .await
    }

    async fn logout(&self) -> Result<()> {
        self.transport
            .post(paths::LOGOUT, Value::Null, &CancellationToken::new())
            .await
            .map(|_| ())
    }

    async fn refresh(&self) -> Result<LoginResponse> {
        self.post_auth(paths::REFRESH_TOKEN, Value::Null).await
    }

    async fn permission_summary(&self) -> Result<PermissionSummary> {
        self.get_data(paths::MY_PERMISSIONS, &CancellationToken::new())
            .await
    }
}

/// One resource collection endpoint, as a [`ResourceSource`].
#[derive(Debug, Clone)]
pub struct RemoteResource {
    client: RestClient,
    path: String,
}

impl RemoteResource {
    /// Endpoint path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl ResourceSource<Value> for RemoteResource {
    async fn fetch(&self) -> Result<Value> {
        self.client
            .get_data(&self.path, &CancellationToken::new())
            .await
    }
}

/// Positions scoped to a department id.
#[derive(Debug, Clone)]
pub struct DepartmentPositions {
    client: RestClient,
}

#[async_trait]
impl KeyedSource<u64, Value> for DepartmentPositions {
    async fn fetch(&self, department_id: &u64, cancel: CancellationToken) -> Result<Value> {
        self.client
            .get_data(&paths::department_positions(*department_id), &cancel)
            .await
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use super::*;

    /// [`Transport`] over reqwest with a cookie store for the session
    /// cookie.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
        base_url: String,
        retry: RetryPolicy,
    }

    impl HttpTransport {
        /// Create a transport for `base_url`.
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            let client = reqwest::Client::builder()
                .cookie_store(true)
                .build()
                .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;
            Ok(Self {
                client,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                retry: RetryPolicy::default(),
            })
        }

        /// Replace the retry policy.
        pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
            self.retry = retry;
            self
        }

        fn url(&self, path: &str) -> String {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }

        async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
            let response = request.send().await.map_err(from_reqwest)?;
            let status = response.status();
            let body = response.bytes().await.map_err(from_reqwest)?;

            if !status.is_success() {
                // Prefer the envelope's message when the backend sent one.
                let message = serde_json::from_slice::<Value>(&body)
                    .ok()
                    .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| {
                        status
                            .canonical_reason()
                            .unwrap_or("request failed")
                            .to_string()
                    });
                return Err(Error::Transport {
                    status: Some(status.as_u16()),
                    message,
                });
            }
            if body.is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_slice(&body)?)
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Error {
        Error::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
            let url = self.url(path);
            with_retry(&self.retry, cancel, &url, || self.send(self.client.get(&url))).await
        }

        async fn post(&self, path: &str, body: Value, cancel: &CancellationToken) -> Result<Value> {
            let url = self.url(path);
            with_retry(&self.retry, cancel, &url, || {
                self.send(self.client.post(&url).json(&body))
            })
            .await
        }
    }

}
