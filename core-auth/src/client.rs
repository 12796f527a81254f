//! Authenticated HTTP client.
//!
//! [`AuthenticatedClient`] wraps a host [`HttpClient`] in an ordered middleware
//! chain. Request interceptors run before every dispatch (including the retry);
//! response interceptors run in order on every outcome and may deliver it,
//! rewrite it, or ask for the request to be sent again.
//!
//! The chain for a signed-in session is
//! `[RequestGate]` then `[CredentialRotation, ResponseClassifier]`; see
//! [`AuthenticatedClientBuilder::session_chain`].
//!
//! ```ignore
//! let client = AuthenticatedClient::builder(http)
//!     .timeout(Duration::from_secs(10))
//!     .session_chain(manager, notices)
//!     .build();
//!
//! let me: serde_json::Value = client.get_json("https://api.mooddisk.com/api/user/me").await?;
//! ```

use crate::classifier::{CredentialRotation, ResponseClassifier};
use crate::error::{AuthError, Result};
use crate::gate::RequestGate;
use crate::manager::SessionManager;
use crate::notice::NoticeDebouncer;
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, AUTHORIZATION};
use core_runtime::config::DEFAULT_REQUEST_TIMEOUT;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Outcome of one dispatch as the response chain sees it.
pub type Outcome = std::result::Result<HttpResponse, AuthError>;

/// What a response interceptor wants done with an outcome.
#[derive(Debug)]
pub enum Disposition {
    /// Hand this outcome to the next interceptor, or to the caller.
    Deliver(Outcome),
    /// Send the request again. Honoured once per request.
    Retry,
}

/// Per-request bookkeeping shared by the interceptors.
#[derive(Debug, Default)]
pub struct RequestContext {
    /// Session cancellation token, captured when the request first passes the gate.
    pub cancel: CancellationToken,
    /// Session generation the request was issued under.
    pub generation: u64,
    /// Dispatch count, starting at 1.
    pub attempt: u32,
    /// The request has already been re-sent once.
    pub retried: bool,
    /// Bearer token carried by the latest dispatch.
    pub sent_token: Option<String>,
    bound: bool,
}

impl RequestContext {
    /// Tie the request to a session generation. Only the first call counts.
    pub fn bind(&mut self, generation: u64, cancel: CancellationToken) {
        if !self.bound {
            self.generation = generation;
            self.cancel = cancel;
            self.bound = true;
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Inspect or rewrite an outgoing request. An error stops the request
    /// before it is dispatched.
    async fn on_request(&self, ctx: &mut RequestContext, request: HttpRequest)
        -> Result<HttpRequest>;
}

#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(&self, ctx: &mut RequestContext, outcome: Outcome) -> Disposition;
}

#[derive(Clone)]
pub struct AuthenticatedClient {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
    request_chain: Arc<[Arc<dyn RequestInterceptor>]>,
    response_chain: Arc<[Arc<dyn ResponseInterceptor>]>,
}

impl AuthenticatedClient {
    pub fn builder(http: Arc<dyn HttpClient>) -> AuthenticatedClientBuilder {
        AuthenticatedClientBuilder {
            http,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            request_chain: Vec::new(),
            response_chain: Vec::new(),
        }
    }

    /// Send `request` through the chain.
    ///
    /// Any status other than those the chain maps to errors (401 after the
    /// refresh attempt, 503) is returned as `Ok`, 4xx/5xx included.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Cancelled`] if a logout started before or during the call
    /// - [`AuthError::Unauthorized`] if the request is still rejected after one refresh
    /// - [`AuthError::ServerMaintenance`] on 503
    /// - [`AuthError::Network`] on timeout or connectivity failure
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let deadline = request.timeout.unwrap_or(self.timeout);
        let request = request.timeout(deadline);
        let mut ctx = RequestContext::default();

        loop {
            ctx.attempt += 1;

            let mut outgoing = request.clone();
            for interceptor in self.request_chain.iter() {
                outgoing = interceptor.on_request(&mut ctx, outgoing).await?;
            }
            ctx.sent_token = outgoing
                .header_value(AUTHORIZATION)
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);

            let outcome = match tokio::time::timeout(deadline, self.http.execute(outgoing)).await {
                Err(_) => Err(AuthError::Network(format!(
                    "request timed out after {}ms",
                    deadline.as_millis()
                ))),
                Ok(result) => result.map_err(AuthError::from_transport),
            };

            if ctx.is_cancelled() {
                debug!(attempt = ctx.attempt, "Response arrived after logout, dropping");
                return Err(AuthError::Cancelled);
            }

            let mut disposition = Disposition::Deliver(outcome);
            for interceptor in self.response_chain.iter() {
                disposition = match disposition {
                    Disposition::Deliver(outcome) => interceptor.on_response(&mut ctx, outcome).await,
                    Disposition::Retry => break,
                };
            }

            match disposition {
                Disposition::Deliver(outcome) => return outcome,
                Disposition::Retry if ctx.retried => {
                    return Err(AuthError::Unauthorized { status: 401 });
                }
                Disposition::Retry => {
                    debug!(attempt = ctx.attempt, "Re-sending request");
                    ctx.retried = true;
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.execute(HttpRequest::new(HttpMethod::Get, url)).await?;
        decode_json(&response)
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = HttpRequest::new(HttpMethod::Post, url)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.execute(request).await?;
        decode_json(&response)
    }
}

fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    if !response.is_success() {
        return Err(AuthError::UnexpectedStatus {
            status: response.status,
        });
    }
    response
        .json()
        .map_err(|e| AuthError::Serialization(e.to_string()))
}

pub struct AuthenticatedClientBuilder {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
    request_chain: Vec<Arc<dyn RequestInterceptor>>,
    response_chain: Vec<Arc<dyn ResponseInterceptor>>,
}

impl AuthenticatedClientBuilder {
    /// Deadline for requests that do not set their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request_chain.push(interceptor);
        self
    }

    pub fn response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response_chain.push(interceptor);
        self
    }

    /// Install the gate, rotation and classifier for `manager`'s session.
    pub fn session_chain(
        self,
        manager: Arc<SessionManager>,
        notices: Arc<NoticeDebouncer>,
    ) -> Self {
        let gate = Arc::new(RequestGate::new(manager.state()));
        let classifier = Arc::new(ResponseClassifier::new(
            manager.state(),
            manager.coordinator().clone(),
            notices,
        ));
        let rotation = Arc::new(CredentialRotation::new(manager));

        self.request_interceptor(gate)
            .response_interceptor(rotation)
            .response_interceptor(classifier)
    }

    pub fn build(self) -> AuthenticatedClient {
        AuthenticatedClient {
            http: self.http,
            timeout: self.timeout,
            request_chain: self.request_chain.into(),
            response_chain: self.response_chain.into(),
        }
    }
}
