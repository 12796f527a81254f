#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{Clock, HttpClient, HttpRequest, HttpResponse, SecureStore};
use chrono::{DateTime, Utc};
use core_auth::{
    AuthenticatedClient, NoticeDebouncer, RefreshCoordinator, SessionManager, SessionSettings,
    SessionState, SessionStore,
};
use core_runtime::config::NoticeCooldowns;
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const NOW: i64 = 1_700_000_000;
pub const BASE: &str = "https://api.example.com";
pub const REFRESH_PATH: &str = "/api/auth/refresh/mobile";
pub const PROBE_PATH: &str = "/api/user/me";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

/// Unsigned JWT with the given `exp`; `marker` keeps equal-expiry tokens distinct.
pub fn jwt(exp: i64, marker: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "jti": marker }).to_string());
    format!("{}.{}.sig", header, payload)
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(status)
        .with_header("Content-Type", "application/json")
        .with_body(body.to_string())
}

pub fn bearer(request: &HttpRequest) -> Option<String> {
    request
        .header_value("Authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, value: &[u8]) {
        self.entries.lock().insert(key.to_string(), value.to_vec());
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

type Handler = Arc<dyn Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync>;

/// Answers by URL path suffix, optionally after a delay, and records requests.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<Vec<(String, Option<Duration>, Handler)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttp {
    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync + 'static,
    {
        self.on_delayed(path, None, handler);
    }

    pub fn on_delayed<F>(&self, path: &str, delay: Option<Duration>, handler: F)
    where
        F: Fn(&HttpRequest) -> BridgeResult<HttpResponse> + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .push((path.to_string(), delay, Arc::new(handler)));
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().push(request.clone());
        let route = self
            .routes
            .lock()
            .iter()
            .rev()
            .find(|(path, _, _)| request.url.ends_with(path.as_str()))
            .map(|(_, delay, handler)| (*delay, Arc::clone(handler)));

        match route {
            Some((delay, handler)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                handler(&request)
            }
            None => Ok(HttpResponse::new(404)),
        }
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(unix_seconds: i64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(DateTime::from_timestamp(unix_seconds, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A full session stack over in-memory bridges.
pub struct Harness {
    pub memory: MemoryStore,
    pub http: Arc<FakeHttp>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub manager: Arc<SessionManager>,
    pub notices: Arc<NoticeDebouncer>,
    pub client: AuthenticatedClient,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(tweak: impl FnOnce(&mut SessionSettings)) -> Self {
        let memory = MemoryStore::default();
        let http = Arc::new(FakeHttp::default());
        let clock = ManualClock::at(NOW);
        let events = EventBus::new(256);

        let state = Arc::new(SessionState::new());
        let store = SessionStore::new(Arc::new(memory.clone()));
        let timeout = Duration::from_secs(10);
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&state),
            store.clone(),
            http.clone(),
            format!("{}{}", BASE, REFRESH_PATH),
            timeout,
            events.clone(),
        );

        let mut settings = SessionSettings {
            probe_url: format!("{}{}", BASE, PROBE_PATH),
            logout_url: format!("{}{}", BASE, LOGOUT_PATH),
            request_timeout: timeout,
            probe_on_restore: true,
            expiry_leeway: Duration::ZERO,
            rotation_header: "bearer_token".to_string(),
            rotation_min_len: 11,
        };
        tweak(&mut settings);

        let manager = Arc::new(SessionManager::new(
            state,
            store,
            coordinator,
            http.clone(),
            settings,
            clock.clone(),
            events.clone(),
        ));
        let notices = Arc::new(NoticeDebouncer::new(
            NoticeCooldowns::default(),
            clock.clone(),
            events.clone(),
        ));
        let client = AuthenticatedClient::builder(http.clone())
            .timeout(timeout)
            .session_chain(Arc::clone(&manager), Arc::clone(&notices))
            .build();

        Self {
            memory,
            http,
            clock,
            events,
            manager,
            notices,
            client,
        }
    }

    pub fn url(path: &str) -> String {
        format!("{}{}", BASE, path)
    }
}
