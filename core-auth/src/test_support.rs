//! In-memory bridges shared by the unit tests.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{Clock, HttpClient, HttpRequest, HttpResponse, SecureStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

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

struct Route {
    path: String,
    delay: Option<Duration>,
    handler: Handler,
}

/// HTTP fake that answers by URL path suffix and records every request.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

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
        self.routes.lock().push(Route {
            path: path.to_string(),
            delay,
            handler: Arc::new(handler),
        });
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .count()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
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
            .find(|r| request.url.ends_with(&r.path))
            .map(|r| (r.delay, Arc::clone(&r.handler)));

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
            now: Mutex::new(DateTime::from_timestamp(unix_seconds, 0).unwrap_or_default()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(status)
        .with_header("Content-Type", "application/json")
        .with_body(body.to_string())
}
