//! # Host Bridge Traits
//!
//! Capability traits the session core consumes but never implements itself.
//!
//! ## Overview
//!
//! The session manager needs three things from its host: somewhere encrypted to
//! keep the credential pair, a way to send HTTP requests, and a clock. Each is a
//! trait here so the desktop shell, a mobile shell, or a test harness can plug in
//! its own adapter.
//!
//! ## Traits
//!
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`HttpClient`](http::HttpClient) - Async HTTP with per-request timeouts
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits return [`BridgeError`](error::BridgeError). Adapters must
//! report timeouts as [`BridgeError::Timeout`] and transport failures as
//! [`BridgeError::Connectivity`]; the response classifier relies on that split to
//! tell a connectivity blip apart from a rejected credential.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! across every in-flight request task.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::SecureStore;
pub use time::{Clock, SystemClock};
