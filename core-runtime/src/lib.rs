//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the session core:
//! - Logging and tracing infrastructure
//! - Session configuration
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other crates depend on. It
//! fixes the logging conventions, the validated configuration every component
//! is built from, and the broadcast channel the host UI listens on for session
//! changes and user-facing notices.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
