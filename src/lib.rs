//! Workspace placeholder crate.
//!
//! This crate exposes the feature flags that map to the individual workspace
//! crates (mainly `core-service`). Host applications can depend on
//! `mooddisk-workspace`, enable `desktop-shims`, and get a fully wired
//! [`SessionService`](core_service::SessionService) without listing each crate.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
