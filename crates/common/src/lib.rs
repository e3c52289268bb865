//! Common utilities shared by the Erdtree infrastructure test harness.

#![warn(clippy::pedantic)]

/// Module for resolving cloud credentials from the environment
pub mod credentials;

/// Module for tracing subscriber initialization
pub mod logging;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for OAuth 2.0 management-plane token acquisition
pub mod token;
