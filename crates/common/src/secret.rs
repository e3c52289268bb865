//! Secret types for protecting credentials from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Every credential the
//! harness handles (service-principal client secrets, management-plane bearer
//! tokens, VM admin passwords passed to the engine) is held in one of these
//! wrappers until the moment it is written to the wire or to a child process.
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on a
//! struct that contains one is safe: `{:?}` and tracing fields never show the
//! value. Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ServicePrincipal {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let sp = ServicePrincipal {
//!     client_id: "00000000-0000-0000-0000-000000000001".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{sp:?}").contains("s3cr3t"));
//! assert_eq!(sp.client_secret.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
