//! Common types for keel: errors, Kubernetes helpers and telemetry

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the reconciliation trigger endpoint
pub const DEFAULT_SERVER_PORT: u16 = 8080;
