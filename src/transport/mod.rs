//! Transport layer for SQL Pilot.
//!
//! Only HTTP is provided. The trait keeps the server loop independent of the
//! wiring in `main`.

pub mod http;

pub use http::HttpTransport;

use crate::error::DbResult;
use std::future::Future;

/// A server front end over the orchestrator.
pub trait Transport: Send + Sync {
    /// Serve requests until shutdown.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}
