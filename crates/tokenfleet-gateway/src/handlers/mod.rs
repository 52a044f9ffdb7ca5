//! HTTP request handlers.

pub mod cluster;
pub mod health;
pub mod registry;

use serde::Serialize;

/// Empty JSON object returned by operations without a result.
#[derive(Debug, Serialize)]
pub struct Empty {}
