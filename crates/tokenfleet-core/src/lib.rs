//! Core types and utilities for tokenfleet.
//!
//! This crate provides the foundational types used throughout the tokenfleet
//! cluster flow-control coordinator:
//!
//! - **Identifiers**: Validated names for applications, instances, and namespaces
//! - **Addresses**: Host and port validation for registered instances
//! - **Errors**: [`IdError`] for every validation failure
//!
//! # Example
//!
//! ```
//! use tokenfleet_core::{AppName, InstanceId, Namespace};
//!
//! let app = AppName::new("order-service").unwrap();
//! let instance = InstanceId::from_address("10.0.0.7", 8719);
//! assert_eq!(instance.as_str(), "10.0.0.7@8719");
//!
//! let ns = Namespace::new("order-service").unwrap();
//! assert_eq!(ns.as_str(), app.as_str());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod addr;
pub mod ids;

pub use addr::{validate_host, validate_port};
pub use ids::{AppName, IdError, InstanceId, Namespace};
