//! Identifier types for tokenfleet.
//!
//! Applications, instances, and namespaces are all named by short strings on
//! the wire. Each gets its own newtype so they cannot be mixed up, and each
//! is validated once at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of an application name.
pub const MAX_APP_NAME_LEN: usize = 256;

/// Maximum length of an instance identifier.
pub const MAX_INSTANCE_ID_LEN: usize = 256;

/// Maximum length of a namespace.
pub const MAX_NAMESPACE_LEN: usize = 256;

fn validate_name(kind: &'static str, value: &str, max: usize) -> Result<(), IdError> {
    if value.trim().is_empty() {
        return Err(IdError::Blank(kind));
    }
    if value.len() > max {
        return Err(IdError::TooLong {
            kind,
            max,
            got: value.len(),
        });
    }
    Ok(())
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl $ty {
            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// The name of a managed application.
///
/// Every instance belongs to exactly one application, and all coordination
/// (ownership, locking, projection) is scoped per application.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    /// Create a validated application name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or longer than 256 bytes.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        validate_name("app name", &name, MAX_APP_NAME_LEN)?;
        Ok(Self(name))
    }

    /// The namespace an application claims when none is requested explicitly.
    #[must_use]
    pub fn default_namespace(&self) -> Namespace {
        Namespace(self.0.clone())
    }
}

string_id_impls!(AppName);

/// Identifier of a running instance within an application.
///
/// Instances that do not report an explicit identifier are keyed by their
/// address in `ip@port` form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a validated instance identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is blank or longer than 256 bytes.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        validate_name("instance id", &id, MAX_INSTANCE_ID_LEN)?;
        Ok(Self(id))
    }

    /// Build the address-derived identifier `ip@port`.
    #[must_use]
    pub fn from_address(ip: &str, port: u16) -> Self {
        Self(format!("{ip}@{port}"))
    }
}

string_id_impls!(InstanceId);

/// A rate-limiting namespace served by exactly one token server.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Create a validated namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is blank or longer than 256 bytes.
    pub fn new(ns: impl Into<String>) -> Result<Self, IdError> {
        let ns = ns.into();
        validate_name("namespace", &ns, MAX_NAMESPACE_LEN)?;
        Ok(Self(ns))
    }
}

string_id_impls!(Namespace);

/// Errors that can occur when parsing identifiers and addresses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The value is empty or whitespace only.
    #[error("{0} cannot be blank")]
    Blank(&'static str),

    /// The value exceeds the maximum length.
    #[error("{kind} too long: max {max} bytes, got {got}")]
    TooLong {
        /// What kind of value was rejected.
        kind: &'static str,
        /// The maximum allowed length.
        max: usize,
        /// The actual length.
        got: usize,
    },

    /// The host is neither an IP literal nor a valid host name.
    #[error("invalid ip or hostname: {0}")]
    InvalidHost(String),

    /// The port is outside `1..=65535`.
    #[error("invalid port: {0}")]
    InvalidPort(i64),
}
