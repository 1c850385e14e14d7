//! Opaque identifiers for workflows, nodes, and edges.
//!
//! Each id is a thin newtype over `String` so that a `WorkflowId` can never
//! be confused with a `NodeId` at the type level, even though both are
//! ultimately just names. Equality is by value; ids carry no hidden
//! structure beyond non-emptiness.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Creates a new identifier, rejecting empty strings.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(IdError::Empty(stringify!($name)));
                }
                Ok(Self(Arc::from(value)))
            }

            /// Borrow the identifier as a plain string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;
            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;
            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

opaque_id!(WorkflowId, "Identifies a single workflow definition/run.");
opaque_id!(NodeId, "Identifies a node within a topology.");
opaque_id!(EdgeId, "Identifies an edge within a topology.");

/// Error constructing an opaque identifier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
}
