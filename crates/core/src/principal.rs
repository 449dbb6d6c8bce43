//! Caller identity.
//!
//! Every mutating entry point takes the caller's [`Principal`] and compares
//! it against the identity it was configured with. There is no ambient
//! "current caller"; the token travels with the call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// An authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fails with [`VaultError::NotAuthorized`] unless `caller` is `self`.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthorized` naming the caller and the operation.
    pub fn require(&self, caller: &Self, operation: &'static str) -> Result<()> {
        if caller == self {
            Ok(())
        } else {
            Err(VaultError::NotAuthorized {
                caller: caller.clone(),
                operation,
            })
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_accepts_matching_caller() {
        let owner = Principal::new("engine");
        assert!(owner.require(&Principal::new("engine"), "record").is_ok());
    }

    #[test]
    fn test_require_rejects_other_caller() {
        let owner = Principal::new("engine");
        let err = owner
            .require(&Principal::new("mallory"), "record")
            .unwrap_err();
        assert_eq!(
            err,
            VaultError::NotAuthorized {
                caller: Principal::new("mallory"),
                operation: "record",
            }
        );
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&Principal::new("vault")).unwrap();
        assert_eq!(json, "\"vault\"");
    }
}
