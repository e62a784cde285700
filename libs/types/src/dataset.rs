//! Dataset naming
//!
//! A `DatasetName` identifies one logical collection of comparable market
//! records (e.g., "equipment", "pets"). Names participate in cache key
//! layouts and pub/sub channel names, so the character set is restricted
//! at construction time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Name of a logical record collection.
///
/// Valid names are non-empty, at most 64 characters, and consist of
/// ASCII alphanumerics, `-` and `_`. Colons are rejected because the
/// cache key layout uses `:` as a separator. Deserialization goes
/// through the same validation, so change-bus payloads cannot smuggle
/// an invalid name past the constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetName(String);

impl DatasetName {
    /// Maximum allowed name length.
    pub const MAX_LEN: usize = 64;

    /// Create a validated dataset name.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::DatasetName {
                name,
                reason: "empty name".to_string(),
            });
        }
        if name.len() > Self::MAX_LEN {
            return Err(ValidationError::DatasetName {
                name,
                reason: format!("longer than {} characters", Self::MAX_LEN),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::DatasetName {
                name,
                reason: "only ASCII alphanumerics, '-' and '_' allowed".to_string(),
            });
        }
        Ok(Self(name))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DatasetName {
    type Error = ValidationError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<DatasetName> for String {
    fn from(name: DatasetName) -> Self {
        name.0
    }
}
