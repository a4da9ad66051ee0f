use derive_more::{Display, From};
use thiserror::Error;

/// A key of a value within a [`Bucket`].
///
/// Keys are `/` separated paths such as `db/<uuid>/0_1`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
pub struct StoreKey(String);

/// An invalid store key.
#[derive(Clone, Debug, From, Error)]
#[error("invalid store key {0:?}")]
pub struct StoreKeyError(String);

impl StoreKey {
    /// Create a new store key from `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreKeyError`] if `key` is not valid according to [`StoreKey::validate()`].
    pub fn new(key: impl Into<String>) -> Result<Self, StoreKeyError> {
        let key = key.into();
        if Self::validate(&key) {
            Ok(Self(key))
        } else {
            Err(StoreKeyError(key))
        }
    }

    /// Extracts a string slice of the underlying key [String].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a key.
    ///
    /// A key cannot be an empty string, start or end with a `/`, or contain an empty path segment.
    #[must_use]
    pub fn validate(key: &str) -> bool {
        !key.is_empty() && key.split('/').all(|segment| !segment.is_empty())
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = StoreKeyError;

    fn try_from(key: &str) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

/// The name of a bucket in the durable object store.
///
/// Bucket names are not validated.
/// An empty bucket name refers to the default bucket of the store.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
pub struct Bucket(String);

impl Bucket {
    /// Create a new bucket name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Extracts a string slice of the bucket name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Bucket {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Bucket {
    fn from(name: String) -> Self {
        Self(name)
    }
}
