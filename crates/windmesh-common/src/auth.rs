//! Gateway authentication.
//!
//! Every gateway request must carry an `X-API-Key` header whose value is one
//! of a fixed set of pre-shared keys. A missing header is never valid.
//!
//! # Example
//!
//! ```
//! use windmesh_common::auth::ApiKeyStore;
//!
//! let keys = ApiKeyStore::new(["super-secret-key-123", "another-valid-key-456"]);
//! assert!(keys.is_valid(Some("super-secret-key-123")));
//! assert!(!keys.is_valid(Some("guess")));
//! assert!(!keys.is_valid(None));
//! ```

use std::fmt;

/// Header carrying the pre-shared key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Static allow-list of pre-shared API keys.
#[derive(Clone)]
pub struct ApiKeyStore {
    keys: Vec<String>,
}

impl ApiKeyStore {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        Self { keys }
    }

    /// Validates a key taken from the request headers.
    ///
    /// Every configured key is compared in constant time, so the answer takes
    /// the same time whichever key (if any) matches.
    pub fn is_valid(&self, provided_key: Option<&str>) -> bool {
        let Some(provided_key) = provided_key else {
            return false;
        };

        self.keys
            .iter()
            .fold(false, |found, key| constant_time_eq(key, provided_key) | found)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for ApiKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKeyStore({} keys)", self.keys.len())
    }
}

impl fmt::Display for ApiKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKeys(*****; {} configured)", self.keys.len())
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
