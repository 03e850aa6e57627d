//! Cache key derivation.
//!
//! A [`CacheKey`] identifies a logical read: the endpoint plus its parameters
//! sorted by name, so permutations of the same parameters collapse to one key.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Request parameters, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    entries: BTreeMap<String, Value>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render as URL query pairs. Strings are sent verbatim, other values as JSON text.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Deterministic identity of a cacheable read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `endpoint` called with `params`.
    ///
    /// Renders `endpoint` alone when there are no parameters, otherwise
    /// `endpoint?name=<json>&...` with names in sorted order.
    pub fn new(endpoint: &str, params: &QueryParams) -> Self {
        if params.is_empty() {
            return Self(endpoint.to_string());
        }
        let rendered = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        Self(format!("{endpoint}?{rendered}"))
    }

    pub fn endpoint(endpoint: &str) -> Self {
        Self(endpoint.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this key belongs to `endpoint`, with or without parameters.
    pub fn belongs_to(&self, endpoint: &str) -> bool {
        match self.0.strip_prefix(endpoint) {
            Some(rest) => rest.is_empty() || rest.starts_with('?'),
            None => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
