//! Cache key construction
//!
//! Turns a `(category, parameters)` pair into a stable, filesystem-safe
//! [`CacheKey`]. Equivalent requests collide: parameter names and text values
//! are trimmed and lowercased, names are sorted, lists are sorted and
//! deduplicated, and absent values are dropped.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::types::{CacheKey, Category};

/// Upper bound on key length so a key stays usable as a path component
pub const MAX_KEY_LEN: usize = 250;

/// A single request parameter before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Absent,
    Text(String),
    Integer(i64),
    List(Vec<String>),
}

impl ParamValue {
    fn normalize(self) -> Option<String> {
        match self {
            Self::Absent => None,
            Self::Text(text) => {
                let text = text.trim().to_lowercase();
                (!text.is_empty()).then_some(text)
            }
            Self::Integer(n) => Some(n.to_string()),
            Self::List(items) => {
                let mut items: Vec<String> = items
                    .into_iter()
                    .map(|item| item.trim().to_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect();
                items.sort();
                items.dedup();
                (!items.is_empty()).then(|| items.join(","))
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<&[&str]> for ParamValue {
    fn from(value: &[&str]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

/// Normalized request parameters (symbol, venue, interval, candle count, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheParams {
    fields: BTreeMap<String, String>,
}

impl CacheParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a field; absent values remove any previous value for the name
    pub fn insert(&mut self, name: &str, value: impl Into<ParamValue>) {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            return;
        }
        match value.into().normalize() {
            Some(value) => {
                self.fields.insert(name, value);
            }
            None => {
                self.fields.remove(&name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn is_path_safe(component: &str) -> bool {
    component
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-' | b','))
}

/// Build the cache key for a request.
///
/// The natural form `category&name=value&...` is used when it is short and
/// path-safe; otherwise it is condensed to `category-<sha256>`.
pub fn build(category: Category, params: &CacheParams) -> CacheKey {
    let mut natural = String::from(category.as_str());
    let mut safe = true;

    for (name, value) in params.iter() {
        natural.push('&');
        natural.push_str(name);
        natural.push('=');
        natural.push_str(value);
        safe &= is_path_safe(name) && is_path_safe(value);
    }

    if safe && natural.len() <= MAX_KEY_LEN {
        return CacheKey::new(category, natural);
    }

    // Length-prefixed fields: separators inside values cannot shift
    // boundaries between fields
    let mut hasher = Sha256::new();
    hasher.update(category.as_str().as_bytes());
    for (name, value) in params.iter() {
        for part in [name, value] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    CacheKey::new(
        category,
        format!("{}-{}", category, hex::encode(hasher.finalize())),
    )
}
