//! Call metadata propagated in both directions.
//!
//! Keys are compared case-insensitively; the spelling of the first insert is kept
//! for iteration so that transports can reproduce the original header names.

use indexmap::IndexMap;

pub const REQUEST_ID: &str = "X-Request-Id";
pub const CONTENT_TYPE: &str = "Content-Type";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    // lower-cased key -> (original key, value)
    entries: IndexMap<String, (String, String)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// Inserts or replaces a value, returning the previous one. A replaced entry
    /// keeps its position and original key spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.get_mut(&key.to_ascii_lowercase()) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.insert(key.to_ascii_lowercase(), (key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries
            .shift_remove(&key.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// Copies every entry of `other` into `self`, overwriting on key collision.
    pub fn merge(&mut self, other: &Context) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.get(REQUEST_ID)
    }

    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.insert(REQUEST_ID, request_id);
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.insert(CONTENT_TYPE, content_type);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Context::new();
        context.extend(iter);
        context
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Context {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}
