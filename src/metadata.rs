use std::collections::{BTreeMap, HashMap};
use std::ops::Index;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CloudStorageError;

/// Case-insensitive string map for blob and container metadata.
///
/// Keys are lowercased on every insert and lookup, so `Owner-Id` and
/// `owner-id` address the same entry. Backed by a `BTreeMap`, which gives a
/// stable iteration order for serialization and signing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MetaData(BTreeMap<String, String>);

fn normalize(key: &str) -> String {
    key.to_lowercase()
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&normalize(key)).map(String::as_str)
    }

    /// Like [`get`](Self::get), but a missing key is a `NotFound` error.
    pub fn try_get(&self, key: &str) -> Result<&str, CloudStorageError> {
        self.get(key)
            .ok_or_else(|| CloudStorageError::NotFound(format!("Metadata key '{key}' not found.")))
    }

    /// Insert a value, returning the previous one stored under any casing of `key`.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0.insert(normalize(key.as_ref()), value.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(&normalize(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&normalize(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<&str> for MetaData {
    type Output = str;

    fn index(&self, key: &str) -> &str {
        match self.get(key) {
            Some(value) => value,
            None => panic!("metadata key '{key}' not found"),
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> Extend<(K, V)> for MetaData {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for MetaData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = MetaData::new();
        meta.extend(iter);
        meta
    }
}

impl From<HashMap<String, String>> for MetaData {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for MetaData {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for MetaData {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'de> Deserialize<'de> for MetaData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut meta = MetaData::new();
        meta.set("Owner-Id", "1");

        assert_eq!(meta.get("owner-id"), Some("1"));
        assert_eq!(meta.get("OWNER-ID"), Some("1"));
        assert_eq!(&meta["oWnEr-iD"], "1");
        assert!(meta.contains("OWNER-id"));
    }

    #[test]
    fn test_keys_differing_by_case_collapse() {
        let mut meta = MetaData::new();
        meta.set("Color", "red");
        let previous = meta.set("COLOR", "blue");

        assert_eq!(previous.as_deref(), Some("red"));
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("color"), Some("blue"));
    }

    #[test]
    fn test_missing_key() {
        let meta = MetaData::from([("a", "1")]);
        assert_eq!(meta.get("b"), None);
        assert!(!meta.contains("b"));
    }

    #[test]
    fn test_try_get() {
        let meta = MetaData::from([("Owner-Id", "1")]);
        assert_eq!(meta.try_get("OWNER-ID").unwrap(), "1");

        let err = meta.try_get("Plan").unwrap_err();
        assert!(matches!(err, CloudStorageError::NotFound(_)));
        assert_eq!(err.to_string(), "Metadata key 'Plan' not found.");
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_index_missing_key_panics() {
        let meta = MetaData::new();
        let _ = &meta["absent"];
    }

    #[test]
    fn test_merge_from_plain_map() {
        let mut plain = HashMap::new();
        plain.insert("X-Plan".to_string(), "pro".to_string());
        plain.insert("Region".to_string(), "eu".to_string());

        let mut meta = MetaData::from([("region", "us")]);
        meta.extend(plain);

        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("x-plan"), Some("pro"));
        assert_eq!(meta.get("REGION"), Some("eu"));
    }

    #[test]
    fn test_deserialize_normalizes_keys() {
        let meta: MetaData = serde_json::from_str(r#"{"Owner-Id":"7"}"#).unwrap();
        assert_eq!(meta.iter().collect::<Vec<_>>(), vec![("owner-id", "7")]);
        assert_eq!(serde_json::to_string(&meta).unwrap(), r#"{"owner-id":"7"}"#);
    }

    #[test]
    fn test_remove() {
        let mut meta = MetaData::from([("Key", "v")]);
        assert_eq!(meta.remove("KEY").as_deref(), Some("v"));
        assert!(meta.is_empty());
    }
}
