//! Property paths and the subscription keys derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One accessor in a property path.
///
/// On the wire a segment is either a JSON string (property name) or a
/// non-negative JSON integer (index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    Name(String),
    Index(u64),
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name)
    }
}

impl From<u64> for PropertyKey {
    fn from(index: u64) -> Self {
        PropertyKey::Index(index)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Name(name) => f.write_str(name),
            PropertyKey::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Ordered accessors locating a remote value or callable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyPath(pub Vec<PropertyKey>);

impl PropertyPath {
    pub fn new(segments: Vec<PropertyKey>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PropertyKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PropertyKey> {
        self.0.last()
    }

    /// The path without its final segment, or `None` for the root path.
    pub fn parent(&self) -> Option<PropertyPath> {
        self.0
            .split_last()
            .map(|(_, rest)| PropertyPath(rest.to_vec()))
    }

    /// True when `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &PropertyPath) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl<K: Into<PropertyKey>> FromIterator<K> for PropertyPath {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SubscriptionKey::from_path(self).as_str())
    }
}

/// Canonical registry key for a property path.
///
/// Rendered as the compact JSON array of the path, so a name `"0"` and an
/// index `0` produce different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn from_path(path: &PropertyPath) -> Self {
        let mut key = String::from("[");
        for (i, segment) in path.segments().iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            match segment {
                PropertyKey::Name(name) => {
                    key.push_str(&serde_json::Value::String(name.clone()).to_string())
                }
                PropertyKey::Index(index) => key.push_str(&index.to_string()),
            }
        }
        key.push(']');
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&PropertyPath> for SubscriptionKey {
    fn from(path: &PropertyPath) -> Self {
        Self::from_path(path)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(value: serde_json::Value) -> PropertyPath {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_equal_paths_share_a_key() {
        let cases = [
            json!([]),
            json!(["user"]),
            json!(["user", "name"]),
            json!(["items", 3]),
            json!(["items", 3, "tags", 0, "label"]),
        ];
        for case in cases {
            let a = path(case.clone());
            let b = path(case);
            assert_eq!(SubscriptionKey::from_path(&a), SubscriptionKey::from_path(&b));
        }
    }

    #[test]
    fn test_distinct_paths_never_collide() {
        let cases = [
            json!([]),
            json!(["a"]),
            json!(["a", "b"]),
            json!(["a.b"]),
            json!(["a,b"]),
            json!(["a\",\"b"]),
            json!([0]),
            json!(["0"]),
            json!(["a", 0]),
            json!(["a", "0"]),
            json!(["a", 0, "b"]),
            json!([1, 0]),
            json!([10]),
        ];
        let keys: Vec<SubscriptionKey> = cases
            .iter()
            .map(|c| SubscriptionKey::from_path(&path(c.clone())))
            .collect();

        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                if i != j && cases[i] != cases[j] {
                    assert_ne!(a, b, "{} and {} collided", cases[i], cases[j]);
                }
            }
        }
    }

    #[test]
    fn test_key_rendering_is_compact_json() {
        let p: PropertyPath = vec![PropertyKey::from("a"), PropertyKey::from(0u64), "b".into()]
            .into_iter()
            .collect();
        assert_eq!(SubscriptionKey::from_path(&p).as_str(), r#"["a",0,"b"]"#);
        assert_eq!(
            SubscriptionKey::from_path(&p).as_str(),
            serde_json::to_string(&p).unwrap()
        );
    }

    #[test]
    fn test_segments_deserialize_by_json_type() {
        let p = path(json!(["list", 2]));
        assert_eq!(
            p.segments(),
            &[PropertyKey::Name("list".into()), PropertyKey::Index(2)]
        );
        assert!(serde_json::from_value::<PropertyPath>(json!(["x", -1])).is_err());
        assert!(serde_json::from_value::<PropertyPath>(json!(["x", 1.5])).is_err());
    }

    #[test]
    fn test_parent_and_prefix() {
        let p = path(json!(["a", 1, "b"]));
        assert_eq!(p.parent(), Some(path(json!(["a", 1]))));
        assert!(path(json!(["a"])).is_prefix_of(&p));
        assert!(p.is_prefix_of(&p));
        assert!(!path(json!(["b"])).is_prefix_of(&p));
        assert_eq!(PropertyPath::default().parent(), None);
    }
}
