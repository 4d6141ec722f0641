//! Query keys and their canonical form.
//!
//! A key is either a plain string or an ordered sequence of primitive values.
//! Keys are compared structurally: two keys that serialize to the same JSON text
//! address the same cache entry.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// A single primitive element of a sequence key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
}

impl KeyPart {
  fn to_json(&self) -> Value {
    match self {
      KeyPart::Null => Value::Null,
      KeyPart::Bool(b) => Value::Bool(*b),
      KeyPart::Int(i) => Value::from(*i),
      // Integral floats print like integers and non-finite ones become null,
      // as they do in JSON
      KeyPart::Float(f) if is_integral(*f) => Value::from(*f as i64),
      KeyPart::Float(f) => Value::from(*f),
      KeyPart::Str(s) => Value::String(s.clone()),
    }
  }
}

fn is_integral(f: f64) -> bool {
  f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

impl From<&str> for KeyPart {
  fn from(s: &str) -> Self {
    KeyPart::Str(s.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(s: String) -> Self {
    KeyPart::Str(s)
  }
}

impl From<bool> for KeyPart {
  fn from(b: bool) -> Self {
    KeyPart::Bool(b)
  }
}

impl From<i64> for KeyPart {
  fn from(i: i64) -> Self {
    KeyPart::Int(i)
  }
}

impl From<i32> for KeyPart {
  fn from(i: i32) -> Self {
    KeyPart::Int(i.into())
  }
}

impl From<u32> for KeyPart {
  fn from(i: u32) -> Self {
    KeyPart::Int(i.into())
  }
}

impl From<f64> for KeyPart {
  fn from(f: f64) -> Self {
    KeyPart::Float(f)
  }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(KeyPart::Null)
  }
}

/// Caller-supplied identity of a cached query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKey {
  Str(String),
  Seq(Vec<KeyPart>),
}

impl QueryKey {
  /// Build a sequence key from anything that yields key parts.
  ///
  /// ```
  /// use qcache::QueryKey;
  ///
  /// let key = QueryKey::seq(["user".into(), 42.into()]);
  /// assert_eq!(key.canonicalize(), r#"["user",42]"#);
  /// ```
  pub fn seq<I>(parts: I) -> Self
  where
    I: IntoIterator<Item = KeyPart>,
  {
    QueryKey::Seq(parts.into_iter().collect())
  }

  /// Deterministic structural serialization of this key.
  pub fn canonicalize(&self) -> String {
    let value = match self {
      QueryKey::Str(s) => Value::String(s.clone()),
      QueryKey::Seq(parts) => Value::Array(parts.iter().map(KeyPart::to_json).collect()),
    };
    value.to_string()
  }

  /// The canonical map key for this query.
  pub fn cache_key(&self) -> CacheKey {
    CacheKey(self.canonicalize())
  }
}

impl From<&str> for QueryKey {
  fn from(s: &str) -> Self {
    QueryKey::Str(s.to_string())
  }
}

impl From<String> for QueryKey {
  fn from(s: String) -> Self {
    QueryKey::Str(s)
  }
}

impl From<Vec<KeyPart>> for QueryKey {
  fn from(parts: Vec<KeyPart>) -> Self {
    QueryKey::Seq(parts)
  }
}

impl<const N: usize> From<[KeyPart; N]> for QueryKey {
  fn from(parts: [KeyPart; N]) -> Self {
    QueryKey::seq(parts)
  }
}

impl From<&QueryKey> for QueryKey {
  fn from(key: &QueryKey) -> Self {
    key.clone()
  }
}

/// Canonical, comparable form of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// SHA-256 hex digest of the canonical form.
  ///
  /// Fixed-length and safe to put in log fields regardless of what the key holds.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.0.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<QueryKey> for CacheKey {
  fn from(key: QueryKey) -> Self {
    key.cache_key()
  }
}

/// Canonicalize anything convertible into a [`QueryKey`].
pub fn canonicalize(key: impl Into<QueryKey>) -> String {
  key.into().canonicalize()
}
