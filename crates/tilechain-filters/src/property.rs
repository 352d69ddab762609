//! Named properties and keyword lists for saving and restoring stage state.
//!
//! Every [`ImageSource`] exposes its configuration knobs through
//! `property_names` / `property` / `set_property`. A [`Keywordlist`] is a flat,
//! ordered `key -> string` map that captures those properties under a
//! prefix and round-trips through YAML.
//!
//! ```rust
//! use tilechain_filters::{CachingFilter, Keywordlist, PropertyValue, save_state};
//! use tilechain_core::ISize;
//!
//! let mut cache = CachingFilter::new();
//! cache.set_tile_size(ISize::square(128)).unwrap();
//!
//! let mut kwl = Keywordlist::new();
//! save_state(&cache, &mut kwl, "cache");
//! assert_eq!(kwl.find("cache", "tile_size"), Some("128 128"));
//! assert_eq!(kwl.find("cache", "type"), Some("caching_filter"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tilechain_core::{ISize, ScalarType};

use crate::{FilterError, FilterResult, ImageSource};

/// Key under which the stage kind is stored.
pub const TYPE_KEY: &str = "type";

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean switch
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating-point number
    Float(f64),
    /// Width and height
    Size(ISize),
    /// Scalar type
    Scalar(ScalarType),
    /// List of indices
    Indices(Vec<usize>),
    /// Free text
    Text(String),
}

impl PropertyValue {
    /// Parses `text` into the same variant as `self`.
    ///
    /// Used when restoring state: the current value tells which type the
    /// stored string should have.
    pub fn parse_like(&self, name: &str, text: &str) -> FilterResult<PropertyValue> {
        let bad = |what: &str| FilterError::invalid_property(name, format!("expected {what}, got '{text}'"));
        let t = text.trim();
        Ok(match self {
            Self::Bool(_) => match t.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Self::Bool(true),
                "false" | "0" | "no" | "off" => Self::Bool(false),
                _ => return Err(bad("a boolean")),
            },
            Self::Int(_) => Self::Int(t.parse().map_err(|_| bad("an integer"))?),
            Self::Float(_) => Self::Float(t.parse().map_err(|_| bad("a number"))?),
            Self::Size(_) => {
                let parts = parse_list::<u32>(t).ok_or_else(|| bad("'<width> <height>'"))?;
                match parts.as_slice() {
                    [w, h] => Self::Size(ISize::new(*w, *h)),
                    [s] => Self::Size(ISize::square(*s)),
                    _ => return Err(bad("'<width> <height>'")),
                }
            }
            Self::Scalar(_) => Self::Scalar(t.parse().map_err(|_| bad("a scalar type"))?),
            Self::Indices(_) => Self::Indices(parse_list(t).ok_or_else(|| bad("a list of indices"))?),
            Self::Text(_) => Self::Text(text.to_string()),
        })
    }

    /// Boolean payload, or an error naming `name`.
    pub fn as_bool(&self, name: &str) -> FilterResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(type_error(name, "bool", other)),
        }
    }

    /// Integer payload; floats with no fractional part are accepted.
    pub fn as_int(&self, name: &str) -> FilterResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            other => Err(type_error(name, "integer", other)),
        }
    }

    /// Float payload; integers are widened.
    pub fn as_float(&self, name: &str) -> FilterResult<f64> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(i) => Ok(*i as f64),
            other => Err(type_error(name, "number", other)),
        }
    }

    /// Size payload.
    pub fn as_size(&self, name: &str) -> FilterResult<ISize> {
        match self {
            Self::Size(s) => Ok(*s),
            other => Err(type_error(name, "size", other)),
        }
    }

    /// Scalar type payload; text is parsed.
    pub fn as_scalar(&self, name: &str) -> FilterResult<ScalarType> {
        match self {
            Self::Scalar(s) => Ok(*s),
            Self::Text(t) => t
                .parse()
                .map_err(|_| FilterError::invalid_property(name, format!("unknown scalar type '{t}'"))),
            other => Err(type_error(name, "scalar type", other)),
        }
    }

    /// Index list payload.
    pub fn as_indices(&self, name: &str) -> FilterResult<Vec<usize>> {
        match self {
            Self::Indices(v) => Ok(v.clone()),
            other => Err(type_error(name, "index list", other)),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Size(s) => write!(f, "{} {}", s.width, s.height),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Indices(v) => {
                let parts: Vec<String> = v.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" "))
            }
            Self::Text(t) => f.write_str(t),
        }
    }
}

fn type_error(name: &str, expected: &str, got: &PropertyValue) -> FilterError {
    FilterError::invalid_property(name, format!("expected {expected}, got {got:?}"))
}

fn parse_list<T: std::str::FromStr>(text: &str) -> Option<Vec<T>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Ordered `key -> value` string map used to persist stage state.
///
/// Keys are `<prefix>.<name>`, or just `<name>` for an empty prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keywordlist {
    entries: BTreeMap<String, String>,
}

impl Keywordlist {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces `prefix.key`.
    pub fn add(&mut self, prefix: &str, key: &str, value: impl ToString) {
        self.entries.insert(join_key(prefix, key), value.to_string());
    }

    /// Looks up `prefix.key`.
    pub fn find(&self, prefix: &str, key: &str) -> Option<&str> {
        self.entries.get(&join_key(prefix, key)).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialises to YAML.
    pub fn to_yaml(&self) -> FilterResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parses YAML produced by [`to_yaml`](Self::to_yaml).
    pub fn from_yaml(yaml: &str) -> FilterResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Writes the list to a YAML file.
    pub fn write_file(&self, path: impl AsRef<Path>) -> FilterResult<()> {
        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Reads a list from a YAML file.
    pub fn read_file(path: impl AsRef<Path>) -> FilterResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Records the stage kind and every readable property under `prefix`.
pub fn save_state(source: &dyn ImageSource, kwl: &mut Keywordlist, prefix: &str) {
    kwl.add(prefix, TYPE_KEY, source.name());
    for name in source.property_names() {
        if let Some(value) = source.property(name) {
            kwl.add(prefix, name, value);
        }
    }
}

/// Restores properties saved by [`save_state`].
///
/// Keys absent from `kwl` keep their current value. A recorded stage kind
/// that differs from `source.name()` is an error.
pub fn load_state(source: &mut dyn ImageSource, kwl: &Keywordlist, prefix: &str) -> FilterResult<()> {
    if let Some(kind) = kwl.find(prefix, TYPE_KEY) {
        if kind != source.name() {
            return Err(FilterError::State(format!(
                "'{prefix}' holds state for '{kind}', not '{}'",
                source.name()
            )));
        }
    }
    for name in source.property_names() {
        let (Some(text), Some(current)) = (kwl.find(prefix, name), source.property(name)) else {
            continue;
        };
        let value = current.parse_like(name, text)?;
        source.set_property(name, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse_like() {
        let cases = [
            PropertyValue::Bool(true),
            PropertyValue::Int(-3),
            PropertyValue::Float(0.25),
            PropertyValue::Size(ISize::new(64, 32)),
            PropertyValue::Scalar(ScalarType::NormalizedF32),
            PropertyValue::Indices(vec![2, 0, 1]),
            PropertyValue::Text("label".into()),
        ];
        for value in cases {
            let parsed = value.parse_like("x", &value.to_string()).unwrap();
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn test_parse_like_rejects_garbage() {
        let err = PropertyValue::Bool(false).parse_like("enabled", "maybe").unwrap_err();
        assert!(err.to_string().contains("enabled"));
        assert!(PropertyValue::Size(ISize::square(1)).parse_like("tile_size", "1 2 3").is_err());
        assert_eq!(
            PropertyValue::Size(ISize::square(1)).parse_like("tile_size", "256").unwrap(),
            PropertyValue::Size(ISize::square(256))
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(PropertyValue::Float(4.0).as_int("r").unwrap(), 4);
        assert!(PropertyValue::Float(4.5).as_int("r").is_err());
        assert_eq!(PropertyValue::Int(2).as_float("v").unwrap(), 2.0);
        assert_eq!(
            PropertyValue::Text("u16".into()).as_scalar("t").unwrap(),
            ScalarType::U16
        );
        assert!(PropertyValue::Int(1).as_bool("b").is_err());
    }

    #[test]
    fn test_keywordlist_prefix() {
        let mut kwl = Keywordlist::new();
        kwl.add("cache", "enabled", true);
        kwl.add("", "version", 2);
        assert_eq!(kwl.find("cache", "enabled"), Some("true"));
        assert_eq!(kwl.find("", "version"), Some("2"));
        assert_eq!(kwl.find("remap", "enabled"), None);
        assert_eq!(kwl.len(), 2);
    }

    #[test]
    fn test_keywordlist_yaml_file() {
        let mut kwl = Keywordlist::new();
        kwl.add("cache", "tile_size", "128 128");
        kwl.add("cache", "enable_cache", false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");
        kwl.write_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("cache.tile_size"));
        assert_eq!(Keywordlist::read_file(&path).unwrap(), kwl);
    }
}
