use super::Value;

use indexmap::IndexMap;

/// An ordered mapping from field slug to [`Value`].
///
/// This is the runtime representation of a row, of a request payload, and
/// of the open `attributes` bag on field metadata. Ordering follows the
/// catalog's field order so generated SQL is stable.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Document {
    entries: IndexMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Removes a key while preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// String view of a key, empty when absent; mirrors how the original
    /// service reads loosely typed payload entries.
    pub fn str_of(&self, key: &str) -> String {
        self.get(key).map(Value::coerce_string).unwrap_or_default()
    }

    pub fn bool_of(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(v)) => *v,
            Some(Value::String(v)) => v.eq_ignore_ascii_case("true"),
            Some(Value::Number(v)) => *v != 0.0,
            _ => false,
        }
    }

    pub fn i64_of(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Number(v)) => Some(*v as i64),
            Some(Value::String(v)) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match Value::from_json(json) {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .into_iter()
                .map(|(key, value)| (key, value.into_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl serde::Serialize for Document {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter())
    }
}

impl<'de> serde::Deserialize<'de> for Document {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = IndexMap::<String, Value>::deserialize(deserializer)?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let mut doc = Document::new();
        doc.insert("zeta", 1.0);
        doc.insert("alpha", 2.0);
        doc.insert("mid", 3.0);

        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn loose_accessors() {
        let mut doc = Document::new();
        doc.insert("limit", Value::String("50".into()));
        doc.insert("flag", Value::String("TRUE".into()));

        assert_eq!(doc.i64_of("limit"), Some(50));
        assert!(doc.bool_of("flag"));
        assert_eq!(doc.str_of("missing"), "");
    }
}
