use super::Document;

/// A dynamically typed value flowing through the engine.
///
/// Runtime rows have no compile-time shape: their key set is the field set
/// of their table. Every cell is one of these variants, so type dispatch
/// in the query builder and the derivation engine is exhaustive instead of
/// relying on downcasts.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Value {
    /// Null value
    #[default]
    Null,

    /// Boolean value
    Bool(bool),

    /// Numeric value. All logical numeric types map to FLOAT columns, so a
    /// single f64 representation is used throughout.
    Number(f64),

    /// String value
    String(String),

    /// A list of strings, the representation of TEXT[] / UUID[] columns
    StringArray(Vec<String>),

    /// A nested key/value document (embedded relation data, comparison
    /// filter documents, open attribute bags)
    Document(Document),
}

impl Value {
    pub const fn null() -> Self {
        Self::Null
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            Self::StringArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// True for the values the derivation engine treats as "not supplied":
    /// null, empty string, empty array, empty document.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(v) => v.is_empty(),
            Self::StringArray(v) => v.is_empty(),
            Self::Document(doc) => doc.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    /// Renders the value as a plain string, the way template substitution
    /// and identifier comparison expect it. Arrays render their first
    /// element, documents render empty.
    pub fn coerce_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(v) => v.to_string(),
            Self::Number(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", *v as i64)
                } else {
                    v.to_string()
                }
            }
            Self::String(v) => v.clone(),
            Self::StringArray(v) => v.first().cloned().unwrap_or_default(),
            Self::Document(_) => String::new(),
        }
    }

    /// Coerces scalars to a string list the way guid filters expect.
    pub fn coerce_string_array(&self) -> Vec<String> {
        match self {
            Self::StringArray(v) => v.clone(),
            Self::Null => vec![],
            other => vec![other.coerce_string()],
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(v) => Self::Bool(v),
            serde_json::Value::Number(v) => Self::Number(v.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(v) => Self::String(v),
            serde_json::Value::Array(items) => Self::StringArray(
                items
                    .into_iter()
                    .map(|item| match item {
                        serde_json::Value::String(v) => v,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            serde_json::Value::Object(map) => Self::Document(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }

    pub fn into_json(self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(v),
            Self::Number(v) => serde_json::Number::from_f64(v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(v) => serde_json::Value::String(v),
            Self::StringArray(items) => serde_json::Value::Array(
                items.into_iter().map(serde_json::Value::String).collect(),
            ),
            Self::Document(doc) => doc.into_json(),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::StringArray(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Self::Document(value)
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.clone().into_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_round_trip() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"amount": 10.5, "status": "open", "tags": ["a", "b"], "done": false, "note": null}"#,
        )
        .unwrap();

        let value = Value::from_json(json.clone());
        let doc = value.as_document().unwrap();
        assert_eq!(doc.get("amount"), Some(&Value::Number(10.5)));
        assert_eq!(doc.get("status"), Some(&Value::String("open".into())));
        assert_eq!(
            doc.get("tags"),
            Some(&Value::StringArray(vec!["a".into(), "b".into()]))
        );
        assert_eq!(doc.get("done"), Some(&Value::Bool(false)));
        assert_eq!(doc.get("note"), Some(&Value::Null));

        assert_eq!(value.into_json(), json);
    }

    #[test]
    fn mixed_arrays_degrade_to_strings() {
        let value = Value::from_json(serde_json::json!([1, "two"]));
        assert_eq!(
            value,
            Value::StringArray(vec!["1".into(), "two".into()])
        );
    }

    #[test]
    fn coerce_string_formats_integral_numbers_without_fraction() {
        assert_eq!(Value::Number(42.0).coerce_string(), "42");
        assert_eq!(Value::Number(1.25).coerce_string(), "1.25");
        assert_eq!(Value::Bool(true).coerce_string(), "true");
    }

    #[test]
    fn emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(Value::StringArray(vec![]).is_empty());
        assert!(!Value::Number(0.0).is_empty());
        assert!(!Value::Bool(false).is_empty());
    }
}
