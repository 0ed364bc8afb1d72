use crate::{
    stmt::{Document, Value},
    Error, Result,
};

use regex::Regex;
use std::sync::OnceLock;

/// Logical field types a table builder can assign to a column.
///
/// Each logical type maps to exactly one SQL storage type; a type string
/// the engine does not recognize fails closed to `VARCHAR` via
/// [`FieldType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    SingleLine,
    MultiLine,
    PickList,
    Lookup,
    Email,
    Photo,
    Phone,
    Uuid,
    IncrementId,
    RandomNumbers,
    RandomText,
    RandomUuid,
    ManualString,
    Password,
    File,
    Codabar,
    InternationalPhone,
    FormulaFrontend,
    Date,
    Time,
    DateTime,
    DateTimeWithoutTimeZone,
    Number,
    Money,
    Float,
    FloatNoLimit,
    Formula,
    Checkbox,
    Switch,
    Multiselect,
    Lookups,
    Dynamic,
    LanguageType,
    MultiImage,
    IncrementNumber,
    /// Catch-all for type strings without a mapping entry.
    Unknown,
}

impl FieldType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SINGLE_LINE" => Self::SingleLine,
            "MULTI_LINE" => Self::MultiLine,
            "PICK_LIST" => Self::PickList,
            "LOOKUP" => Self::Lookup,
            "EMAIL" => Self::Email,
            "PHOTO" => Self::Photo,
            "PHONE" => Self::Phone,
            "UUID" => Self::Uuid,
            "INCREMENT_ID" => Self::IncrementId,
            "RANDOM_NUMBERS" => Self::RandomNumbers,
            "RANDOM_TEXT" => Self::RandomText,
            "RANDOM_UUID" => Self::RandomUuid,
            "MANUAL_STRING" => Self::ManualString,
            "PASSWORD" => Self::Password,
            "FILE" => Self::File,
            "CODABAR" => Self::Codabar,
            "INTERNATIONAL_PHONE" => Self::InternationalPhone,
            "FORMULA_FRONTEND" => Self::FormulaFrontend,
            "DATE" => Self::Date,
            "TIME" => Self::Time,
            "DATE_TIME" => Self::DateTime,
            "DATE_TIME_WITHOUT_TIME_ZONE" => Self::DateTimeWithoutTimeZone,
            "NUMBER" => Self::Number,
            "MONEY" => Self::Money,
            "FLOAT" => Self::Float,
            "FLOAT_NOLIMIT" => Self::FloatNoLimit,
            "FORMULA" => Self::Formula,
            "CHECKBOX" => Self::Checkbox,
            "SWITCH" => Self::Switch,
            "MULTISELECT" => Self::Multiselect,
            "LOOKUPS" => Self::Lookups,
            "DYNAMIC" => Self::Dynamic,
            "LANGUAGE_TYPE" => Self::LanguageType,
            "MULTI_IMAGE" => Self::MultiImage,
            "INCREMENT_NUMBER" => Self::IncrementNumber,
            _ => Self::Unknown,
        }
    }

    /// The SQL storage type backing this logical type.
    pub fn sql_type(self) -> SqlType {
        use FieldType::*;

        match self {
            SingleLine | MultiLine | PickList | Lookup | Email | Photo | Phone | Uuid
            | IncrementId | RandomNumbers | RandomText | RandomUuid | ManualString | Password
            | File | Codabar | InternationalPhone | FormulaFrontend | Unknown => SqlType::Varchar,
            Date => SqlType::Date,
            Time => SqlType::Time,
            DateTime | DateTimeWithoutTimeZone => SqlType::Timestamp,
            Number | Money | Float | FloatNoLimit | Formula => SqlType::Float,
            Checkbox | Switch => SqlType::Bool,
            Multiselect | Lookups | Dynamic | LanguageType | MultiImage => SqlType::TextArray,
            IncrementNumber => SqlType::Serial,
        }
    }

    pub fn is_array(self) -> bool {
        self.sql_type() == SqlType::TextArray
    }
}

/// SQL storage types used by the dynamically created tenant tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Varchar,
    Date,
    Time,
    Timestamp,
    Float,
    Bool,
    TextArray,
    Serial,
}

impl SqlType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Varchar => "VARCHAR",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Float => "FLOAT",
            Self::Bool => "BOOL",
            Self::TextArray => "TEXT[]",
            Self::Serial => "SERIAL",
        }
    }

    /// The validation pattern gating payload values before they reach the
    /// derivation engine.
    pub fn validation_pattern(self) -> &'static str {
        match self {
            Self::Varchar => "^.{0,255}$",
            Self::Date => r"^\d{4}-\d{2}-\d{2}$",
            Self::Time => r"^\d{2}:\d{2}(:\d{2})?$",
            Self::Timestamp => r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(:\d{2})?.*$",
            Self::Float => r"^-?\d+(\.\d+)?$",
            Self::Bool => "^(true|false)$",
            Self::TextArray => r"^\{.*\}$",
            Self::Serial => r"^\d+$",
        }
    }

    fn validation_regex(self) -> &'static Regex {
        static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

        let all = REGEXES.get_or_init(|| {
            [
                Self::Varchar,
                Self::Date,
                Self::Time,
                Self::Timestamp,
                Self::Float,
                Self::Bool,
                Self::TextArray,
                Self::Serial,
            ]
            .iter()
            .map(|ty| Regex::new(ty.validation_pattern()).unwrap())
            .collect()
        });

        &all[self as usize]
    }

    /// The default a caller-omitted column falls back to.
    pub fn default_value(self) -> Value {
        match self {
            Self::Varchar => Value::String(String::new()),
            Self::Float => Value::Number(0.0),
            Self::Bool => Value::Bool(false),
            Self::TextArray => Value::StringArray(vec![]),
            Self::Date | Self::Time | Self::Timestamp | Self::Serial => Value::Null,
        }
    }
}

/// One column's metadata: type, constraints, derivation rule.
#[derive(Debug, Clone)]
pub struct Field {
    pub id: String,
    pub table_id: String,
    /// Physical column name, unique within the table.
    pub slug: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    /// Participates in the free-text `search` parameter.
    pub is_search: bool,
    /// Source for AUTOFILL derivation, `table#relation_id` syntax.
    pub autofill_table: Option<String>,
    pub autofill_field: Option<String>,
    pub relation_id: Option<String>,
    /// Open attribute bag: formula text, defaults, digit counts, prefixes.
    pub attributes: Document,
}

impl Field {
    /// Builds a descriptor from a control-plane row document. Only `slug`
    /// is mandatory; everything else degrades to a sensible zero value.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let slug = doc.str_of("slug");
        if slug.is_empty() {
            return Err(Error::internal("field row is missing a slug"));
        }

        let attributes = match doc.get("attributes") {
            Some(Value::Document(attrs)) => attrs.clone(),
            // Attributes arrive as a JSON string when read through
            // row_to_json of a jsonb column rendered as text.
            Some(Value::String(raw)) => serde_json::from_str(raw)
                .ok()
                .and_then(Document::from_json)
                .unwrap_or_default(),
            _ => Document::new(),
        };

        let optional = |key: &str| {
            let value = doc.str_of(key);
            (!value.is_empty()).then_some(value)
        };

        Ok(Self {
            id: doc.str_of("id"),
            table_id: doc.str_of("table_id"),
            slug,
            label: doc.str_of("label"),
            field_type: FieldType::parse(&doc.str_of("type")),
            required: doc.bool_of("required"),
            unique: doc.bool_of("unique"),
            is_search: doc.bool_of("is_search"),
            autofill_table: optional("autofill_table"),
            autofill_field: optional("autofill_field"),
            relation_id: optional("relation_id"),
            attributes,
        })
    }

    pub fn sql_type(&self) -> SqlType {
        self.field_type.sql_type()
    }

    /// True when the column participates in free-text search.
    pub fn is_searchable(&self) -> bool {
        self.is_search && self.sql_type() == SqlType::Varchar
    }

    /// Identifier-valued columns are never regex-matched.
    pub fn is_identifier(&self) -> bool {
        self.slug == "guid" || self.slug.ends_with("_id")
    }

    /// Validates a payload value against the type's pattern. Null values
    /// and structured filter documents pass through; only scalar text
    /// renderings are gated.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let rendered = match value {
            Value::Null | Value::Document(_) => return Ok(()),
            Value::StringArray(items) => format!("{{{}}}", items.join(",")),
            other => other.coerce_string(),
        };

        let sql_type = self.sql_type();
        if sql_type.validation_regex().is_match(&rendered) {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "value for field `{}` does not match the {} pattern",
                self.slug,
                sql_type.name(),
            )))
        }
    }

    // Attribute accessors used by the derivation engine.

    pub fn attr_str(&self, key: &str) -> Option<String> {
        let value = self.attributes.str_of(key);
        (!value.is_empty()).then_some(value)
    }

    pub fn prefix(&self) -> String {
        self.attributes.str_of("prefix")
    }

    pub fn digit_number(&self, default: usize) -> usize {
        self.attributes
            .i64_of("digit_number")
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(default)
    }

    pub fn formula(&self) -> Option<String> {
        self.attr_str("formula")
    }

    pub fn default_attribute(&self) -> Option<&Value> {
        self.attributes.get("defaultValue")
    }

    pub fn default_values(&self) -> Option<&Value> {
        self.attributes.get("default_values")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_fails_closed_to_varchar() {
        let ty = FieldType::parse("HOLOGRAM");
        assert_eq!(ty, FieldType::Unknown);
        assert_eq!(ty.sql_type(), SqlType::Varchar);
    }

    #[test]
    fn type_mapping_matches_the_catalog_contract() {
        for (raw, sql) in [
            ("SINGLE_LINE", "VARCHAR"),
            ("PASSWORD", "VARCHAR"),
            ("DATE_TIME", "TIMESTAMP"),
            ("DATE", "DATE"),
            ("NUMBER", "FLOAT"),
            ("FORMULA", "FLOAT"),
            ("SWITCH", "BOOL"),
            ("MULTISELECT", "TEXT[]"),
            ("LOOKUPS", "TEXT[]"),
            ("INCREMENT_NUMBER", "SERIAL"),
        ] {
            assert_eq!(FieldType::parse(raw).sql_type().name(), sql, "{raw}");
        }
    }

    fn field(slug: &str, ty: FieldType) -> Field {
        Field {
            id: "f1".into(),
            table_id: "t1".into(),
            slug: slug.into(),
            label: String::new(),
            field_type: ty,
            required: false,
            unique: false,
            is_search: false,
            autofill_table: None,
            autofill_field: None,
            relation_id: None,
            attributes: Document::new(),
        }
    }

    #[test]
    fn validation_gates_scalar_values() {
        let amount = field("amount", FieldType::Float);
        assert!(amount.validate(&Value::String("10.5".into())).is_ok());
        assert!(amount.validate(&Value::String("ten".into())).is_err());
        assert!(amount.validate(&Value::Null).is_ok());

        let status = field("status", FieldType::SingleLine);
        assert!(status.validate(&Value::String("open".into())).is_ok());
        assert!(status.validate(&Value::String("x".repeat(300))).is_err());
    }

    #[test]
    fn identifier_detection() {
        assert!(field("guid", FieldType::Uuid).is_identifier());
        assert!(field("client_id", FieldType::Lookup).is_identifier());
        assert!(!field("status", FieldType::SingleLine).is_identifier());
    }
}
