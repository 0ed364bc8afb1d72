use super::eval::{self, EvalValue};
use super::store::{AggregateKind, AggregateRequest, DerivationStore};

use tably_core::{
    schema::Field,
    stmt::{Document, Value},
    Error, Result,
};

use indexmap::IndexMap;
use std::collections::HashMap;

/// A backend formula field: a grouped aggregate over a related table,
/// recalculated when related rows change.
#[derive(Debug, Clone)]
pub struct BackendFormula {
    pub source_table: String,
    pub value_field: String,
    pub group_field: String,
    pub kind: AggregateKind,
    pub rounds: Option<i32>,
    pub filters: Vec<(String, Value)>,
}

impl BackendFormula {
    /// Reads the aggregate description out of a formula field's
    /// attribute bag. `target_table` is the table the formula field
    /// lives on; the source table groups by its `<target_table>_id`
    /// foreign key.
    pub fn from_field(field: &Field, target_table: &str) -> Result<Self> {
        let raw_kind = field.attributes.str_of("type");
        let kind = AggregateKind::parse(&raw_kind).ok_or_else(|| {
            Error::invalid_argument(format!(
                "formula field `{}` has unsupported aggregate `{raw_kind}`",
                field.slug
            ))
        })?;

        let table_from = field.attributes.str_of("table_from");
        let source_table = table_from
            .split('#')
            .next()
            .unwrap_or_default()
            .to_string();
        if source_table.is_empty() {
            return Err(Error::invalid_argument(format!(
                "formula field `{}` names no source table",
                field.slug
            )));
        }

        let value_field = field.attributes.str_of("sum_field");
        if value_field.is_empty() {
            return Err(Error::invalid_argument(format!(
                "formula field `{}` names no source column",
                field.slug
            )));
        }

        Ok(Self {
            source_table,
            value_field,
            group_field: format!("{target_table}_id"),
            kind,
            rounds: field
                .attributes
                .i64_of("number_of_rounds")
                .map(|n| n as i32),
            filters: parse_filters(field.attributes.get("formula_filters")),
        })
    }

    /// Runs the aggregate and applies the configured rounding. Keys are
    /// target-row guids.
    pub async fn compute<S>(&self, store: &S) -> Result<HashMap<String, f64>>
    where
        S: DerivationStore + ?Sized,
    {
        let mut grouped = store
            .aggregate(AggregateRequest {
                table: &self.source_table,
                value_field: &self.value_field,
                group_field: &self.group_field,
                kind: self.kind,
                filters: &self.filters,
            })
            .await?;

        if let Some(rounds) = self.rounds {
            let factor = 10f64.powi(rounds);
            for value in grouped.values_mut() {
                *value = (*value * factor).round() / factor;
            }
        }

        Ok(grouped)
    }
}

/// Filters arrive as a JSON array of `{"field": ..., "value": ...}`
/// objects inside the attribute bag. Malformed entries are dropped.
fn parse_filters(raw: Option<&Value>) -> Vec<(String, Value)> {
    let jsons: Vec<serde_json::Value> = match raw {
        Some(Value::StringArray(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_str(item).ok())
            .collect(),
        Some(Value::String(text)) => serde_json::from_str::<Vec<serde_json::Value>>(text)
            .ok()
            .unwrap_or_default(),
        Some(Value::Document(doc)) => vec![doc.clone().into_json()],
        _ => Vec::new(),
    };

    jsons
        .into_iter()
        .filter_map(|json| {
            let obj = json.as_object()?;
            let field = obj.get("field")?.as_str()?.to_string();
            let value = Value::from_json(obj.get("value")?.clone());
            if field.is_empty() || value.is_empty() {
                return None;
            }
            Some((field, value))
        })
        .collect()
}

/// Substitutes field slugs in a frontend formula with the row's values
/// and evaluates the result. Longest slugs substitute first so a slug
/// that prefixes another never clobbers it.
pub fn render_frontend(
    field: &Field,
    fields: &IndexMap<String, Field>,
    row: &Document,
) -> Result<Value> {
    let Some(formula) = field.formula() else {
        return Err(Error::invalid_argument(format!(
            "formula field `{}` has no expression",
            field.slug
        )));
    };

    let mut slugs: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|slug| *slug != field.slug)
        .collect();
    slugs.sort_by_key(|slug| std::cmp::Reverse(slug.len()));

    let mut expr = formula;
    for slug in slugs {
        if !expr.contains(slug) {
            continue;
        }
        let literal = literal_for(row.get(slug));
        expr = expr.replace(slug, &literal);
    }

    let value = eval::evaluate(&expr)?;
    Ok(match value {
        EvalValue::Number(n) => Value::Number(n),
        EvalValue::Text(s) => Value::String(s),
        EvalValue::Bool(b) => Value::Bool(b),
    })
}

fn literal_for(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "0".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(value) => format!("\"{}\"", value.coerce_string().replace('"', "\\\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryStore;
    use super::*;
    use pretty_assertions::assert_eq;
    use tably_core::schema::FieldType;

    fn formula_field(attributes: serde_json::Value) -> Field {
        Field {
            id: "f-total".into(),
            table_id: "t-1".into(),
            slug: "total".into(),
            label: "Total".into(),
            field_type: FieldType::Formula,
            required: false,
            unique: false,
            is_search: false,
            autofill_table: None,
            autofill_field: None,
            relation_id: None,
            attributes: Document::from_json(attributes).unwrap(),
        }
    }

    #[test]
    fn backend_formula_reads_the_attribute_bag() {
        let field = formula_field(serde_json::json!({
            "type": "SUMM",
            "table_from": "order_item#rel-9",
            "sum_field": "amount",
            "number_of_rounds": 2
        }));

        let formula = BackendFormula::from_field(&field, "orders").unwrap();
        assert_eq!(formula.source_table, "order_item");
        assert_eq!(formula.value_field, "amount");
        assert_eq!(formula.group_field, "orders_id");
        assert_eq!(formula.kind, AggregateKind::Sum);
        assert_eq!(formula.rounds, Some(2));
    }

    #[test]
    fn backend_formula_rejects_unknown_aggregates() {
        let field = formula_field(serde_json::json!({
            "type": "MEDIAN",
            "table_from": "order_item",
            "sum_field": "amount"
        }));

        let err = BackendFormula::from_field(&field, "orders").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn compute_rounds_grouped_aggregates() {
        let store = MemoryStore::default();
        store.set_aggregate("order_item", "amount", {
            let mut grouped = HashMap::new();
            grouped.insert("o-1".to_string(), 10.256);
            grouped.insert("o-2".to_string(), 4.0);
            grouped
        });

        let field = formula_field(serde_json::json!({
            "type": "SUMM",
            "table_from": "order_item",
            "sum_field": "amount",
            "number_of_rounds": 1
        }));

        let grouped = BackendFormula::from_field(&field, "orders")
            .unwrap()
            .compute(&store)
            .await
            .unwrap();

        assert_eq!(grouped.get("o-1"), Some(&10.3));
        assert_eq!(grouped.get("o-2"), Some(&4.0));
    }

    #[test]
    fn frontend_substitutes_longest_slug_first() {
        let mut fields = IndexMap::new();
        for slug in ["price", "price_total", "qty"] {
            fields.insert(
                slug.to_string(),
                Field {
                    id: format!("f-{slug}"),
                    table_id: "t-1".into(),
                    slug: slug.into(),
                    label: slug.into(),
                    field_type: FieldType::Number,
                    required: false,
                    unique: false,
                    is_search: false,
                    autofill_table: None,
                    autofill_field: None,
                    relation_id: None,
                    attributes: Document::new(),
                },
            );
        }

        let field = formula_field(serde_json::json!({"formula": "price_total + price * qty"}));
        let row = Document::from_json(serde_json::json!({
            "price": 5,
            "price_total": 100,
            "qty": 3
        }))
        .unwrap();

        let value = render_frontend(&field, &fields, &row).unwrap();
        assert_eq!(value, Value::Number(115.0));
    }

    #[test]
    fn frontend_missing_values_default_to_zero() {
        let mut fields = IndexMap::new();
        fields.insert(
            "qty".to_string(),
            Field {
                id: "f-qty".into(),
                table_id: "t-1".into(),
                slug: "qty".into(),
                label: "Qty".into(),
                field_type: FieldType::Number,
                required: false,
                unique: false,
                is_search: false,
                autofill_table: None,
                autofill_field: None,
                relation_id: None,
                attributes: Document::new(),
            },
        );
        let field = formula_field(serde_json::json!({"formula": "qty * 2"}));

        let value = render_frontend(&field, &fields, &Document::new()).unwrap();
        assert_eq!(value, Value::Number(0.0));
    }
}
