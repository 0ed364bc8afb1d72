use crate::{Params, Sql, RESERVED_KEYS};

use indexmap::IndexMap;
use tably_core::{
    schema::{Field, Relation, Table},
    stmt::{CmpOp, Document, Value},
    Error, Result,
};

use std::fmt::Write;

const DEFAULT_LIMIT: i64 = 20;

/// Compiles a list request (filter document, order, pagination, search,
/// relation embeds) into a `SELECT` statement plus a matching `COUNT`
/// statement sharing the same filter and arguments.
#[derive(Debug)]
pub struct ListQuery<'a> {
    pub table: &'a Table,
    /// Catalog fields in catalog order, keyed by slug.
    pub fields: &'a IndexMap<String, Field>,
    /// Embeddable relations touching this table (many-to-many, dynamic and
    /// recursive edges are already excluded by the catalog).
    pub relations: &'a [Relation],
}

/// The compiled list statement pair.
#[derive(Debug)]
pub struct ListStatements {
    pub query: Sql,
    pub count: Sql,
}

impl ListQuery<'_> {
    pub fn build(&self, payload: &Document) -> Result<ListStatements> {
        let mut params: Vec<Value> = Vec::new();
        let mut filter = if self.table.soft_delete {
            " WHERE a.deleted_at IS NULL".to_string()
        } else {
            " WHERE TRUE".to_string()
        };

        for (key, value) in payload.iter() {
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            let Some(field) = self.fields.get(key) else {
                // Unknown identifiers never reach SQL.
                continue;
            };
            self.push_field_filter(&mut filter, &mut params, field, value)?;
        }

        if let Some(Value::Document(auto)) = payload.get("auto_filter") {
            push_auto_filter(&mut filter, &mut params, self.fields, auto);
        }

        push_search_filter(
            &mut filter,
            &mut params,
            self.fields,
            &payload.str_of("search"),
        );

        let order = self.order_clause(payload)?;
        let limit = payload.i64_of("limit").unwrap_or(DEFAULT_LIMIT).max(0);
        let offset = payload.i64_of("offset").unwrap_or(0).max(0);

        let mut query = format!("SELECT row_to_json(a) AS data{}", self.embed_columns(payload));
        write!(
            query,
            " FROM \"{}\" a{}{} LIMIT {} OFFSET {}",
            self.table.slug, filter, order, limit, offset
        )
        .unwrap();

        let count = format!("SELECT COUNT(*) FROM \"{}\" a{}", self.table.slug, filter);

        Ok(ListStatements {
            query: Sql::new(query, params.clone()),
            count: Sql::new(count, params),
        })
    }

    fn push_field_filter(
        &self,
        filter: &mut String,
        params: &mut Vec<Value>,
        field: &Field,
        value: &Value,
    ) -> Result<()> {
        match value {
            Value::Null => {
                write!(filter, " AND a.{} IS NULL", field.slug).unwrap();
            }
            Value::Bool(_) | Value::Number(_) => {
                let ph = Params::push(params, value.clone());
                write!(filter, " AND a.{} = ", field.slug).unwrap();
                ph.write(filter);
            }
            Value::StringArray(_) => {
                let ph = Params::push(params, value.clone());
                if field.field_type.is_array() {
                    write!(filter, " AND a.{} && ", field.slug).unwrap();
                } else {
                    write!(filter, " AND a.{} = ANY(", field.slug).unwrap();
                }
                ph.write(filter);
                if !field.field_type.is_array() {
                    filter.push(')');
                }
            }
            Value::Document(cmp) => {
                self.push_comparison_filter(filter, params, field, cmp)?;
            }
            Value::String(text) => {
                if field.is_identifier() {
                    if self.table.slug == "client_type" && field.slug == "guid" {
                        // client_type keys its rows by uuid[] guid lists.
                        let ph =
                            Params::push(params, Value::StringArray(value.coerce_string_array()));
                        filter.push_str(" AND a.guid = ANY(");
                        ph.write(filter);
                        filter.push_str("::uuid[])");
                    } else {
                        let ph = Params::push(params, value.clone());
                        write!(filter, " AND a.{} = ", field.slug).unwrap();
                        ph.write(filter);
                    }
                } else {
                    // Free-text match: case-insensitive regex, never LIKE.
                    // A leading `+` is a URL-encoding artifact and is
                    // stripped before the value is regex-escaped.
                    let cleaned = text.strip_prefix('+').unwrap_or(text);
                    let ph = Params::push(params, Value::String(regex::escape(cleaned)));
                    write!(filter, " AND a.{} ~* ", field.slug).unwrap();
                    ph.write(filter);
                }
            }
        }
        Ok(())
    }

    fn push_comparison_filter(
        &self,
        filter: &mut String,
        params: &mut Vec<Value>,
        field: &Field,
        cmp: &Document,
    ) -> Result<()> {
        for (key, operand) in cmp.iter() {
            let Some(op) = CmpOp::from_key(key) else {
                return Err(Error::invalid_argument(format!(
                    "unknown comparison operator `{key}` for field `{}`",
                    field.slug
                )));
            };

            // Empty operands are skipped rather than compiled into
            // always-false predicates.
            match operand {
                Value::String(text) if text.is_empty() => continue,
                Value::Null => continue,
                _ => {}
            }

            match op {
                CmpOp::In => {
                    let ph =
                        Params::push(params, Value::StringArray(operand.coerce_string_array()));
                    write!(filter, " AND a.{}::VARCHAR = ANY(", field.slug).unwrap();
                    ph.write(filter);
                    filter.push(')');
                }
                _ => {
                    let ph = Params::push(params, operand.clone());
                    write!(filter, " AND a.{} {} ", field.slug, op.sql()).unwrap();
                    ph.write(filter);
                }
            }
        }
        Ok(())
    }

    fn order_clause(&self, payload: &Document) -> Result<String> {
        if let Some(Value::Document(orders)) = payload.get("order") {
            let mut clause = String::new();
            for (key, direction) in orders.iter() {
                // Only catalog columns may appear in ORDER BY.
                if !self.fields.contains_key(key) && key != "created_at" && key != "guid" {
                    return Err(Error::invalid_argument(format!(
                        "cannot order by unknown field `{key}`"
                    )));
                }
                let dir = match direction.as_f64().map(|d| d as i64) {
                    Some(1) => "ASC",
                    _ => "DESC",
                };
                if clause.is_empty() {
                    clause.push_str(" ORDER BY ");
                } else {
                    clause.push_str(", ");
                }
                write!(clause, "a.{key} {dir}").unwrap();
            }
            if !clause.is_empty() {
                return Ok(clause);
            }
        }

        Ok(if self.table.order_by {
            " ORDER BY a.created_at DESC".to_string()
        } else {
            " ORDER BY a.created_at ASC".to_string()
        })
    }

    /// Correlated subqueries embedding each related row as
    /// `<related_table>_id_data`, single level only.
    fn embed_columns(&self, payload: &Document) -> String {
        if !payload.bool_of("with_relations") {
            return String::new();
        }

        let selected: Option<Vec<String>> = match payload.get("selected_relations") {
            Some(Value::StringArray(slugs)) => Some(slugs.clone()),
            _ => None,
        };

        let mut columns = String::new();
        let mut alias = 0;

        for relation in self.relations {
            if !relation.embeddable() {
                continue;
            }
            let Some(related) = relation.other_side(&self.table.slug) else {
                continue;
            };
            if let Some(selected) = &selected {
                if !selected.iter().any(|slug| slug == related) {
                    continue;
                }
            }

            let local = format!("{related}_id");
            let Some(field) = self.fields.get(&local) else {
                continue;
            };
            if field.field_type.is_array() {
                continue;
            }

            alias += 1;
            write!(
                columns,
                ", (SELECT row_to_json(r{alias}) FROM \"{related}\" r{alias} \
                 WHERE r{alias}.guid = a.{local}) AS {local}_data",
            )
            .unwrap();
        }

        columns
    }
}

fn push_auto_filter(
    filter: &mut String,
    params: &mut Vec<Value>,
    fields: &IndexMap<String, Field>,
    auto: &Document,
) {
    let mut first = true;
    for (key, value) in auto.iter() {
        if !fields.contains_key(key) {
            continue;
        }
        let ph = Params::push(params, value.clone());
        if first {
            write!(filter, " AND (a.{key} = ").unwrap();
            first = false;
        } else {
            write!(filter, " OR a.{key} = ").unwrap();
        }
        ph.write(filter);
    }
    if !first {
        filter.push(')');
    }
}

fn push_search_filter(
    filter: &mut String,
    params: &mut Vec<Value>,
    fields: &IndexMap<String, Field>,
    search: &str,
) {
    if search.is_empty() {
        return;
    }

    let escaped = regex::escape(search.strip_prefix('+').unwrap_or(search));
    let mut first = true;

    for field in fields.values().filter(|field| field.is_searchable()) {
        let ph = Params::push(params, Value::String(escaped.clone()));
        if first {
            write!(filter, " AND (a.{} ~* ", field.slug).unwrap();
            first = false;
        } else {
            write!(filter, " OR a.{} ~* ", field.slug).unwrap();
        }
        ph.write(filter);
    }

    if !first {
        filter.push(')');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{catalog, doc};
    use pretty_assertions::assert_eq;

    fn build(payload: serde_json::Value) -> ListStatements {
        let (table, fields, relations) = catalog();
        ListQuery {
            table: &table,
            fields: &fields,
            relations: &relations,
        }
        .build(&doc(payload))
        .unwrap()
    }

    fn placeholder_count(text: &str) -> usize {
        let re = regex::Regex::new(r"\$(\d+)").unwrap();
        re.captures_iter(text)
            .map(|cap| cap[1].parse::<usize>().unwrap())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn placeholder_argument_parity() {
        let payloads = [
            serde_json::json!({}),
            serde_json::json!({"status": "open"}),
            serde_json::json!({"amount": {"$gt": 5, "$lte": 100}, "status": "open"}),
            serde_json::json!({"tags": ["a", "b"], "client_id": "c-1", "done": true}),
            serde_json::json!({"search": "needle", "amount": 3}),
            serde_json::json!({"amount": {"$in": ["1", "2"]}, "auto_filter": {"client_id": "u1"}}),
        ];

        for payload in payloads {
            let stmts = build(payload.clone());
            assert_eq!(
                placeholder_count(&stmts.query.text),
                stmts.query.params.len(),
                "query parity for {payload}"
            );
            assert_eq!(
                placeholder_count(&stmts.count.text),
                stmts.count.params.len(),
                "count parity for {payload}"
            );
        }
    }

    #[test]
    fn defaults() {
        let stmts = build(serde_json::json!({}));
        assert_eq!(
            stmts.query.text,
            "SELECT row_to_json(a) AS data FROM \"orders\" a \
             WHERE a.deleted_at IS NULL ORDER BY a.created_at DESC LIMIT 20 OFFSET 0"
        );
        assert!(stmts.query.params.is_empty());
        assert_eq!(
            stmts.count.text,
            "SELECT COUNT(*) FROM \"orders\" a WHERE a.deleted_at IS NULL"
        );
    }

    #[test]
    fn scalar_number_is_equality_matched() {
        let stmts = build(serde_json::json!({"amount": 10}));
        assert!(stmts.query.text.contains("a.amount = $1"));
        assert_eq!(stmts.query.params, vec![Value::Number(10.0)]);
    }

    #[test]
    fn free_text_uses_case_insensitive_regex_with_escaping() {
        let stmts = build(serde_json::json!({"status": "+a.b"}));
        assert!(stmts.query.text.contains("a.status ~* $1"));
        // Leading "+" stripped, "." escaped.
        assert_eq!(stmts.query.params, vec![Value::String("a\\.b".into())]);
    }

    #[test]
    fn identifier_fields_are_never_regex_matched() {
        let stmts = build(serde_json::json!({"client_id": "abc"}));
        assert!(stmts.query.text.contains("a.client_id = $1"));
        assert_eq!(stmts.query.params, vec![Value::String("abc".into())]);
    }

    #[test]
    fn array_filter_on_array_column_uses_containment() {
        let stmts = build(serde_json::json!({"tags": ["a", "b"]}));
        assert!(stmts.query.text.contains("a.tags && $1"));
    }

    #[test]
    fn array_filter_on_scalar_column_uses_any() {
        let stmts = build(serde_json::json!({"status": ["open", "closed"]}));
        assert!(stmts.query.text.contains("a.status = ANY($1)"));
    }

    #[test]
    fn comparison_documents() {
        let stmts = build(serde_json::json!({"amount": {"$gte": 5, "$lt": 10}}));
        assert!(stmts.query.text.contains("a.amount >= $1"));
        assert!(stmts.query.text.contains("a.amount < $2"));

        let stmts = build(serde_json::json!({"amount": {"$in": ["5", "6"]}}));
        assert!(stmts.query.text.contains("a.amount::VARCHAR = ANY($1)"));
        assert_eq!(
            stmts.query.params,
            vec![Value::StringArray(vec!["5".into(), "6".into()])]
        );
    }

    #[test]
    fn empty_comparison_operands_are_skipped() {
        let stmts = build(serde_json::json!({"amount": {"$gt": ""}}));
        assert!(!stmts.query.text.contains('$'));
        assert!(stmts.query.params.is_empty());
    }

    #[test]
    fn search_ors_across_searchable_fields() {
        let stmts = build(serde_json::json!({"search": "open"}));
        assert!(stmts
            .query
            .text
            .contains("(a.status ~* $1 OR a.note ~* $2)"));
        assert_eq!(stmts.query.params.len(), 2);
    }

    #[test]
    fn order_override_and_validation() {
        let stmts = build(serde_json::json!({"order": {"amount": 1, "status": -1}}));
        assert!(stmts
            .query
            .text
            .contains("ORDER BY a.amount ASC, a.status DESC"));

        let (table, fields, relations) = catalog();
        let err = ListQuery {
            table: &table,
            fields: &fields,
            relations: &relations,
        }
        .build(&doc(serde_json::json!({"order": {"no_such": 1}})))
        .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn pagination_override() {
        let stmts = build(serde_json::json!({"limit": 5, "offset": 40}));
        assert!(stmts.query.text.ends_with("LIMIT 5 OFFSET 40"));
    }

    #[test]
    fn unknown_filter_keys_are_ignored() {
        let stmts = build(serde_json::json!({"nonexistent": "x"}));
        assert!(stmts.query.params.is_empty());
        assert!(!stmts.query.text.contains("nonexistent"));
    }

    #[test]
    fn relation_embedding_adds_correlated_subquery() {
        let stmts = build(serde_json::json!({"with_relations": true}));
        assert!(stmts.query.text.contains(
            "(SELECT row_to_json(r1) FROM \"client\" r1 WHERE r1.guid = a.client_id) \
             AS client_id_data"
        ));

        // selected_relations narrows the embed set.
        let stmts = build(serde_json::json!({
            "with_relations": true,
            "selected_relations": ["warehouse"]
        }));
        assert!(!stmts.query.text.contains("client_id_data"));
    }

    #[test]
    fn client_type_guid_casts_to_uuid_array() {
        let (mut table, mut fields, _) = catalog();
        table.slug = "client_type".into();
        fields.insert(
            "guid".into(),
            crate::test_util::field("guid", tably_core::schema::FieldType::Uuid),
        );

        let stmts = ListQuery {
            table: &table,
            fields: &fields,
            relations: &[],
        }
        .build(&doc(serde_json::json!({"guid": "u-1"})))
        .unwrap();

        assert!(stmts.query.text.contains("a.guid = ANY($1::uuid[])"));
        assert_eq!(
            stmts.query.params,
            vec![Value::StringArray(vec!["u-1".into()])]
        );
    }

    #[test]
    fn hard_delete_tables_filter_on_true() {
        let (mut table, fields, relations) = catalog();
        table.soft_delete = false;

        let stmts = ListQuery {
            table: &table,
            fields: &fields,
            relations: &relations,
        }
        .build(&doc(serde_json::json!({})))
        .unwrap();

        assert!(stmts.query.text.contains("WHERE TRUE"));
        assert!(!stmts.query.text.contains("deleted_at"));
    }
}
