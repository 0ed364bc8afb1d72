use crate::{Params, Sql};

use indexmap::IndexMap;
use tably_core::{
    schema::{Field, FieldType, Table},
    stmt::{Document, Value},
    Error, Result,
};

use std::fmt::Write;

/// Compiles an `INSERT` for a derived row document. Columns follow the
/// catalog's field order, with `guid` first; SERIAL columns are populated
/// by the database and never appear.
pub fn insert(table: &Table, fields: &IndexMap<String, Field>, doc: &Document) -> Result<Sql> {
    let mut params: Vec<Value> = Vec::new();
    let mut columns = String::new();
    let mut values = String::new();

    let mut push = |columns: &mut String, values: &mut String, slug: &str, value: Value| {
        if !columns.is_empty() {
            columns.push_str(", ");
            values.push_str(", ");
        }
        columns.push_str(slug);
        Params::push(&mut params, value).write(values);
    };

    if let Some(guid) = doc.get("guid") {
        push(&mut columns, &mut values, "guid", guid.clone());
    }

    for (slug, field) in fields.iter() {
        if slug == "guid" || field.field_type == FieldType::IncrementNumber {
            continue;
        }
        if let Some(value) = doc.get(slug) {
            push(&mut columns, &mut values, slug, value.clone());
        }
    }

    if params.is_empty() {
        return Err(Error::invalid_argument(format!(
            "no insertable columns for table `{}`",
            table.slug
        )));
    }

    Ok(Sql::new(
        format!(
            "INSERT INTO \"{}\" ({columns}) VALUES ({values})",
            table.slug
        ),
        params,
    ))
}

/// Compiles an `UPDATE ... WHERE guid = $1` for the payload keys that name
/// catalog columns. `guid` itself and SERIAL columns are never assigned.
pub fn update(
    table: &Table,
    fields: &IndexMap<String, Field>,
    doc: &Document,
    guid: &str,
) -> Result<Sql> {
    let mut params: Vec<Value> = vec![Value::String(guid.to_string())];
    let mut assignments = String::new();

    for (slug, field) in fields.iter() {
        if slug == "guid" || field.field_type == FieldType::IncrementNumber {
            continue;
        }
        let Some(value) = doc.get(slug) else {
            continue;
        };
        if !assignments.is_empty() {
            assignments.push_str(", ");
        }
        write!(assignments, "{slug} = ").unwrap();
        Params::push(&mut params, value.clone()).write(&mut assignments);
    }

    if assignments.is_empty() {
        return Err(Error::invalid_argument(format!(
            "no updatable columns for table `{}`",
            table.slug
        )));
    }

    Ok(Sql::new(
        format!(
            "UPDATE \"{}\" SET {assignments} WHERE guid = $1",
            table.slug
        ),
        params,
    ))
}

/// Compiles a delete honoring the table's soft-delete flag.
pub fn delete(table: &Table, guid: &str) -> Sql {
    let text = if table.soft_delete {
        format!(
            "UPDATE \"{}\" SET deleted_at = CURRENT_TIMESTAMP WHERE guid = $1",
            table.slug
        )
    } else {
        format!("DELETE FROM \"{}\" WHERE guid = $1", table.slug)
    };

    Sql::new(text, vec![Value::String(guid.to_string())])
}

/// Guid-list variant of [`delete`].
pub fn delete_many(table: &Table, guids: &[String]) -> Sql {
    let text = if table.soft_delete {
        format!(
            "UPDATE \"{}\" SET deleted_at = CURRENT_TIMESTAMP WHERE guid = ANY($1)",
            table.slug
        )
    } else {
        format!("DELETE FROM \"{}\" WHERE guid = ANY($1)", table.slug)
    };

    Sql::new(text, vec![Value::StringArray(guids.to_vec())])
}
