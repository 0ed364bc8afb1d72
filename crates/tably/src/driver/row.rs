use tably_core::{
    stmt::{Document, Value},
    Error, Result,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::Type;
use tokio_postgres::Row;

/// Decodes one column into a tagged [`Value`], keyed off the wire type.
/// Timestamps come back in the `YYYY-MM-DDTHH:MM:SSZ` shape the rest of
/// the payload pipeline expects.
pub fn column_value(row: &Row, idx: usize) -> Result<Value> {
    decode(row, idx).map_err(|err| {
        Error::internal(format!(
            "failed to decode column `{}`: {err}",
            row.columns()[idx].name()
        ))
    })
}

fn decode(row: &Row, idx: usize) -> std::result::Result<Value, tokio_postgres::Error> {
    let ty = row.columns()[idx].type_().clone();

    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Number(v as f64)),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Number(v as f64)),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)?
            .map(|v| Value::Number(v as f64)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Number(v as f64)),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Number),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| Value::String(v.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%SZ").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%SZ").to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|v| Value::String(v.format("%H:%M:%S").to_string())),
        Type::UUID_ARRAY => row
            .try_get::<_, Option<Vec<uuid::Uuid>>>(idx)?
            .map(|v| Value::StringArray(v.into_iter().map(|u| u.to_string()).collect())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => row
            .try_get::<_, Option<Vec<String>>>(idx)?
            .map(Value::StringArray),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::from_json),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Decodes a row produced by a `row_to_json(...) AS data` projection.
/// Extra columns whose names end in `_data` (correlated relation embeds)
/// are merged into the document under their column name.
pub fn document_from_json_row(row: &Row) -> Result<Document> {
    let json = row
        .try_get::<_, Option<serde_json::Value>>(0)
        .map_err(|err| Error::internal(format!("row decode failed: {err}")))?
        .unwrap_or(serde_json::Value::Null);

    let mut doc = Document::from_json(json)
        .ok_or_else(|| Error::internal("row projection is not a JSON object"))?;

    for idx in 1..row.columns().len() {
        let name = row.columns()[idx].name().to_string();
        if name.ends_with("_data") {
            doc.insert(name, column_value(row, idx)?);
        }
    }

    Ok(doc)
}

/// Decodes an arbitrary projection column-by-column.
pub fn document_from_row(row: &Row) -> Result<Document> {
    let mut doc = Document::new();
    for idx in 0..row.columns().len() {
        let name = row.columns()[idx].name().to_string();
        doc.insert(name, column_value(row, idx)?);
    }
    Ok(doc)
}
