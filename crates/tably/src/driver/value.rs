use tably_core::stmt::Value;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::private::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Binds a tagged [`Value`] against whatever parameter type the prepared
/// statement inferred. Strings are parsed into the target type on the
/// fly (uuid, timestamps, dates, numerics), which lets payload values
/// stay stringly-typed all the way down to the wire.
#[derive(Debug, Clone)]
pub struct PgValue(pub Value);

impl From<Value> for PgValue {
    fn from(value: Value) -> Self {
        PgValue(value)
    }
}

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(value) => value.to_sql(ty, out),
            Value::Number(value) => number_to_sql(*value, ty, out),
            Value::String(value) => string_to_sql(value, ty, out),
            Value::StringArray(items) => match *ty {
                Type::UUID_ARRAY => {
                    let uuids = items
                        .iter()
                        .map(|item| uuid::Uuid::parse_str(item))
                        .collect::<Result<Vec<_>, _>>()?;
                    uuids.to_sql(ty, out)
                }
                _ => items.to_sql(ty, out),
            },
            Value::Document(doc) => doc.clone().into_json().to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn number_to_sql(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => (value as i16).to_sql(ty, out),
        Type::INT4 => (value as i32).to_sql(ty, out),
        Type::INT8 => (value as i64).to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR => Value::Number(value).coerce_string().to_sql(ty, out),
        _ => value.to_sql(ty, out),
    }
}

fn string_to_sql(value: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::UUID => uuid::Uuid::parse_str(value)?.to_sql(ty, out),
        Type::TIMESTAMP => parse_naive_timestamp(value)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => {
            let parsed: DateTime<Utc> = match DateTime::parse_from_rfc3339(value) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(_) => parse_naive_timestamp(value)?.and_utc(),
            };
            parsed.to_sql(ty, out)
        }
        Type::DATE => NaiveDate::parse_from_str(value, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => {
            let parsed = NaiveTime::parse_from_str(value, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))?;
            parsed.to_sql(ty, out)
        }
        Type::BOOL => (value == "true" || value == "t" || value == "1").to_sql(ty, out),
        Type::FLOAT8 => value.parse::<f64>()?.to_sql(ty, out),
        Type::FLOAT4 => value.parse::<f32>()?.to_sql(ty, out),
        Type::INT2 => value.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => value.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => value.parse::<i64>()?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::String(value.to_string()).to_sql(ty, out),
        _ => value.to_sql(ty, out),
    }
}

fn parse_naive_timestamp(value: &str) -> Result<NaiveDateTime, BoxError> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];

    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = NaiveTime::from_hms_opt(0, 0, 0) {
            return Ok(date.and_time(midnight));
        }
    }

    Err(format!("cannot parse `{value}` as a timestamp").into())
}
