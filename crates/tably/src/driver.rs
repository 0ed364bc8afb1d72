//! tokio-postgres glue: connecting, binding tagged values, decoding rows
//! and translating database errors into [`Error`] kinds.

mod error;
pub use error::translate;

mod row;
pub use row::{column_value, document_from_json_row, document_from_row};

mod value;
pub use value::PgValue;

use tably_core::{Error, Result};
use tably_sql::Sql;

use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, GenericClient, NoTls, Row};

/// Connects to a tenant database given a `postgresql://` URL and spawns
/// the connection task. The task logs and exits when the connection
/// closes; subsequent statements fail with `Unavailable`.
pub async fn connect(url: &str) -> Result<Client> {
    let parsed = url::Url::parse(url)
        .map_err(|err| Error::invalid_argument(format!("invalid database URL: {err}")))?;

    match parsed.scheme() {
        "postgresql" | "postgres" => {}
        scheme => {
            return Err(Error::invalid_argument(format!(
                "unsupported database URL scheme `{scheme}`"
            )))
        }
    }

    let mut config = Config::new();

    if let Some(host) = parsed.host_str() {
        config.host(host);
    }
    if let Some(port) = parsed.port() {
        config.port(port);
    }
    if !parsed.username().is_empty() {
        config.user(parsed.username());
    }
    if let Some(password) = parsed.password() {
        config.password(password);
    }

    let db = parsed.path().trim_start_matches('/');
    if !db.is_empty() {
        config.dbname(db);
    }

    let (client, connection) = config.connect(NoTls).await.map_err(translate)?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(%err, "database connection terminated");
        }
    });

    Ok(client)
}

/// Runs a compiled statement and returns the raw rows.
pub async fn query<C>(client: &C, sql: &Sql) -> Result<Vec<Row>>
where
    C: GenericClient + Sync,
{
    let args: Vec<PgValue> = sql.params.iter().cloned().map(PgValue::from).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = args.iter().map(|arg| arg as _).collect();

    client.query(&sql.text, &refs).await.map_err(translate)
}

/// Runs a compiled statement and returns the affected row count.
pub async fn execute<C>(client: &C, sql: &Sql) -> Result<u64>
where
    C: GenericClient + Sync,
{
    let args: Vec<PgValue> = sql.params.iter().cloned().map(PgValue::from).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = args.iter().map(|arg| arg as _).collect();

    client.execute(&sql.text, &refs).await.map_err(translate)
}
