use tably_core::{Error, ErrorKind};

use tokio_postgres::error::SqlState;

/// Maps a database error onto the crate's error kinds so callers can
/// branch on semantics (duplicate key, missing table, lost connection)
/// instead of SQLSTATE codes.
pub fn translate(err: tokio_postgres::Error) -> Error {
    if let Some(db) = err.as_db_error() {
        let kind = kind_for(db.code());
        let message = db.message().to_string();
        return Error::new(kind, message).with_source(err);
    }

    if err.is_closed() {
        return Error::unavailable("database connection is closed").with_source(err);
    }

    Error::internal("database request failed").with_source(err)
}

fn kind_for(code: &SqlState) -> ErrorKind {
    match *code {
        SqlState::UNIQUE_VIOLATION => ErrorKind::AlreadyExists,
        SqlState::FOREIGN_KEY_VIOLATION => ErrorKind::FailedPrecondition,
        SqlState::NOT_NULL_VIOLATION
        | SqlState::CHECK_VIOLATION
        | SqlState::NUMERIC_VALUE_OUT_OF_RANGE
        | SqlState::INVALID_TEXT_REPRESENTATION
        | SqlState::UNDEFINED_COLUMN
        | SqlState::SYNTAX_ERROR => ErrorKind::InvalidArgument,
        SqlState::UNDEFINED_TABLE | SqlState::INVALID_CATALOG_NAME => ErrorKind::NotFound,
        SqlState::INVALID_PASSWORD | SqlState::INVALID_AUTHORIZATION_SPECIFICATION => {
            ErrorKind::Unauthenticated
        }
        SqlState::T_R_SERIALIZATION_FAILURE
        | SqlState::T_R_DEADLOCK_DETECTED
        | SqlState::IN_FAILED_SQL_TRANSACTION => ErrorKind::Aborted,
        SqlState::CONNECTION_EXCEPTION
        | SqlState::CONNECTION_FAILURE
        | SqlState::CONNECTION_DOES_NOT_EXIST
        | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
        | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
        | SqlState::TOO_MANY_CONNECTIONS
        | SqlState::ADMIN_SHUTDOWN
        | SqlState::CANNOT_CONNECT_NOW => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    }
}
