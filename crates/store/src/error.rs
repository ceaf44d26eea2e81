use cachecore_query::QueryError;
use cachecore_schema::SchemaError;
use cachecore_snapshot::SnapshotError;
use cachecore_table::TableError;
use thiserror::Error;

/// The one error type crossing every store operation's boundary. Each
/// variant maps onto an error kind from the wire contract; a transport adapter
/// packages this into a single uniform error message, as callers only ever
/// see one domain error kind carrying the server's message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record with primary key {0:?} in type `{1}`")]
    NotFound(String, String),
    #[error("query has an and-block with no indexable predicate")]
    NotIndexable,
    #[error("record does not match the declared schema of type `{0}`: {1}")]
    SchemaMismatch(String, String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("dump is corrupt: {0}")]
    DumpCorrupt(String),
    #[error("store is not empty")]
    StoreNotEmpty,
    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::NotFound(key, type_name) => StoreError::NotFound(format!("{key:?}"), type_name),
            TableError::SchemaMismatch(type_name, detail) => StoreError::SchemaMismatch(type_name, detail),
            TableError::UnknownKey(key, type_name) => {
                StoreError::InvalidQuery(format!("key `{key}` is not declared on type `{type_name}`"))
            }
        }
    }
}

impl From<QueryError> for StoreError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::UnknownKey(key) => StoreError::InvalidQuery(format!("key `{key}` is not declared on this type")),
            QueryError::InvalidPredicate(op, key, reason) => {
                StoreError::InvalidQuery(format!("{op:?} against `{key}` is invalid: {reason}"))
            }
            QueryError::NotIndexable => StoreError::NotIndexable,
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::AlreadyRegisteredWithDifferentSchema(name) => {
                StoreError::SchemaMismatch(name, "already registered with a different schema".into())
            }
            SchemaError::UnknownType(name) => StoreError::UnknownType(name),
            SchemaError::UnknownKey(name) => StoreError::InvalidQuery(format!("unknown key `{name}`")),
        }
    }
}

impl From<SnapshotError> for StoreError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(e) => StoreError::IoFailure(e),
            SnapshotError::Corrupt(path) => StoreError::DumpCorrupt(format!("missing schema.json under {}", path.display())),
            other => StoreError::DumpCorrupt(other.to_string()),
        }
    }
}

impl From<cachecore_commitlog::LogError> for StoreError {
    fn from(err: cachecore_commitlog::LogError) -> Self {
        StoreError::IoFailure(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
    }
}
