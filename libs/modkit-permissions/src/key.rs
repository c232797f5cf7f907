//! Key types usable as grantee and resource identifiers.

use std::fmt::Debug;

use sea_orm::TryGetable;
use sea_orm::sea_query::{ColumnType, Value};
use uuid::Uuid;

/// A primary-key type of a grantee or resource collection.
///
/// The engine is generic over two of these (grantee key `U`, resource key
/// `R`), so a relation keyed by `Uuid` can never be queried with an `i64`.
///
/// `Ord` must agree with how the key sorts in process; the batch resolver
/// only relies on database ordering for adjacency, never for collation.
pub trait GrantKey:
    Clone + Ord + Debug + Send + Sync + Into<Value> + TryGetable + 'static
{
    /// Storage column type for this key.
    fn column_type() -> ColumnType;

    /// Typed SQL `NULL` for this key.
    fn null_value() -> Value;

    /// Converts an optional key into a bindable value.
    fn to_value(key: Option<&Self>) -> Value {
        key.map_or_else(Self::null_value, |k| k.clone().into())
    }
}

impl GrantKey for i32 {
    fn column_type() -> ColumnType {
        ColumnType::Integer
    }

    fn null_value() -> Value {
        Value::Int(None)
    }
}

impl GrantKey for i64 {
    fn column_type() -> ColumnType {
        ColumnType::BigInteger
    }

    fn null_value() -> Value {
        Value::BigInt(None)
    }
}

impl GrantKey for String {
    fn column_type() -> ColumnType {
        ColumnType::Text
    }

    fn null_value() -> Value {
        Value::String(None)
    }
}

impl GrantKey for Uuid {
    fn column_type() -> ColumnType {
        ColumnType::Uuid
    }

    fn null_value() -> Value {
        Value::Uuid(None)
    }
}
