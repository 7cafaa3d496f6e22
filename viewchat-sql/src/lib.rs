//! The single analytical view: its description, the read-only guard, and
//! the executors that run validated statements against it.

pub mod error;
pub mod executor;
pub mod guard;
pub mod schema;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::SqlStoreError;
pub use executor::{GuardedExecutor, QueryExecutor, QueryResult, Row};
pub use guard::ReadOnlyGuard;
pub use schema::{ColumnSpec, SchemaContext, SchemaDescriptor, DEFAULT_UNSUPPORTED_MARKER};

#[cfg(feature = "mysql")]
pub use mysql::MySqlQueryExecutor;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteQueryExecutor;
