// ============================================================================
// RustDbo Library
// ============================================================================
//
// Object-relational mapping in the unit-of-work style: classes describe
// their columns and relations once in `Persist::persist()`, a `Session`
// maps them to tables, hands out `Ptr` handles and writes changes back
// inside transactions, with optimistic locking on a version column.
//
// ============================================================================

extern crate self as rustdbo;

mod action;
pub mod connection;
pub mod core;
pub mod dbo;
pub mod persist;
pub mod prelude;
pub mod result;
pub mod session;
pub mod sql_traits;
pub mod transaction;

// Re-export main types for convenience
pub use connection::{ConnectionConfig, SqlConnection, SqlStatement, Sqlite3};
pub use core::{DboError, FieldInfo, FkConstraints, RelationType, Result, SqlValue};
pub use dbo::{Collection, DboStatus, Ptr, WeakPtr};
pub use persist::{Action, Persist};
pub use result::QueryResult;
pub use session::{FlushMode, MappingInfo, Session};
pub use sql_traits::{Json, SqlValueTraits};
pub use transaction::{Transaction, TransactionId, TransactionState};

pub use rustdbo_derive::Persist;
