//! Everything needed to declare and use persistent classes.
//!
//! ```
//! use rustdbo::prelude::*;
//! ```

pub use crate::connection::{ConnectionConfig, Sqlite3};
pub use crate::core::{DboError, FkConstraints, RelationType, Result, SqlValue};
pub use crate::dbo::{Collection, DboStatus, Ptr, WeakPtr};
pub use crate::persist::{
    Action, Persist, belongs_to, belongs_to_with, field, field_sized, has_many, has_many_joined,
    has_one, id,
};
pub use crate::session::{FlushMode, Session};
pub use crate::sql_traits::Json;
pub use crate::transaction::Transaction;

pub use rustdbo_derive::Persist;
