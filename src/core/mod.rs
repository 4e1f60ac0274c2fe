pub mod error;
pub mod types;
pub mod value;

pub use error::{DboError, Result};
pub use types::{
    FieldInfo, FieldKind, FkConstraints, RelationType, Row, SetInfo, SqlDateTimeType,
};
pub use value::SqlValue;
