pub mod collection;
pub mod meta;
pub mod ptr;
pub mod weak_ptr;

pub use collection::{Activity, Collection, CollectionCursor, CollectionIter};
pub(crate) use collection::{CollectionEdit, QueryData, RelationData};
pub use meta::DboStatus;
pub(crate) use meta::MetaDbo;
pub use ptr::{DboKey, Ptr};
pub use weak_ptr::WeakPtr;
