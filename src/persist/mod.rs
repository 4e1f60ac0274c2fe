// ============================================================================
// Persistent Class Contract
// ============================================================================
//
// A persistent class describes its columns and relations once, in
// `persist()`. Every action (schema introspection, saving, loading,
// transaction bookkeeping) walks that same declaration through the
// `Action` callbacks.
//
// ============================================================================

mod field;

pub use field::{
    CollectionRef, FieldRef, PtrRef, WeakPtrRef, belongs_to, belongs_to_with, field, field_sized,
    has_many, has_many_joined, has_one, id,
};

use crate::core::Result;
use crate::sql_traits::SqlValueTraits;

/// A class that can be mapped to a table.
///
/// Implement by hand or with `#[derive(Persist)]`:
///
/// ```
/// use rustdbo::prelude::*;
///
/// #[derive(Default)]
/// struct Post {
///     title: String,
///     author: Ptr<User>,
/// }
///
/// #[derive(Default)]
/// struct User {
///     name: String,
///     posts: Collection<Post>,
/// }
///
/// impl Persist for Post {
///     fn persist<A: Action>(&mut self, a: &mut A) -> Result<()> {
///         field(a, &mut self.title, "title")?;
///         belongs_to(a, &mut self.author, "author")
///     }
/// }
///
/// impl Persist for User {
///     fn persist<A: Action>(&mut self, a: &mut A) -> Result<()> {
///         field(a, &mut self.name, "name")?;
///         has_many(a, &mut self.posts, RelationType::ManyToOne, "author")
///     }
/// }
/// ```
pub trait Persist: Default + 'static {
    fn persist<A: Action>(&mut self, action: &mut A) -> Result<()>;

    /// Name of the auto-incremented id column, or `None` when the class
    /// declares a natural id.
    fn surrogate_id_field() -> Option<&'static str> {
        Some("id")
    }

    /// Name of the optimistic locking column, or `None` to disable it.
    fn version_field() -> Option<&'static str> {
        Some("version")
    }
}

/// Visitor over a `persist()` declaration.
pub trait Action {
    /// A natural id field.
    fn act_id<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        self.act(field)
    }

    /// A value column.
    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()>;

    /// A belongs-to reference.
    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()>;

    /// The one side of a one-to-one relation.
    fn act_weak_ptr<C: Persist>(&mut self, _field: WeakPtrRef<'_, C>) -> Result<()> {
        Ok(())
    }

    /// The many side of a relation.
    fn act_collection<C: Persist>(&mut self, _field: CollectionRef<'_, C>) -> Result<()> {
        Ok(())
    }

    /// Whether the action reads values into the object.
    fn is_reading(&self) -> bool {
        false
    }

    /// Whether the action writes values to the database.
    fn is_writing(&self) -> bool {
        false
    }

    /// Whether the action only inspects the declaration.
    fn is_schema(&self) -> bool {
        false
    }
}
