use super::{Action, Persist};
use crate::core::{FkConstraints, RelationType, Result};
use crate::dbo::{Collection, Ptr, WeakPtr};
use crate::sql_traits::SqlValueTraits;

/// A value column as seen by an action.
pub struct FieldRef<'a, V> {
    pub value: &'a mut V,
    pub name: &'a str,
    /// Declared size, -1 when none.
    pub size: i32,
}

pub struct PtrRef<'a, C> {
    pub value: &'a mut Ptr<C>,
    pub name: &'a str,
    pub constraints: FkConstraints,
}

pub struct WeakPtrRef<'a, C> {
    pub value: &'a mut WeakPtr<C>,
    pub join_name: &'a str,
}

pub struct CollectionRef<'a, C> {
    pub value: &'a mut Collection<C>,
    pub relation: RelationType,
    pub join_name: &'a str,
    pub join_id: Option<&'a str>,
    pub constraints: FkConstraints,
}

/// Declares a natural primary key.
pub fn id<A: Action, V: SqlValueTraits>(
    action: &mut A,
    value: &mut V,
    name: &str,
    size: i32,
) -> Result<()> {
    action.act_id(FieldRef { value, name, size })
}

/// Declares a value column.
pub fn field<A: Action, V: SqlValueTraits>(action: &mut A, value: &mut V, name: &str) -> Result<()> {
    field_sized(action, value, name, -1)
}

/// Declares a value column with a size, e.g. `varchar(size)` for strings.
pub fn field_sized<A: Action, V: SqlValueTraits>(
    action: &mut A,
    value: &mut V,
    name: &str,
    size: i32,
) -> Result<()> {
    action.act(FieldRef { value, name, size })
}

/// Declares a reference to another object; the column is named
/// `<name>_<target id>`.
pub fn belongs_to<A: Action, C: Persist>(action: &mut A, value: &mut Ptr<C>, name: &str) -> Result<()> {
    belongs_to_with(action, value, name, FkConstraints::NONE)
}

pub fn belongs_to_with<A: Action, C: Persist>(
    action: &mut A,
    value: &mut Ptr<C>,
    name: &str,
    constraints: FkConstraints,
) -> Result<()> {
    action.act_ptr(PtrRef {
        value,
        name,
        constraints,
    })
}

/// Declares the many side of a relation.
///
/// For `ManyToOne`, `join_name` is the `belongs_to` name on the other class.
/// For `ManyToMany`, it names the join table; when empty the table is named
/// after both classes.
pub fn has_many<A: Action, C: Persist>(
    action: &mut A,
    value: &mut Collection<C>,
    relation: RelationType,
    join_name: &str,
) -> Result<()> {
    action.act_collection(CollectionRef {
        value,
        relation,
        join_name,
        join_id: None,
        constraints: FkConstraints::NONE,
    })
}

/// Many-to-many relation with an explicit join table column for this side,
/// needed when both sides map to the same table.
pub fn has_many_joined<A: Action, C: Persist>(
    action: &mut A,
    value: &mut Collection<C>,
    join_name: &str,
    join_id: &str,
    constraints: FkConstraints,
) -> Result<()> {
    action.act_collection(CollectionRef {
        value,
        relation: RelationType::ManyToMany,
        join_name,
        join_id: Some(join_id),
        constraints,
    })
}

/// Declares the one side of a one-to-one relation, where the other class
/// holds a `belongs_to` named `join_name`.
pub fn has_one<A: Action, C: Persist>(action: &mut A, value: &mut WeakPtr<C>, join_name: &str) -> Result<()> {
    action.act_weak_ptr(WeakPtrRef { value, join_name })
}
