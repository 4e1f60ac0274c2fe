use crate::core::{DboError, Result};
use crate::dbo::{CollectionEdit, DboKey, Ptr};
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef, WeakPtrRef};
use crate::session::Session;
use crate::sql_traits::SqlValueTraits;

/// Points the `belongs_to` named `join_name` at an owner, or clears it.
///
/// This keeps the many side of a relation and the one side's reference in
/// agreement: inserting into a many-to-one collection or resetting a weak
/// pointer is stored as the item's foreign key.
pub(crate) struct SetReciproceAction<'a> {
    session: &'a Session,
    join_name: &'a str,
    owner: Option<(DboKey, usize)>,
    found: bool,
}

impl Action for SetReciproceAction<'_> {
    fn act<V: SqlValueTraits>(&mut self, _field: FieldRef<'_, V>) -> Result<()> {
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        if field.name != self.join_name {
            return Ok(());
        }

        match self.owner {
            Some((owner, owner_mapping)) => {
                if self.session.mapping_index::<C>()? == owner_mapping {
                    *field.value = Ptr::from_key(owner);
                    self.found = true;
                }
            }
            None => {
                field.value.reset();
                self.found = true;
            }
        }
        Ok(())
    }
}

/// Applies an insert or erase to the many-to-many collection declared as
/// relation `set_index`.
pub(crate) struct CollectionEditAction {
    set_index: usize,
    current: usize,
    edit: CollectionEdit,
    applied: bool,
}

impl Action for CollectionEditAction {
    fn act<V: SqlValueTraits>(&mut self, _field: FieldRef<'_, V>) -> Result<()> {
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, _field: PtrRef<'_, C>) -> Result<()> {
        Ok(())
    }

    fn act_weak_ptr<C: Persist>(&mut self, _field: WeakPtrRef<'_, C>) -> Result<()> {
        self.current += 1;
        Ok(())
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        if self.current == self.set_index {
            let activity = field.value.activity_mut();
            match self.edit {
                CollectionEdit::Insert(key) => activity.insert(Ptr::from_key(key)),
                CollectionEdit::Erase(key) => activity.erase(Ptr::from_key(key)),
            }
            field.value.drop_idle_activity();
            self.applied = true;
        }
        self.current += 1;
        Ok(())
    }
}

pub(crate) fn set_reciproce<C: Persist>(
    session: &mut Session,
    index: usize,
    join_name: &str,
    owner: Option<(DboKey, usize)>,
) -> Result<()> {
    session.with_object::<C, _>(index, |session, obj| {
        let mut action = SetReciproceAction {
            session: &*session,
            join_name,
            owner,
            found: false,
        };
        obj.persist(&mut action)?;

        if action.found {
            Ok(())
        } else {
            Err(DboError::Mapping(format!(
                "'{}' has no belongs_to '{}' for this relation",
                session.mapping_table(session.meta(index).mapping),
                join_name
            )))
        }
    })
}

pub(crate) fn edit_collection<C: Persist>(
    session: &mut Session,
    index: usize,
    set_index: usize,
    edit: CollectionEdit,
) -> Result<()> {
    session.with_object::<C, _>(index, |_, obj| {
        let mut action = CollectionEditAction {
            set_index,
            current: 0,
            edit,
            applied: false,
        };
        obj.persist(&mut action)?;

        if action.applied {
            Ok(())
        } else {
            Err(DboError::Consistency(format!("relation {} not found", set_index)))
        }
    })
}
