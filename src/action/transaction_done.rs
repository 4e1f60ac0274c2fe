use crate::core::Result;
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef};
use crate::session::Session;
use crate::sql_traits::SqlValueTraits;

/// Settles the many-to-many edits of one object when its transaction ends.
///
/// On commit the written edits are forgotten; on rollback they become
/// pending again so the next flush writes them anew.
pub(crate) struct TransactionDoneAction {
    success: bool,
    pending: bool,
}

impl Action for TransactionDoneAction {
    fn act<V: SqlValueTraits>(&mut self, _field: FieldRef<'_, V>) -> Result<()> {
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, _field: PtrRef<'_, C>) -> Result<()> {
        Ok(())
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        if let Some(activity) = field.value.existing_activity_mut() {
            activity.transaction_done(self.success);
            self.pending |= !activity.is_empty();
        }
        field.value.drop_idle_activity();
        Ok(())
    }

    fn is_reading(&self) -> bool {
        true
    }
}

/// Returns true when the object still has edits to write.
pub(crate) fn collections_done<C: Persist>(session: &mut Session, index: usize, success: bool) -> Result<bool> {
    if !session.meta(index).is_loaded() {
        return Ok(false);
    }

    session.with_object::<C, _>(index, |_, obj| {
        let mut action = TransactionDoneAction {
            success,
            pending: false,
        };
        obj.persist(&mut action)?;
        Ok(action.pending)
    })
}
