use crate::core::{DboError, RelationType, Result, SetInfo};
use crate::dbo::{DboKey, RelationData};
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef, WeakPtrRef};
use crate::session::Session;
use crate::sql_traits::SqlValueTraits;

/// Binding of relation `set_index` of an owner object.
pub(crate) fn relation_data(set: &SetInfo, owner: DboKey, owner_mapping: usize, set_index: usize) -> RelationData {
    RelationData {
        owner,
        owner_mapping,
        set_index,
        statement_index: set.statement_index,
        relation: set.relation,
        join_name: set.join_name.clone(),
    }
}

/// Binds the collections and weak pointers of an object to its slot.
///
/// Edits made on a many-to-one collection before the object was added are
/// collected so they can be applied to the items' `belongs_to` afterwards.
/// Many-to-many edits stay buffered and are written on save.
pub(crate) struct SessionAddAction {
    owner: DboKey,
    owner_mapping: usize,
    sets: Vec<SetInfo>,
    set_index: usize,
    reciproce: Vec<(DboKey, String)>,
}

impl SessionAddAction {
    pub fn new(session: &Session, index: usize) -> Self {
        let owner_mapping = session.meta(index).mapping;
        Self {
            owner: DboKey::new(session.session_id(), index),
            owner_mapping,
            sets: session.mapping_info(owner_mapping).sets.clone(),
            set_index: 0,
            reciproce: Vec::new(),
        }
    }

    fn next_relation(&mut self) -> Result<RelationData> {
        let set = self.sets.get(self.set_index).ok_or_else(|| {
            DboError::Consistency("persist() declared more relations than were mapped".into())
        })?;
        let relation = relation_data(set, self.owner, self.owner_mapping, self.set_index);
        self.set_index += 1;
        Ok(relation)
    }

    /// Items whose `belongs_to` must be pointed at the owner.
    pub fn into_reciproce(self) -> Vec<(DboKey, String)> {
        self.reciproce
    }
}

impl Action for SessionAddAction {
    fn act<V: SqlValueTraits>(&mut self, _field: FieldRef<'_, V>) -> Result<()> {
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, _field: PtrRef<'_, C>) -> Result<()> {
        Ok(())
    }

    fn act_weak_ptr<C: Persist>(&mut self, field: WeakPtrRef<'_, C>) -> Result<()> {
        let relation = self.next_relation()?;
        field.value.bind_relation(relation);
        Ok(())
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        let relation = self.next_relation()?;
        let join_name = relation.join_name.clone();
        field.value.bind_relation(relation);

        if field.relation == RelationType::ManyToOne {
            if let Some(activity) = field.value.existing_activity_mut() {
                let inserted = std::mem::take(&mut activity.inserted);
                activity.erased.clear();
                self.reciproce.extend(
                    inserted
                        .into_iter()
                        .filter_map(|item| item.key())
                        .map(|key| (key, join_name.clone())),
                );
            }
            field.value.drop_idle_activity();
        }
        Ok(())
    }

    fn is_reading(&self) -> bool {
        true
    }
}

/// Binds a newly added object and applies its buffered many-to-one edits.
pub(crate) fn bind_object<C: Persist>(session: &mut Session, index: usize) -> Result<()> {
    let reciproce = session.with_object::<C, _>(index, |session, obj| {
        let mut action = SessionAddAction::new(session, index);
        obj.persist(&mut action)?;
        Ok(action.into_reciproce())
    })?;

    let owner = Some((DboKey::new(session.session_id(), index), session.meta(index).mapping));
    for (item, join_name) in reciproce {
        session.set_reciproce(item, &join_name, owner)?;
    }
    Ok(())
}
