use std::any::{Any, TypeId};
use std::sync::Arc;

use super::Session;
use super::mapping::{MappingInfo, MappingOps};
use crate::connection::SqlConnection;
use crate::core::{DboError, Result, SqlValue};
use crate::dbo::{CollectionEdit, DboKey, MetaDbo, Ptr, RelationData};
use crate::persist::Persist;

impl Session {
    pub(crate) fn session_id(&self) -> u64 {
        self.id
    }

    pub(crate) fn check_session(&self, session: u64) -> Result<()> {
        if session == self.id {
            Ok(())
        } else {
            Err(DboError::Usage("object belongs to another session".into()))
        }
    }

    /// Slot key of a non-null handle of this session.
    pub(crate) fn check_ptr<C: Persist>(&self, ptr: &Ptr<C>) -> Result<DboKey> {
        let key = ptr
            .key()
            .ok_or_else(|| DboError::Usage("null pointer dereference".into()))?;
        self.check_session(key.session)?;

        let mapping = self.mapping_index::<C>()?;
        match self.objects.get(key.index) {
            Some(meta) if meta.mapping == mapping => Ok(key),
            Some(meta) => Err(DboError::TypeMismatch(format!(
                "pointer to {} refers to a row of '{}'",
                std::any::type_name::<C>(),
                self.mapping_table(meta.mapping)
            ))),
            None => Err(DboError::Usage("pointer does not refer to an object".into())),
        }
    }

    pub(crate) fn meta(&self, index: usize) -> &MetaDbo {
        &self.objects[index]
    }

    /// Id of the row behind a slot, once it has one.
    pub(crate) fn object_id(&self, index: usize) -> Option<SqlValue> {
        self.objects.get(index).and_then(|meta| meta.id.clone())
    }

    pub(crate) fn mapping_index<C: Persist>(&self) -> Result<usize> {
        self.by_type
            .get(&TypeId::of::<C>())
            .copied()
            .ok_or_else(|| DboError::NotMapped(std::any::type_name::<C>().to_string()))
    }

    pub(crate) fn mapping_table(&self, mapping: usize) -> &str {
        &self.mappings[mapping].table_name
    }

    pub(crate) fn mapping_info(&self, mapping: usize) -> &MappingInfo {
        &self.mappings[mapping].info
    }

    pub(crate) fn ops(&self, mapping: usize) -> Arc<dyn MappingOps> {
        Arc::clone(&self.mappings[mapping].ops)
    }

    pub(crate) fn connection(&self) -> &dyn SqlConnection {
        self.conn.as_ref()
    }

    // ------------------------------------------------------------------
    // Object slots
    // ------------------------------------------------------------------

    /// Slot for the row `id` of a mapping; a new unloaded slot if the row
    /// was not seen before.
    pub(crate) fn lazy_index(&mut self, mapping: usize, id: SqlValue) -> usize {
        if let Some(&index) = self.registry.get(&(mapping, id.clone())) {
            return index;
        }

        let index = self.objects.len();
        self.objects.push(MetaDbo::persisted(mapping, id.clone()));
        self.registry.insert((mapping, id), index);
        index
    }

    /// Records the id assigned to a slot by its insert.
    pub(crate) fn register_object(&mut self, index: usize, id: SqlValue) {
        let meta = &mut self.objects[index];
        if let Some(old) = meta.id.take() {
            self.registry.remove(&(meta.mapping, old));
        }
        meta.id = Some(id.clone());
        self.registry.insert((meta.mapping, id), index);
    }

    /// Drops a slot from the registry so the id can be looked up anew.
    pub(crate) fn forget(&mut self, index: usize) {
        let meta = &mut self.objects[index];
        if let Some(id) = meta.id.clone() {
            if self.registry.get(&(meta.mapping, id.clone())) == Some(&index) {
                self.registry.remove(&(meta.mapping, id));
            }
        }
        meta.set(MetaDbo::PURGED);
        meta.obj = None;
    }

    pub(crate) fn store_loaded(&mut self, index: usize, obj: Box<dyn Any>, version: i64) {
        let meta = &mut self.objects[index];
        meta.obj = Some(obj);
        meta.version = version;
    }

    /// Slot for a selected row, loading the object unless it is already in
    /// memory.
    pub(crate) fn load_from_row(&mut self, mapping: usize, row: &[SqlValue]) -> Result<usize> {
        let id = self.mapping_info(mapping).id_from_row(row)?;
        let index = self.lazy_index(mapping, id);

        if !self.objects[index].is_loaded() {
            let ops = self.ops(mapping);
            ops.load_row(self, index, row)?;
        }
        Ok(index)
    }

    pub(crate) fn ensure_loaded(&mut self, index: usize) -> Result<()> {
        let meta = &self.objects[index];
        if meta.is_loaded() {
            return Ok(());
        }
        if meta.is(MetaDbo::PURGED) {
            return Err(DboError::ObjectNotFound {
                table: self.mapping_table(meta.mapping).to_string(),
                id: meta.id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
            });
        }

        self.require_transaction()?;
        let ops = self.ops(meta.mapping);
        ops.load(self, index)
    }

    pub(crate) fn object_ref<C: Persist>(&self, index: usize) -> Result<&C> {
        self.objects[index]
            .obj
            .as_ref()
            .ok_or_else(|| DboError::Consistency("object is in use".into()))?
            .downcast_ref::<C>()
            .ok_or_else(|| DboError::TypeMismatch(std::any::type_name::<C>().to_string()))
    }

    pub(crate) fn object_mut<C: Persist>(&mut self, index: usize) -> Result<&mut C> {
        self.objects[index]
            .obj
            .as_mut()
            .ok_or_else(|| DboError::Consistency("object is in use".into()))?
            .downcast_mut::<C>()
            .ok_or_else(|| DboError::TypeMismatch(std::any::type_name::<C>().to_string()))
    }

    /// Runs `f` on the object in a slot with the session available.
    ///
    /// The object is taken out of its slot for the duration, so a nested
    /// access to the same slot fails instead of aliasing.
    pub(crate) fn with_object<C: Persist, R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Session, &mut C) -> Result<R>,
    ) -> Result<R> {
        self.ensure_loaded(index)?;

        let meta = &mut self.objects[index];
        let obj = meta
            .obj
            .take()
            .ok_or_else(|| DboError::Consistency("object is in use".into()))?;
        let mut obj = match obj.downcast::<C>() {
            Ok(obj) => obj,
            Err(obj) => {
                meta.obj = Some(obj);
                return Err(DboError::TypeMismatch(std::any::type_name::<C>().to_string()));
            }
        };
        meta.set(MetaDbo::CHECKED_OUT);

        let result = f(self, &mut obj);

        let meta = &mut self.objects[index];
        meta.clear(MetaDbo::CHECKED_OUT);
        meta.obj = Some(obj as Box<dyn Any>);
        result
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    /// Points the `belongs_to` named `join_name` of `item` at an owner, or
    /// clears it.
    pub(crate) fn set_reciproce(
        &mut self,
        item: DboKey,
        join_name: &str,
        owner: Option<(DboKey, usize)>,
    ) -> Result<()> {
        self.check_session(item.session)?;
        let ops = self.ops(self.objects[item.index].mapping);
        ops.set_reciproce(self, item.index, join_name, owner)?;
        self.mark_dirty(item.index);
        Ok(())
    }

    /// Buffers a many-to-many edit in the owner's collection.
    pub(crate) fn edit_collection(&mut self, relation: &RelationData, edit: CollectionEdit) -> Result<()> {
        self.check_session(relation.owner.session)?;
        let ops = self.ops(relation.owner_mapping);
        ops.edit_collection(self, relation.owner.index, relation.set_index, edit)?;
        self.mark_dirty(relation.owner.index);
        Ok(())
    }
}
