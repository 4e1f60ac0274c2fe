use super::session_add::relation_data;
use crate::core::{DboError, Result, SetInfo, SqlValue};
use crate::dbo::{DboKey, Ptr, RelationData};
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef, WeakPtrRef};
use crate::session::Session;
use crate::session::statements::{SQL_SELECT_BY_ID, StatementKey};
use crate::sql_traits::SqlValueTraits;

/// Reads one object from a selected row.
///
/// Columns are consumed in declaration order starting at the first field
/// column; referenced objects are registered lazily, and relation fields
/// are bound to the object's slot.
pub(crate) struct LoadDbAction<'a> {
    session: &'a mut Session,
    row: &'a [SqlValue],
    column: usize,
    owner: DboKey,
    owner_mapping: usize,
    sets: Vec<SetInfo>,
    set_index: usize,
}

impl<'a> LoadDbAction<'a> {
    fn next_value(&mut self, name: &str) -> Result<SqlValue> {
        let value = self.row.get(self.column).cloned().ok_or_else(|| {
            DboError::Consistency(format!("selected row has no column for '{}'", name))
        })?;
        self.column += 1;
        Ok(value)
    }

    fn next_relation(&mut self) -> Result<RelationData> {
        let set = self.sets.get(self.set_index).ok_or_else(|| {
            DboError::Consistency("persist() declared more relations than were mapped".into())
        })?;
        let relation = relation_data(set, self.owner, self.owner_mapping, self.set_index);
        self.set_index += 1;
        Ok(relation)
    }
}

impl Action for LoadDbAction<'_> {
    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        let value = self.next_value(field.name)?;
        *field.value = V::from_value(value)
            .map_err(|e| DboError::TypeMismatch(format!("column '{}': {}", field.name, e)))?;
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        let value = self.next_value(field.name)?;
        *field.value = if value.is_null() {
            Ptr::null()
        } else {
            let target = self.session.mapping_index::<C>()?;
            let index = self.session.lazy_index(target, value);
            Ptr::from_key(DboKey::new(self.session.session_id(), index))
        };
        Ok(())
    }

    fn act_weak_ptr<C: Persist>(&mut self, field: WeakPtrRef<'_, C>) -> Result<()> {
        let relation = self.next_relation()?;
        field.value.bind_relation(relation);
        Ok(())
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        let relation = self.next_relation()?;
        field.value.bind_relation(relation);
        Ok(())
    }

    fn is_reading(&self) -> bool {
        true
    }
}

/// Loads the object in slot `index` from a row laid out as
/// `[surrogate id][version][fields...]`.
pub(crate) fn load_row<C: Persist>(session: &mut Session, index: usize, row: &[SqlValue]) -> Result<()> {
    let owner_mapping = session.meta(index).mapping;
    let info = session.mapping_info(owner_mapping);

    if row.len() < info.first_field_column() + info.fields.len() {
        return Err(DboError::Consistency(format!(
            "row of '{}' has {} columns, expected {}",
            info.table_name,
            row.len(),
            info.first_field_column() + info.fields.len()
        )));
    }

    let version = match info.version_column() {
        Some(column) => row[column].as_i64().ok_or_else(|| {
            DboError::TypeMismatch(format!(
                "version of '{}' is {}",
                info.table_name,
                row[column].type_name()
            ))
        })?,
        None => 0,
    };
    let column = info.first_field_column();
    let sets = info.sets.clone();

    let mut obj = C::default();
    let mut action = LoadDbAction {
        owner: DboKey::new(session.session_id(), index),
        session: &mut *session,
        row,
        column,
        owner_mapping,
        sets,
        set_index: 0,
    };
    obj.persist(&mut action)?;

    session.store_loaded(index, Box::new(obj), version);
    Ok(())
}

/// Loads the object in slot `index` by its id.
pub(crate) fn load_object<C: Persist>(session: &mut Session, index: usize) -> Result<()> {
    let meta = session.meta(index);
    let mapping = meta.mapping;
    let id = meta
        .id
        .clone()
        .ok_or_else(|| DboError::Consistency("cannot load an object without id".into()))?;

    let rows = session.query_rows(StatementKey::Mapped(mapping, SQL_SELECT_BY_ID), vec![id.clone()])?;
    match rows.as_slice() {
        [] => Err(DboError::ObjectNotFound {
            table: session.mapping_table(mapping).to_string(),
            id: id.to_string(),
        }),
        [row] => load_row::<C>(session, index, row),
        _ => Err(DboError::Consistency(format!(
            "{} rows in '{}' for id {}",
            rows.len(),
            session.mapping_table(mapping),
            id
        ))),
    }
}
