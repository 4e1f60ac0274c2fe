use crate::core::{DboError, Result, SqlValue};
use crate::dbo::{DboKey, Ptr};
use crate::persist::{Action, FieldRef, Persist, PtrRef};
use crate::session::Session;
use crate::sql_traits::SqlValueTraits;

/// Reads the declared columns of an object as values, a `belongs_to` as the
/// referenced object's id.
pub(crate) struct ToValuesAction<'a> {
    session: &'a Session,
    values: Vec<SqlValue>,
    natural_id: Option<SqlValue>,
}

impl Action for ToValuesAction<'_> {
    fn act_id<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        let value = field.value.try_to_value()?;
        self.natural_id = Some(value.clone());
        self.values.push(value);
        Ok(())
    }

    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        self.values.push(field.value.try_to_value()?);
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        let value = field
            .value
            .key()
            .and_then(|key| self.session.object_id(key.index))
            .unwrap_or(SqlValue::Null);
        self.values.push(value);
        Ok(())
    }
}

/// Writes one declared column, by position among the declared columns.
pub(crate) struct FromValueAction<'a> {
    session: &'a mut Session,
    target: usize,
    current: usize,
    value: Option<SqlValue>,
}

impl FromValueAction<'_> {
    fn is_target(&mut self) -> Option<SqlValue> {
        let hit = self.current == self.target;
        self.current += 1;
        if hit { self.value.take() } else { None }
    }
}

impl Action for FromValueAction<'_> {
    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        if let Some(value) = self.is_target() {
            *field.value = V::from_value(value)
                .map_err(|e| DboError::TypeMismatch(format!("column '{}': {}", field.name, e)))?;
        }
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        if let Some(value) = self.is_target() {
            *field.value = if value.is_null() {
                Ptr::null()
            } else {
                let target = self.session.mapping_index::<C>()?;
                let index = self.session.lazy_index(target, value);
                Ptr::from_key(DboKey::new(self.session.session_id(), index))
            };
        }
        Ok(())
    }
}

fn collect_values<C: Persist>(session: &mut Session, index: usize) -> Result<(Vec<SqlValue>, Option<SqlValue>)> {
    session.with_object::<C, _>(index, |session, obj| {
        let mut action = ToValuesAction {
            session: &*session,
            values: Vec::new(),
            natural_id: None,
        };
        obj.persist(&mut action)?;
        Ok((action.values, action.natural_id))
    })
}

/// Value of the natural id field, if the class declares one.
pub(crate) fn natural_id<C: Persist>(session: &mut Session, index: usize) -> Result<Option<SqlValue>> {
    Ok(collect_values::<C>(session, index)?.1)
}

/// All columns in row layout: `[surrogate id][version][fields...]`.
pub(crate) fn to_values<C: Persist>(session: &mut Session, index: usize) -> Result<Vec<SqlValue>> {
    let (fields, _) = collect_values::<C>(session, index)?;

    let meta = session.meta(index);
    let info = session.mapping_info(meta.mapping);
    let mut values = Vec::with_capacity(info.first_field_column() + fields.len());
    if info.surrogate_id.is_some() {
        values.push(meta.id.clone().unwrap_or(SqlValue::Null));
    }
    if info.is_versioned() {
        values.push(SqlValue::Integer(meta.version));
    }
    values.extend(fields);
    Ok(values)
}

/// Sets declared column `field` from a value.
pub(crate) fn from_value<C: Persist>(session: &mut Session, index: usize, field: usize, value: SqlValue) -> Result<()> {
    session.with_object::<C, _>(index, |session, obj| {
        let mut action = FromValueAction {
            session,
            target: field,
            current: 0,
            value: Some(value),
        };
        obj.persist(&mut action)?;

        if action.value.is_some() {
            Err(DboError::Usage(format!("no column at position {}", field)))
        } else {
            Ok(())
        }
    })
}
