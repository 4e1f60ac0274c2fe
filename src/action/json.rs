use serde_json::{Map, Number, Value};

use crate::core::{RelationType, Result, SqlValue};
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef, WeakPtrRef};
use crate::session::Session;
use crate::sql_traits::SqlValueTraits;

/// Writes an object as a JSON object.
///
/// Columns become members named after the column, a `belongs_to` gives the
/// referenced id, a one-to-one relation the nested object under
/// `<table>_<join name>`, and a many-to-one collection an array of nested
/// objects under `<table>s_<join name>`. Many-to-many relations are left out.
pub(crate) struct JsonSerializer<'a> {
    session: &'a mut Session,
    object: Map<String, Value>,
}

impl Action for JsonSerializer<'_> {
    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        let value = to_json_value(field.value.try_to_value()?);
        self.object.insert(field.name.to_string(), value);
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        let id = field
            .value
            .key()
            .and_then(|key| self.session.object_id(key.index))
            .map_or(Value::Null, to_json_value);
        self.object.insert(field.name.to_string(), id);
        Ok(())
    }

    fn act_weak_ptr<C: Persist>(&mut self, field: WeakPtrRef<'_, C>) -> Result<()> {
        let name = format!("{}_{}", self.session.table_name::<C>()?, field.join_name);
        let value = match field.value.query(self.session)? {
            Some(target) => self.session.to_json(&target)?,
            None => Value::Null,
        };
        self.object.insert(name, value);
        Ok(())
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        if field.relation != RelationType::ManyToOne {
            return Ok(());
        }

        let name = format!("{}s_{}", self.session.table_name::<C>()?, field.join_name);
        let value = field.value.to_json(self.session)?;
        self.object.insert(name, value);
        Ok(())
    }
}

pub(crate) fn serialize<C: Persist>(session: &mut Session, index: usize) -> Result<Value> {
    let mut object = Map::new();

    let meta = session.meta(index);
    let id = meta.id.clone();
    if let Some(id_field) = &session.mapping_info(meta.mapping).surrogate_id {
        object.insert(id_field.clone(), id.map_or(Value::Null, to_json_value));
    }

    session.with_object::<C, _>(index, |session, obj| {
        let mut action = JsonSerializer { session, object };
        obj.persist(&mut action)?;
        Ok(Value::Object(action.object))
    })
}

/// Numbers and booleans stay native; dates and times use their text form.
pub(crate) fn to_json_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Boolean(b) => Value::Bool(b),
        SqlValue::Blob(bytes) => Value::from(bytes),
        other @ (SqlValue::Date(_) | SqlValue::DateTime(_) | SqlValue::Time(_)) => {
            Value::String(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_json_values() {
        assert_eq!(to_json_value(SqlValue::Integer(7)), Value::from(7));
        assert_eq!(to_json_value(SqlValue::Float(f64::NAN)), Value::Null);
        assert_eq!(to_json_value(SqlValue::Boolean(true)), Value::Bool(true));
        assert_eq!(to_json_value(SqlValue::Blob(vec![1, 2])), serde_json::json!([1, 2]));

        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(to_json_value(SqlValue::Date(day)), Value::from("2024-02-29"));
    }
}
