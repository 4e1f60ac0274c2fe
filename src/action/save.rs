use crate::connection::SqlStatement;
use crate::core::{DboError, RelationType, Result, SetInfo, SqlValue};
use crate::dbo::{Collection, DboKey, MetaDbo};
use crate::persist::{Action, CollectionRef, FieldRef, Persist, PtrRef, WeakPtrRef};
use crate::session::Session;
use crate::session::statements::{SQL_INSERT, SQL_UPDATE, StatementKey};
use crate::sql_traits::SqlValueTraits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Flush referenced objects so their ids exist.
    Dependencies,
    /// Insert or update the object's own row.
    Row,
    /// Write buffered many-to-many edits to the join tables.
    Sets,
}

/// Writes one object.
///
/// Insert binds `[version][fields...]`; update binds the same followed by
/// `[id][version in database]`. An update that does not hit exactly one row
/// means another session changed or deleted the row: a stale object.
pub(crate) struct SaveDbAction<'a> {
    session: &'a mut Session,
    index: usize,
    mapping: usize,
    table: String,
    versioned: bool,
    surrogate: bool,
    sets: Vec<SetInfo>,
    pass: Pass,
    is_insert: bool,
    statement: Option<Box<dyn SqlStatement>>,
    column: usize,
    natural_id: Option<SqlValue>,
    set_index: usize,
    need_sets_pass: bool,
}

impl<'a> SaveDbAction<'a> {
    pub fn new(session: &'a mut Session, index: usize) -> Self {
        let mapping = session.meta(index).mapping;
        let info = session.mapping_info(mapping);
        let table = info.table_name.clone();
        let versioned = info.is_versioned();
        let surrogate = info.surrogate_id.is_some();
        let sets = info.sets.clone();

        Self {
            session,
            index,
            mapping,
            table,
            versioned,
            surrogate,
            sets,
            pass: Pass::Dependencies,
            is_insert: false,
            statement: None,
            column: 0,
            natural_id: None,
            set_index: 0,
            need_sets_pass: false,
        }
    }

    fn start_pass(&mut self, pass: Pass) {
        self.pass = pass;
        self.set_index = 0;
    }

    fn bind(&mut self, value: SqlValue) {
        if let Some(statement) = self.statement.as_mut() {
            statement.bind(self.column, value);
            self.column += 1;
        }
    }

    pub fn visit<C: Persist>(&mut self, obj: &mut C) -> Result<()> {
        self.start_pass(Pass::Dependencies);
        obj.persist(self)?;

        let meta = self.session.meta(self.index);
        self.is_insert = meta.is(MetaDbo::DELETED_IN_TRANSACTION) || meta.is_new();
        let version = meta.version;

        let key = StatementKey::Mapped(
            self.mapping,
            if self.is_insert { SQL_INSERT } else { SQL_UPDATE },
        );
        let mut statement = self.session.take_statement(&key)?;
        statement.reset();
        self.statement = Some(statement);
        self.column = 0;
        if self.versioned {
            self.bind(SqlValue::Integer(version + 1));
        }

        self.start_pass(Pass::Row);
        let result = obj.persist(self).and_then(|_| self.exec());
        if let Some(statement) = self.statement.take() {
            self.session.put_statement(key, statement);
        }
        result?;

        if self.need_sets_pass {
            self.start_pass(Pass::Sets);
            obj.persist(self)?;
        }
        Ok(())
    }

    fn exec(&mut self) -> Result<()> {
        let meta = self.session.meta(self.index);
        let id = meta.id.clone();
        let version = meta.version;
        let database_version = meta.database_version();

        if !self.is_insert {
            let id = id
                .clone()
                .ok_or_else(|| DboError::Consistency(format!("updating a row of '{}' without id", self.table)))?;
            self.bind(id);
            if self.versioned {
                self.bind(SqlValue::Integer(database_version));
            }
        }

        let statement = self
            .statement
            .as_mut()
            .ok_or_else(|| DboError::NoStatement(format!("no save statement for '{}'", self.table)))?;
        statement.execute()?;

        if self.is_insert {
            let id = if self.surrogate {
                SqlValue::Integer(statement.inserted_id())
            } else {
                self.natural_id.take().ok_or_else(|| {
                    DboError::Mapping(format!("table '{}' has no id to insert", self.table))
                })?
            };
            self.session.register_object(self.index, id);
        } else if statement.affected_row_count() != 1 {
            let id = id.map(|v| v.to_string()).unwrap_or_default();
            return Err(if self.versioned {
                DboError::StaleObject {
                    table: self.table.clone(),
                    id,
                    version,
                }
            } else {
                DboError::ObjectNotFound {
                    table: self.table.clone(),
                    id,
                }
            });
        }
        Ok(())
    }

    fn next_set(&mut self) -> Result<SetInfo> {
        let set = self.sets.get(self.set_index).cloned().ok_or_else(|| {
            DboError::Consistency("persist() declared more relations than were mapped".into())
        })?;
        self.set_index += 1;
        Ok(set)
    }

    fn write_join_edits<C>(&mut self, set: &SetInfo, collection: &mut Collection<C>) -> Result<()> {
        let Some(activity) = collection.existing_activity_mut() else {
            return Ok(());
        };
        if activity.is_empty() {
            return Ok(());
        }

        let owner_id = self.session.object_id(self.index).ok_or_else(|| {
            DboError::Consistency(format!("row of '{}' has no id after saving", self.table))
        })?;
        let inserted: Vec<DboKey> = activity.inserted.iter().filter_map(|p| p.key()).collect();
        let erased: Vec<DboKey> = activity.erased.iter().filter_map(|p| p.key()).collect();

        self.execute_join(set.statement_index + 1, &owner_id, &inserted)?;
        self.execute_join(set.statement_index + 2, &owner_id, &erased)?;

        activity.mark_written();
        Ok(())
    }

    fn execute_join(&mut self, statement_index: usize, owner_id: &SqlValue, items: &[DboKey]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            self.session.check_session(item.session)?;
            self.session.flush_object(item.index)?;
            ids.push(self.session.object_id(item.index).ok_or_else(|| {
                DboError::Consistency(format!(
                    "join table entry of '{}' refers to an object that cannot be saved yet",
                    self.table
                ))
            })?);
        }

        let key = StatementKey::Mapped(self.mapping, statement_index);
        self.session.with_statement(key, |statement| {
            for id in ids {
                statement.reset();
                statement.bind(0, owner_id.clone());
                statement.bind(1, id);
                statement.execute()?;
            }
            Ok(())
        })
    }
}

impl Action for SaveDbAction<'_> {
    fn act_id<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        if self.pass == Pass::Row {
            let value = field.value.try_to_value()?;
            if self.is_insert {
                self.natural_id = Some(value.clone());
            }
            self.bind(value);
        }
        Ok(())
    }

    fn act<V: SqlValueTraits>(&mut self, field: FieldRef<'_, V>) -> Result<()> {
        if self.pass == Pass::Row {
            self.bind(field.value.try_to_value()?);
        }
        Ok(())
    }

    fn act_ptr<C: Persist>(&mut self, field: PtrRef<'_, C>) -> Result<()> {
        let key = field.value.key();
        match self.pass {
            Pass::Dependencies => {
                if let Some(key) = key {
                    self.session.check_session(key.session)?;
                    self.session.flush_object(key.index)?;
                }
            }
            Pass::Row => {
                let value = match key {
                    None => SqlValue::Null,
                    Some(key) => self.session.object_id(key.index).ok_or_else(|| {
                        DboError::Consistency(format!(
                            "'{}' of '{}' refers to an object that is not saved yet",
                            field.name, self.table
                        ))
                    })?,
                };
                self.bind(value);
            }
            Pass::Sets => {}
        }
        Ok(())
    }

    fn act_weak_ptr<C: Persist>(&mut self, _field: WeakPtrRef<'_, C>) -> Result<()> {
        self.next_set()?;
        Ok(())
    }

    fn act_collection<C: Persist>(&mut self, field: CollectionRef<'_, C>) -> Result<()> {
        let set = self.next_set()?;
        if field.relation != RelationType::ManyToMany {
            return Ok(());
        }

        match self.pass {
            Pass::Row => {
                if field.value.activity().is_some_and(|a| !a.is_empty()) {
                    self.need_sets_pass = true;
                }
            }
            Pass::Sets => self.write_join_edits(&set, field.value)?,
            Pass::Dependencies => {}
        }
        Ok(())
    }

    fn is_writing(&self) -> bool {
        true
    }
}

/// Saves the object in slot `index`.
pub(crate) fn save_object<C: Persist>(session: &mut Session, index: usize) -> Result<()> {
    session.with_object::<C, _>(index, |session, obj| SaveDbAction::new(session, index).visit(obj))
}
