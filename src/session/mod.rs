// ============================================================================
// Session
// ============================================================================
//
// A Session owns one connection, the class mappings, the prepared
// statements and every object it has handed out a `Ptr` for.
//
// Objects live in an arena of MetaDbo slots; a `Ptr` is the slot index.
// The registry maps (class, id) to a slot, so one row is represented by
// at most one object per session.
//
// Changes are tracked in a dirty list and written by `flush()`, which runs
// automatically before queries (FlushMode::Auto) and always at commit.
//
// ============================================================================

pub mod mapping;
mod objects;
pub mod statements;
mod unit_of_work;

pub use mapping::MappingInfo;

use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde_json::Value;

use self::mapping::{Mapping, TypedMapping};
use self::statements::{SelectSql, StatementCache, StatementKey, quote};
use crate::action::json;
use crate::action::schema::{CreateSchema, DropSchema};
use crate::connection::{ConnectionConfig, SqlConnection, Sqlite3};
use crate::core::{DboError, FieldInfo, Result, SqlValue};
use crate::dbo::{Collection, DboKey, DboStatus, MetaDbo, Ptr, QueryData, WeakPtr};
use crate::persist::Persist;
use crate::result::QueryResult;
use crate::transaction::{Transaction, TransactionImpl};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// When pending changes are written to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Before every query and collection access, and at commit.
    #[default]
    Auto,
    /// Only on `flush()` and at commit.
    Manual,
}

pub struct Session {
    id: u64,
    conn: Box<dyn SqlConnection>,
    mappings: Vec<Mapping>,
    by_type: HashMap<TypeId, usize>,
    by_table: HashMap<String, usize>,
    schema_initialized: bool,
    objects: Vec<MetaDbo>,
    registry: HashMap<(usize, SqlValue), usize>,
    dirty: VecDeque<usize>,
    statements: StatementCache,
    transaction: Option<TransactionImpl>,
    flush_mode: FlushMode,
    flushing: bool,
}

impl Session {
    pub fn new(conn: impl SqlConnection + 'static) -> Self {
        let capacity = ConnectionConfig::default().statement_cache_capacity;
        Self::with_connection(Box::new(conn), capacity)
    }

    /// Opens a SQLite database as configured.
    pub fn open(config: &ConnectionConfig) -> Result<Self> {
        let conn = Sqlite3::open(config)?;
        Ok(Self::with_connection(Box::new(conn), config.statement_cache_capacity))
    }

    fn with_connection(conn: Box<dyn SqlConnection>, statement_cache_capacity: usize) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
            conn,
            mappings: Vec::new(),
            by_type: HashMap::new(),
            by_table: HashMap::new(),
            schema_initialized: false,
            objects: Vec::new(),
            registry: HashMap::new(),
            dirty: VecDeque::new(),
            statements: StatementCache::new(statement_cache_capacity),
            transaction: None,
            flush_mode: FlushMode::Auto,
            flushing: false,
        }
    }

    // ------------------------------------------------------------------
    // Mapping
    // ------------------------------------------------------------------

    /// Maps class `C` to `table_name`.
    ///
    /// All classes must be mapped before the first object is added or the
    /// first statement runs.
    pub fn map_class<C: Persist>(&mut self, table_name: &str) -> Result<()> {
        if self.schema_initialized {
            return Err(DboError::Mapping(format!(
                "cannot map '{}' after the schema was initialized",
                table_name
            )));
        }
        if table_name.is_empty() {
            return Err(DboError::Mapping("table name must not be empty".into()));
        }

        let type_id = TypeId::of::<C>();
        if self.by_type.contains_key(&type_id) {
            return Err(DboError::Mapping(format!(
                "{} is already mapped",
                std::any::type_name::<C>()
            )));
        }
        if self.by_table.contains_key(table_name) {
            return Err(DboError::Mapping(format!(
                "table '{}' is already mapped",
                table_name
            )));
        }

        let index = self.mappings.len();
        self.mappings.push(Mapping {
            type_id,
            table_name: table_name.to_string(),
            ops: Arc::new(TypedMapping::<C>::new()),
            info: MappingInfo::new(table_name),
        });
        self.by_type.insert(type_id, index);
        self.by_table.insert(table_name.to_string(), index);

        debug!("Mapped {} to table '{}'", std::any::type_name::<C>(), table_name);
        Ok(())
    }

    pub fn table_name<C: Persist>(&self) -> Result<&str> {
        let mapping = self.mapping_index::<C>()?;
        Ok(self.mapping_table(mapping))
    }

    /// Columns of a mapped table, excluding surrogate id and version.
    pub fn fields(&mut self, table_name: &str) -> Result<&[FieldInfo]> {
        let mapping = self.table_index(table_name)?;
        self.ensure_schema()?;
        Ok(&self.mappings[mapping].info.fields)
    }

    /// Full layout of a mapped table.
    pub fn mapping(&mut self, table_name: &str) -> Result<&MappingInfo> {
        let mapping = self.table_index(table_name)?;
        self.ensure_schema()?;
        Ok(&self.mappings[mapping].info)
    }

    fn table_index(&self, table_name: &str) -> Result<usize> {
        self.by_table
            .get(table_name)
            .copied()
            .ok_or_else(|| DboError::NotMapped(table_name.to_string()))
    }

    /// Introspects every mapped class once.
    pub(crate) fn ensure_schema(&mut self) -> Result<()> {
        if self.schema_initialized {
            return Ok(());
        }

        let mut infos = Vec::with_capacity(self.mappings.len());
        for (index, mapping) in self.mappings.iter().enumerate() {
            let ops = Arc::clone(&mapping.ops);
            infos.push(ops.init_schema(self, index)?);
        }
        mapping::resolve_mappings(&mut infos, self.conn.as_ref())?;

        for (mapping, info) in self.mappings.iter_mut().zip(infos) {
            mapping.info = info;
        }
        self.schema_initialized = true;

        debug!("Initialized schema of {} mapped classes", self.mappings.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    fn creation_statements(&mut self) -> Result<Vec<String>> {
        self.ensure_schema()?;
        let infos: Vec<MappingInfo> = self.mappings.iter().map(|m| m.info.clone()).collect();

        let mut create = CreateSchema::new(&infos, self.conn.as_ref());
        for mapping in 0..infos.len() {
            create.visit(mapping);
        }
        Ok(create.finish())
    }

    /// Creates all tables, referenced tables first, and each join table once.
    pub fn create_tables(&mut self) -> Result<()> {
        let statements = self.creation_statements()?;
        self.execute_ddl(&statements)
    }

    /// DDL that `create_tables()` would execute.
    pub fn table_creation_sql(&mut self) -> Result<String> {
        Ok(self
            .creation_statements()?
            .iter()
            .map(|sql| format!("{};\n", sql))
            .collect())
    }

    /// Drops all tables, referencing tables and join tables first.
    pub fn drop_tables(&mut self) -> Result<()> {
        self.ensure_schema()?;
        let infos: Vec<MappingInfo> = self.mappings.iter().map(|m| m.info.clone()).collect();

        let mut drop = DropSchema::new(&infos);
        for mapping in 0..infos.len() {
            drop.visit(mapping);
        }
        let statements = drop.finish();

        self.statements.clear();
        self.execute_ddl(&statements)
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Adds a new object. It is inserted at the next flush.
    pub fn add<C: Persist>(&mut self, obj: C) -> Result<Ptr<C>> {
        let mapping = self.mapping_index::<C>()?;
        self.ensure_schema()?;

        let index = self.objects.len();
        self.objects.push(MetaDbo::new_object(mapping, Box::new(obj)));
        self.needs_flush(index);

        let ops = self.ops(mapping);
        ops.bind(self, index)?;

        Ok(Ptr::from_key(DboKey::new(self.id, index)))
    }

    /// Loads the object with `id`, from the session if it is there already.
    pub fn load<C: Persist>(&mut self, id: impl Into<SqlValue>) -> Result<Ptr<C>> {
        self.require_transaction()?;
        let ptr = self.load_lazy::<C>(id)?;
        let key = self.check_ptr(&ptr)?;

        if let Err(e) = self.ensure_loaded(key.index) {
            if e.is_not_found() {
                self.forget(key.index);
            }
            return Err(e);
        }
        Ok(ptr)
    }

    /// Handle to the object with `id`, loaded on first access.
    pub fn load_lazy<C: Persist>(&mut self, id: impl Into<SqlValue>) -> Result<Ptr<C>> {
        let mapping = self.mapping_index::<C>()?;
        self.ensure_schema()?;
        let index = self.lazy_index(mapping, id.into());
        Ok(Ptr::from_key(DboKey::new(self.id, index)))
    }

    /// Read access to an object, loading it if needed.
    pub fn get<C: Persist>(&mut self, ptr: &Ptr<C>) -> Result<&C> {
        let key = self.check_ptr(ptr)?;
        self.ensure_loaded(key.index)?;
        self.object_ref::<C>(key.index)
    }

    /// Write access to an object; marks it dirty.
    pub fn modify<C: Persist>(&mut self, ptr: &Ptr<C>) -> Result<&mut C> {
        let key = self.check_ptr(ptr)?;
        self.require_transaction()?;
        self.ensure_loaded(key.index)?;

        if matches!(self.objects[key.index].status(), DboStatus::Deleted | DboStatus::Purged) {
            return Err(DboError::Usage("cannot modify a removed object".into()));
        }

        self.mark_dirty(key.index);
        self.object_mut::<C>(key.index)
    }

    /// Deletes an object at the next flush. An object that was never
    /// written is dropped right away.
    pub fn remove<C: Persist>(&mut self, ptr: &Ptr<C>) -> Result<()> {
        let key = self.check_ptr(ptr)?;
        self.require_transaction()?;

        let meta = &mut self.objects[key.index];
        if matches!(meta.status(), DboStatus::Deleted | DboStatus::Purged) {
            return Ok(());
        }

        if meta.is(MetaDbo::PERSISTED) || meta.is(MetaDbo::SAVED_IN_TRANSACTION) {
            meta.clear(MetaDbo::NEEDS_SAVE);
            meta.set(MetaDbo::NEEDS_DELETE);
            self.needs_flush(key.index);
        } else {
            meta.clear(MetaDbo::NEEDS_SAVE | MetaDbo::IN_DIRTY_LIST);
            meta.set(MetaDbo::PURGED);
            meta.obj = None;
            self.dirty.retain(|&i| i != key.index);
        }
        Ok(())
    }

    /// Id of an object; `None` for a new object with a surrogate id.
    pub fn id<C: Persist>(&mut self, ptr: &Ptr<C>) -> Result<Option<SqlValue>> {
        let key = self.check_ptr(ptr)?;
        let meta = &self.objects[key.index];
        if meta.id.is_some() {
            return Ok(meta.id.clone());
        }

        let mapping = meta.mapping;
        if meta.is_loaded() && self.mapping_info(mapping).natural_id_field().is_some() {
            let ops = self.ops(mapping);
            return ops.natural_id(self, key.index);
        }
        Ok(None)
    }

    /// Committed version of an object; -1 until its insert commits.
    pub fn version<C: Persist>(&self, ptr: &Ptr<C>) -> Result<i64> {
        let key = self.check_ptr(ptr)?;
        Ok(self.objects[key.index].version)
    }

    pub fn status<C: Persist>(&self, ptr: &Ptr<C>) -> Result<DboStatus> {
        let key = self.check_ptr(ptr)?;
        Ok(self.objects[key.index].status())
    }

    pub fn is_loaded<C: Persist>(&self, ptr: &Ptr<C>) -> bool {
        self.check_ptr(ptr)
            .map(|key| self.objects[key.index].is_loaded())
            .unwrap_or(false)
    }

    /// Handle to a relation collection of `owner`.
    pub fn collection<C: Persist, T>(
        &mut self,
        owner: &Ptr<C>,
        select: impl FnOnce(&C) -> &Collection<T>,
    ) -> Result<Collection<T>> {
        let obj = self.get(owner)?;
        Ok(select(obj).clone())
    }

    /// Handle to a one-to-one relation of `owner`.
    pub fn weak<C: Persist, T>(
        &mut self,
        owner: &Ptr<C>,
        select: impl FnOnce(&C) -> &WeakPtr<T>,
    ) -> Result<WeakPtr<T>> {
        let obj = self.get(owner)?;
        Ok(select(obj).clone())
    }

    /// An object as JSON: its surrogate id, columns, referenced ids, and
    /// its one-to-one and many-to-one relations as nested objects.
    pub fn to_json<C: Persist>(&mut self, ptr: &Ptr<C>) -> Result<Value> {
        let key = self.check_ptr(ptr)?;
        self.auto_flush()?;
        json::serialize::<C>(self, key.index)
    }

    pub fn to_json_list<C: Persist>(&mut self, ptrs: &[Ptr<C>]) -> Result<Value> {
        ptrs.iter()
            .map(|ptr| self.to_json(ptr))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }

    /// Column values in row layout: `[surrogate id][version][fields...]`;
    /// a `belongs_to` gives the referenced id.
    pub fn values<C: Persist>(&mut self, ptr: &Ptr<C>) -> Result<Vec<SqlValue>> {
        let key = self.check_ptr(ptr)?;
        self.ensure_loaded(key.index)?;
        let ops = self.ops(self.objects[key.index].mapping);
        ops.to_values(self, key.index)
    }

    /// Sets the column at `column` in the layout of `values()`.
    ///
    /// The surrogate id and version columns cannot be set, nor the natural
    /// id of an object that was written.
    pub fn set_value<C: Persist>(&mut self, ptr: &Ptr<C>, column: usize, value: SqlValue) -> Result<()> {
        let key = self.check_ptr(ptr)?;
        self.require_transaction()?;
        self.ensure_loaded(key.index)?;

        let mapping = self.objects[key.index].mapping;
        let info = self.mapping_info(mapping);
        let first = info.first_field_column();
        if column < first {
            return Err(DboError::Usage(format!(
                "column {} of '{}' is maintained by the session",
                column, info.table_name
            )));
        }
        let field = info.fields.get(column - first).ok_or_else(|| {
            DboError::Usage(format!("'{}' has no column {}", info.table_name, column))
        })?;
        if field.is_natural_id() && !self.objects[key.index].is_new() {
            return Err(DboError::Usage(format!(
                "natural id '{}' of a saved object cannot change",
                field.name
            )));
        }

        let ops = self.ops(mapping);
        ops.set_value(self, key.index, column - first, value)?;
        self.mark_dirty(key.index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Objects of class `C` matching an SQL condition with `?` parameters,
    /// ordered by id. The collection runs the query anew on every pass.
    pub fn find<C: Persist>(&mut self, condition: &str, params: Vec<SqlValue>) -> Result<Collection<C>> {
        let mapping = self.mapping_index::<C>()?;
        self.ensure_schema()?;

        let info = self.mapping_info(mapping);
        let mut select = SelectSql::new(info.select_columns(false), quote(&info.table_name));
        if !condition.trim().is_empty() {
            select = select.condition(condition);
        }
        select = select.order_by(quote(info.id_name()));

        Ok(Collection::for_query(QueryData {
            session: self.id,
            mapping,
            select,
            params,
        }))
    }

    pub fn find_all<C: Persist>(&mut self) -> Result<Collection<C>> {
        self.find("", Vec::new())
    }

    /// The single object matching a condition, if any.
    pub fn find_one<C: Persist>(&mut self, condition: &str, params: Vec<SqlValue>) -> Result<Option<Ptr<C>>> {
        let found = self.find::<C>(condition, params)?.to_vec(self)?;
        match found.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            _ => Err(DboError::Consistency(format!(
                "{} rows match a query for a single object",
                found.len()
            ))),
        }
    }

    /// Executes a statement and returns the number of affected rows.
    pub fn execute(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<usize> {
        self.require_transaction()?;
        self.auto_flush()?;

        self.with_statement(StatementKey::Sql(sql.to_string()), |statement| {
            bind_all(statement, params);
            statement.execute()?;
            Ok(statement.affected_row_count())
        })
    }

    /// Runs a query and returns its rows as values.
    pub fn query(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<QueryResult> {
        self.require_transaction()?;
        self.auto_flush()?;

        self.with_statement(StatementKey::Sql(sql.to_string()), |statement| {
            bind_all(statement, params);
            statement.execute()?;

            let columns = statement.column_names();
            let mut rows = Vec::new();
            while statement.next_row()? {
                rows.push(
                    (0..statement.column_count())
                        .map(|column| statement.get_result(column))
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            Ok(QueryResult::new(columns, rows))
        })
    }

    // ------------------------------------------------------------------
    // Unit of work
    // ------------------------------------------------------------------

    /// Writes all pending changes.
    pub fn flush(&mut self) -> Result<()> {
        self.require_transaction()?;
        self.flush_dirty()
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    /// Changes the flush mode, flushing first when a transaction is open.
    pub fn set_flush_mode(&mut self, mode: FlushMode) -> Result<()> {
        if self.transaction_active() {
            self.flush_dirty()?;
        }
        self.flush_mode = mode;
        Ok(())
    }

    /// Drops changes that were not written yet: new objects are discarded,
    /// modified ones are reloaded on next access.
    pub fn discard_unflushed(&mut self) {
        while let Some(index) = self.dirty.pop_front() {
            let meta = &mut self.objects[index];
            meta.clear(MetaDbo::IN_DIRTY_LIST | MetaDbo::NEEDS_SAVE | MetaDbo::NEEDS_DELETE);
            if meta.is(MetaDbo::CHECKED_OUT) {
                continue;
            }
            if meta.is_new() {
                meta.set(MetaDbo::PURGED);
            }
            meta.obj = None;
        }
    }

    /// Unloads the clean objects of one table, or of all tables, so they
    /// are read again on next access.
    pub fn reread_all(&mut self, table_name: Option<&str>) -> Result<()> {
        let mapping = table_name.map(|t| self.table_index(t)).transpose()?;

        let mut count = 0;
        for meta in &mut self.objects {
            if mapping.is_some_and(|m| m != meta.mapping) {
                continue;
            }
            if meta.obj.is_none()
                || meta.is_dirty()
                || meta.is_new()
                || meta.is(MetaDbo::IN_TRANSACTION)
                || meta.is(MetaDbo::PURGED)
            {
                continue;
            }
            meta.obj = None;
            count += 1;
        }

        debug!("Unloaded {} objects", count);
        Ok(())
    }
}

fn bind_all(statement: &mut dyn crate::connection::SqlStatement, params: Vec<SqlValue>) {
    for (column, value) in params.into_iter().enumerate() {
        statement.bind(column, value);
    }
}
