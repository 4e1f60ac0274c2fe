use log::{debug, warn};

use super::Session;
use super::statements::{SQL_DELETE, SQL_DELETE_VERSIONED, SelectSql, StatementKey};
use crate::connection::SqlStatement;
use crate::core::{DboError, Result, Row, SqlValue};
use crate::dbo::MetaDbo;
use crate::transaction::{TransactionId, TransactionImpl};

impl Session {
    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Marks an object modified and queues it for the next flush.
    pub(crate) fn mark_dirty(&mut self, index: usize) {
        let meta = &mut self.objects[index];
        if meta.is(MetaDbo::PURGED) || meta.is(MetaDbo::NEEDS_DELETE) {
            return;
        }
        meta.set(MetaDbo::NEEDS_SAVE);
        self.needs_flush(index);
    }

    pub(crate) fn needs_flush(&mut self, index: usize) {
        let meta = &mut self.objects[index];
        if !meta.is(MetaDbo::IN_DIRTY_LIST) {
            meta.set(MetaDbo::IN_DIRTY_LIST);
            self.dirty.push_back(index);
        }
    }

    pub(crate) fn transaction_active(&self) -> bool {
        self.transaction.as_ref().is_some_and(|t| t.state.is_active())
    }

    pub(crate) fn require_transaction(&self) -> Result<()> {
        match &self.transaction {
            None => Err(DboError::NoTransaction),
            Some(t) if !t.state.is_active() => {
                Err(DboError::Transaction(format!("{} was rolled back", t.id)))
            }
            Some(_) => Ok(()),
        }
    }

    /// Flushes before a query when the flush mode asks for it.
    pub(crate) fn auto_flush(&mut self) -> Result<()> {
        if self.flush_mode == super::FlushMode::Auto && self.transaction_active() {
            self.flush_dirty()?;
        }
        Ok(())
    }

    pub(crate) fn flush_dirty(&mut self) -> Result<()> {
        if self.flushing {
            return Ok(());
        }

        self.flushing = true;
        let result = self.flush_queue();
        self.flushing = false;
        result
    }

    fn flush_queue(&mut self) -> Result<()> {
        let mut count = 0;
        while let Some(index) = self.dirty.pop_front() {
            self.objects[index].clear(MetaDbo::IN_DIRTY_LIST);
            self.flush_object(index)?;
            count += 1;
        }
        if count > 0 {
            debug!("Flushed {} objects", count);
        }
        Ok(())
    }

    /// Writes one object if it has pending changes.
    ///
    /// An object is marked written in the transaction even when the
    /// statement fails, so that the rollback that follows restores it.
    pub(crate) fn flush_object(&mut self, index: usize) -> Result<()> {
        let meta = &self.objects[index];
        if meta.is(MetaDbo::CHECKED_OUT) || meta.is(MetaDbo::PURGED) {
            return Ok(());
        }

        if meta.is(MetaDbo::NEEDS_DELETE) {
            self.require_transaction()?;
            self.enlist(index);
            self.objects[index].clear(MetaDbo::NEEDS_DELETE | MetaDbo::NEEDS_SAVE);

            let result = self.delete_object(index);
            self.objects[index].set(MetaDbo::DELETED_IN_TRANSACTION);
            result
        } else if meta.is(MetaDbo::NEEDS_SAVE) {
            self.require_transaction()?;
            self.enlist(index);
            self.objects[index].clear(MetaDbo::NEEDS_SAVE);

            let ops = self.ops(self.objects[index].mapping);
            let result = ops.save(self, index);
            self.objects[index].set(MetaDbo::SAVED_IN_TRANSACTION);
            result
        } else {
            Ok(())
        }
    }

    fn delete_object(&mut self, index: usize) -> Result<()> {
        let meta = &self.objects[index];
        let mapping = meta.mapping;
        let info = self.mapping_info(mapping);

        let id = meta.id.clone().ok_or_else(|| {
            DboError::Consistency(format!("deleting a row of '{}' without id", info.table_name))
        })?;
        let versioned = info.is_versioned() && meta.is_loaded();
        let version = meta.database_version();
        let table = info.table_name.clone();

        let key = StatementKey::Mapped(mapping, if versioned { SQL_DELETE_VERSIONED } else { SQL_DELETE });
        let bound_id = id.clone();
        let affected = self.with_statement(key, move |statement| {
            statement.bind(0, bound_id);
            if versioned {
                statement.bind(1, SqlValue::Integer(version));
            }
            statement.execute()?;
            Ok(statement.affected_row_count())
        })?;

        if versioned && affected != 1 {
            return Err(DboError::StaleObject {
                table,
                id: id.to_string(),
                version: self.objects[index].version,
            });
        }
        Ok(())
    }

    fn enlist(&mut self, index: usize) {
        let meta = &mut self.objects[index];
        if meta.is(MetaDbo::IN_TRANSACTION) {
            return;
        }
        if let Some(transaction) = self.transaction.as_mut() {
            meta.set(MetaDbo::IN_TRANSACTION);
            transaction.objects.push(index);
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Starts the database transaction before the first statement of a
    /// session transaction.
    fn open_physical(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.as_mut() {
            if transaction.state.is_active() && !transaction.open {
                self.conn.start_transaction()?;
                transaction.open = true;
                debug!("Started database transaction for {}", transaction.id);
            }
        }
        Ok(())
    }

    /// A statement from the cache, or a newly prepared one.
    pub(crate) fn take_statement(&mut self, key: &StatementKey) -> Result<Box<dyn SqlStatement>> {
        self.ensure_schema()?;
        self.open_physical()?;

        if let Some(statement) = self.statements.take(key) {
            return Ok(statement);
        }

        let sql = match key {
            StatementKey::Mapped(mapping, index) => {
                let info = self.mapping_info(*mapping);
                info.statements.get(*index).cloned().ok_or_else(|| {
                    DboError::NoStatement(format!("statement {} of '{}'", index, info.table_name))
                })?
            }
            StatementKey::Sql(sql) => sql.clone(),
        };
        self.conn.prepare_statement(&sql)
    }

    pub(crate) fn put_statement(&mut self, key: StatementKey, statement: Box<dyn SqlStatement>) {
        self.statements.put(key, statement);
    }

    /// Runs `f` on a reset statement and returns it to the cache.
    pub(crate) fn with_statement<R>(
        &mut self,
        key: StatementKey,
        f: impl FnOnce(&mut dyn SqlStatement) -> Result<R>,
    ) -> Result<R> {
        let mut statement = self.take_statement(&key)?;
        statement.reset();
        let result = f(statement.as_mut());
        self.put_statement(key, statement);
        result
    }

    pub(crate) fn query_rows(&mut self, key: StatementKey, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        self.with_statement(key, |statement| {
            for (column, value) in params.into_iter().enumerate() {
                statement.bind(column, value);
            }
            statement.execute()?;

            let mut rows = Vec::new();
            while statement.next_row()? {
                rows.push(
                    (0..statement.column_count())
                        .map(|column| statement.get_result(column))
                        .collect::<Result<Row>>()?,
                );
            }
            Ok(rows)
        })
    }

    /// First column of the first row, or null.
    pub(crate) fn query_scalar(&mut self, sql: &str, params: Vec<SqlValue>) -> Result<SqlValue> {
        let rows = self.query_rows(StatementKey::Sql(sql.to_string()), params)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(SqlValue::Null))
    }

    /// Target mapping and select of relation `set_index` of a mapping.
    pub(crate) fn relation_select(&mut self, owner_mapping: usize, set_index: usize) -> Result<(usize, SelectSql)> {
        self.ensure_schema()?;
        let info = self.mapping_info(owner_mapping);
        let set = info.sets.get(set_index);
        let select = info.set_selects.get(set_index);
        match (set, select) {
            (Some(set), Some(select)) => Ok((set.target_mapping, select.clone())),
            _ => Err(DboError::NoStatement(format!(
                "relation {} of '{}'",
                set_index, info.table_name
            ))),
        }
    }

    /// Runs DDL in the open transaction, or in one of its own.
    pub(crate) fn execute_ddl(&mut self, statements: &[String]) -> Result<()> {
        if self.transaction_active() {
            self.open_physical()?;
            for sql in statements {
                self.conn.execute_sql(sql)?;
            }
            return Ok(());
        }

        self.conn.start_transaction()?;
        for sql in statements {
            if let Err(e) = self.conn.execute_sql(sql) {
                if let Err(rollback) = self.conn.rollback_transaction() {
                    warn!("Rollback after failed DDL failed: {}", rollback);
                }
                return Err(e);
            }
        }
        self.conn.commit_transaction()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub(crate) fn begin_transaction(&mut self) -> TransactionId {
        match self.transaction.as_mut() {
            Some(transaction) => {
                transaction.depth += 1;
                transaction.id
            }
            None => {
                let transaction = TransactionImpl::new();
                let id = transaction.id;
                self.transaction = Some(transaction);
                debug!("Began {}", id);
                id
            }
        }
    }

    /// Commits one nesting level; the outermost level flushes and commits
    /// the database transaction.
    pub(crate) fn commit_transaction(&mut self) -> Result<()> {
        let Some(transaction) = self.transaction.as_mut() else {
            return Err(DboError::Transaction("no transaction to commit".into()));
        };

        if !transaction.state.is_active() {
            let id = transaction.id;
            self.leave_transaction();
            return Err(DboError::Transaction(format!("{} was rolled back", id)));
        }

        if transaction.depth > 1 {
            transaction.depth -= 1;
            return Ok(());
        }

        if let Err(e) = self.commit_outermost() {
            self.abort_transaction();
            self.leave_transaction();
            return Err(e);
        }
        Ok(())
    }

    fn commit_outermost(&mut self) -> Result<()> {
        self.flush_dirty()?;

        let Some(transaction) = self.transaction.as_mut() else {
            return Err(DboError::Transaction("transaction ended while flushing".into()));
        };
        if transaction.open {
            self.conn.commit_transaction()?;
            transaction.open = false;
        }
        transaction.state = crate::transaction::TransactionState::Committed;
        debug!("Committed {} in {:?}", transaction.id, transaction.duration());

        self.settle(true);
        self.transaction = None;
        Ok(())
    }

    /// Rolls back the whole transaction, whatever the nesting level.
    pub(crate) fn rollback_transaction(&mut self) -> Result<()> {
        if self.transaction_active() {
            self.abort_transaction();
        }
        self.leave_transaction();
        Ok(())
    }

    fn abort_transaction(&mut self) {
        let Some(transaction) = self.transaction.as_mut() else {
            return;
        };
        if transaction.open {
            if let Err(e) = self.conn.rollback_transaction() {
                warn!("Rollback of {} failed: {}", transaction.id, e);
            }
            transaction.open = false;
        }
        transaction.state = crate::transaction::TransactionState::Aborted;
        debug!("Rolled back {}", transaction.id);

        self.settle(false);
    }

    fn leave_transaction(&mut self) {
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.depth = transaction.depth.saturating_sub(1);
            if transaction.depth == 0 {
                self.transaction = None;
            }
        }
    }

    /// Brings every object written in the transaction in line with its
    /// outcome.
    ///
    /// On commit, saved objects take their new version and deleted ones are
    /// purged. On rollback their changes are queued again so a later
    /// transaction can write them.
    fn settle(&mut self, success: bool) {
        let objects = self
            .transaction
            .as_mut()
            .map(|t| std::mem::take(&mut t.objects))
            .unwrap_or_default();

        for index in objects {
            let meta = &mut self.objects[index];
            let saved = meta.is(MetaDbo::SAVED_IN_TRANSACTION);
            let deleted = meta.is(MetaDbo::DELETED_IN_TRANSACTION);
            meta.clear(MetaDbo::IN_TRANSACTION | MetaDbo::SAVED_IN_TRANSACTION | MetaDbo::DELETED_IN_TRANSACTION);

            let persisted = meta.is(MetaDbo::PERSISTED);
            if success {
                if deleted {
                    self.purge(index);
                } else if saved {
                    let meta = &mut self.objects[index];
                    meta.version += 1;
                    meta.set(MetaDbo::PERSISTED);
                }
            } else if deleted && !persisted {
                self.purge(index);
            } else {
                if saved && !persisted {
                    self.unregister(index);
                }
                if deleted {
                    self.objects[index].set(MetaDbo::NEEDS_DELETE);
                    self.needs_flush(index);
                } else if saved {
                    self.mark_dirty(index);
                }
            }

            let meta = &self.objects[index];
            if meta.is(MetaDbo::PURGED) || !meta.is_loaded() {
                continue;
            }
            let ops = self.ops(meta.mapping);
            match ops.transaction_done(self, index, success) {
                Ok(true) if !success => self.mark_dirty(index),
                Ok(_) => {}
                Err(e) => warn!("Finishing transaction for object {} failed: {}", index, e),
            }
        }
    }

    fn unregister(&mut self, index: usize) {
        let meta = &mut self.objects[index];
        if let Some(id) = meta.id.take() {
            if self.registry.get(&(meta.mapping, id.clone())) == Some(&index) {
                self.registry.remove(&(meta.mapping, id));
            }
        }
    }

    fn purge(&mut self, index: usize) {
        self.unregister(index);
        let meta = &mut self.objects[index];
        meta.clear(MetaDbo::PERSISTED | MetaDbo::NEEDS_SAVE | MetaDbo::NEEDS_DELETE);
        meta.set(MetaDbo::PURGED);
        meta.obj = None;
    }
}
