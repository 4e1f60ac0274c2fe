use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use super::ptr::{DboKey, Ptr};
use crate::connection::SqlStatement;
use crate::core::{DboError, RelationType, Result, SqlValue};
use crate::persist::Persist;
use crate::session::Session;
use crate::session::statements::{SelectSql, StatementKey};

/// Pending edits of a many-to-many collection.
///
/// `inserted`/`erased` are the edits not written yet, relative to the join
/// table as it is now. `transaction_inserted`/`transaction_erased` are the
/// net changes already written in the open transaction, relative to the
/// join table as it was when the transaction began. A rollback folds the
/// written changes back into the pending ones.
pub struct Activity<C> {
    pub(crate) inserted: BTreeSet<Ptr<C>>,
    pub(crate) erased: BTreeSet<Ptr<C>>,
    pub(crate) transaction_inserted: BTreeSet<Ptr<C>>,
    pub(crate) transaction_erased: BTreeSet<Ptr<C>>,
}

impl<C> Default for Activity<C> {
    fn default() -> Self {
        Self {
            inserted: BTreeSet::new(),
            erased: BTreeSet::new(),
            transaction_inserted: BTreeSet::new(),
            transaction_erased: BTreeSet::new(),
        }
    }
}

impl<C> Activity<C> {
    pub fn inserted(&self) -> &BTreeSet<Ptr<C>> {
        &self.inserted
    }

    pub fn erased(&self) -> &BTreeSet<Ptr<C>> {
        &self.erased
    }

    pub fn transaction_inserted(&self) -> &BTreeSet<Ptr<C>> {
        &self.transaction_inserted
    }

    pub fn transaction_erased(&self) -> &BTreeSet<Ptr<C>> {
        &self.transaction_erased
    }

    /// No edits waiting to be written.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.erased.is_empty()
    }

    /// No edits at all, written or not.
    pub(crate) fn is_idle(&self) -> bool {
        self.is_empty() && self.transaction_inserted.is_empty() && self.transaction_erased.is_empty()
    }

    /// Inserting what was just erased cancels the erase.
    pub(crate) fn insert(&mut self, item: Ptr<C>) {
        if self.erased.remove(&item) || self.transaction_inserted.contains(&item) {
            return;
        }
        self.inserted.insert(item);
    }

    /// Erasing what was just inserted cancels the insert.
    pub(crate) fn erase(&mut self, item: Ptr<C>) {
        if self.inserted.remove(&item) || self.transaction_erased.contains(&item) {
            return;
        }
        self.erased.insert(item);
    }

    /// Records that the pending edits were written in the open transaction.
    pub(crate) fn mark_written(&mut self) {
        for item in std::mem::take(&mut self.inserted) {
            if !self.transaction_erased.remove(&item) {
                self.transaction_inserted.insert(item);
            }
        }
        for item in std::mem::take(&mut self.erased) {
            if !self.transaction_inserted.remove(&item) {
                self.transaction_erased.insert(item);
            }
        }
    }

    pub(crate) fn transaction_done(&mut self, success: bool) {
        if success {
            self.transaction_inserted.clear();
            self.transaction_erased.clear();
            return;
        }

        // The join table is back to its state at transaction start.
        for item in std::mem::take(&mut self.transaction_inserted) {
            if !self.erased.remove(&item) {
                self.inserted.insert(item);
            }
        }
        for item in std::mem::take(&mut self.transaction_erased) {
            if !self.inserted.remove(&item) {
                self.erased.insert(item);
            }
        }
    }
}

/// Binding of a collection to one relation of an owner object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelationData {
    pub owner: DboKey,
    pub owner_mapping: usize,
    pub set_index: usize,
    pub statement_index: usize,
    pub relation: RelationType,
    pub join_name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct QueryData {
    pub session: u64,
    pub mapping: usize,
    pub select: SelectSql,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Clone)]
enum Source {
    Unbound,
    Relation(RelationData),
    Query(QueryData),
}

/// The many side of a relation, or the result of a query.
///
/// A collection is a restartable, lazily evaluated sequence: every cursor
/// runs its statement again. Edits are buffered in an [`Activity`] and
/// written when the owner is flushed.
///
/// The collection stored in an object is bound to its owner when the object
/// is added to or loaded by a session. `Session::collection` hands out
/// clones of it; clones share the binding but not the pending edits, and
/// edits made through a clone are applied to the owner's collection.
pub struct Collection<C> {
    source: Source,
    activity: Option<Box<Activity<C>>>,
}

impl<C> Default for Collection<C> {
    fn default() -> Self {
        Self {
            source: Source::Unbound,
            activity: None,
        }
    }
}

impl<C> Clone for Collection<C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            activity: None,
        }
    }
}

impl<C> fmt::Debug for Collection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.activity.as_ref().map_or(0, |a| a.inserted.len() + a.erased.len());
        match &self.source {
            Source::Unbound => write!(f, "Collection(unbound, {} pending)", pending),
            Source::Relation(rel) => write!(
                f,
                "Collection({:?} '{}', {} pending)",
                rel.relation, rel.join_name, pending
            ),
            Source::Query(q) => write!(f, "Collection({})", q.select.to_sql()),
        }
    }
}

impl<C> Collection<C> {
    pub(crate) fn for_query(data: QueryData) -> Self {
        Self {
            source: Source::Query(data),
            activity: None,
        }
    }

    pub(crate) fn bind_relation(&mut self, relation: RelationData) {
        self.source = Source::Relation(relation);
    }

    pub(crate) fn relation(&self) -> Option<&RelationData> {
        match &self.source {
            Source::Relation(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.source, Source::Unbound)
    }

    /// Pending edits, if any were made.
    pub fn activity(&self) -> Option<&Activity<C>> {
        self.activity.as_deref()
    }

    pub(crate) fn activity_mut(&mut self) -> &mut Activity<C> {
        self.activity.get_or_insert_with(Default::default)
    }

    pub(crate) fn existing_activity_mut(&mut self) -> Option<&mut Activity<C>> {
        self.activity.as_deref_mut()
    }

    pub(crate) fn drop_idle_activity(&mut self) {
        if self.activity.as_ref().is_some_and(|a| a.is_idle()) {
            self.activity = None;
        }
    }

    /// Starts a new pass over the collection.
    ///
    /// A relation collection whose owner has no id yet yields nothing.
    pub fn cursor(&self, session: &mut Session) -> Result<CollectionCursor<C>> {
        match &self.source {
            Source::Unbound => Ok(CollectionCursor::empty()),
            Source::Relation(rel) => {
                session.check_session(rel.owner.session)?;
                session.require_transaction()?;
                session.auto_flush()?;

                let Some(owner_id) = session.object_id(rel.owner.index) else {
                    return Ok(CollectionCursor::empty());
                };

                let (target, _) = session.relation_select(rel.owner_mapping, rel.set_index)?;
                let key = StatementKey::Mapped(rel.owner_mapping, rel.statement_index);
                CollectionCursor::open(session, key, target, vec![owner_id])
            }
            Source::Query(q) => {
                session.check_session(q.session)?;
                session.require_transaction()?;
                session.auto_flush()?;

                let key = StatementKey::Sql(q.select.to_sql());
                CollectionCursor::open(session, key, q.mapping, q.params.clone())
            }
        }
    }

    /// Iterates while borrowing the session; the statement is released when
    /// the iterator is dropped.
    pub fn iter<'s>(&self, session: &'s mut Session) -> Result<CollectionIter<'s, C>> {
        let cursor = self.cursor(session)?;
        Ok(CollectionIter { session, cursor })
    }

    pub fn to_vec(&self, session: &mut Session) -> Result<Vec<Ptr<C>>> {
        self.iter(session)?.collect()
    }

    /// Number of rows, computed with a `count(*)` query.
    pub fn size(&self, session: &mut Session) -> Result<usize> {
        let (select, params) = match &self.source {
            Source::Unbound => return Err(DboError::NoStatement("collection is not bound".into())),
            Source::Relation(rel) => {
                session.check_session(rel.owner.session)?;
                session.require_transaction()?;
                session.auto_flush()?;

                let owner_id = session.object_id(rel.owner.index).ok_or_else(|| {
                    DboError::NoStatement("collection owner has no id".into())
                })?;
                let (_, select) = session.relation_select(rel.owner_mapping, rel.set_index)?;
                (select, vec![owner_id])
            }
            Source::Query(q) => {
                session.check_session(q.session)?;
                session.require_transaction()?;
                session.auto_flush()?;
                (q.select.clone(), q.params.clone())
            }
        };

        let count = session.query_scalar(&select.count_sql(), params)?;
        count
            .as_i64()
            .map(|n| n as usize)
            .ok_or_else(|| DboError::Consistency(format!("count(*) returned {}", count)))
    }

    pub fn is_empty(&self, session: &mut Session) -> Result<bool> {
        Ok(self.size(session)? == 0)
    }

    /// First element, if any.
    pub fn front(&self, session: &mut Session) -> Result<Option<Ptr<C>>> {
        let mut cursor = self.cursor(session)?;
        let first = cursor.fetch_next(session);
        cursor.close(session);
        first
    }

    pub fn contains(&self, session: &mut Session, item: &Ptr<C>) -> Result<bool> {
        if item.is_null() {
            return Ok(false);
        }
        let mut cursor = self.cursor(session)?;
        let mut found = false;
        loop {
            match cursor.fetch_next(session) {
                Ok(Some(p)) if p == *item => {
                    found = true;
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    cursor.close(session);
                    return Err(e);
                }
            }
        }
        cursor.close(session);
        Ok(found)
    }
}

impl<C: Persist> Collection<C> {
    /// Every object of the collection as a JSON array.
    pub fn to_json(&self, session: &mut Session) -> Result<serde_json::Value> {
        let items = self.to_vec(session)?;
        session.to_json_list(&items)
    }

    /// Adds `item` to the relation.
    ///
    /// For many-to-one the item's `belongs_to` reference is pointed at the
    /// owner right away; for many-to-many the edit is buffered until flush.
    pub fn insert(&mut self, session: &mut Session, item: Ptr<C>) -> Result<()> {
        let item_key = session.check_ptr(&item)?;
        match &self.source {
            Source::Unbound => {
                self.activity_mut().insert(item);
                Ok(())
            }
            Source::Query(_) => Err(DboError::Usage(
                "insert() is only supported on relation collections".into(),
            )),
            Source::Relation(rel) => {
                let rel = rel.clone();
                session.require_transaction()?;
                match rel.relation {
                    RelationType::ManyToOne => {
                        session.set_reciproce(item_key, &rel.join_name, Some((rel.owner, rel.owner_mapping)))
                    }
                    RelationType::ManyToMany => session.edit_collection(&rel, CollectionEdit::Insert(item_key)),
                }
            }
        }
    }

    /// Removes `item` from the relation.
    ///
    /// For many-to-one the item's `belongs_to` reference is cleared.
    pub fn erase(&mut self, session: &mut Session, item: Ptr<C>) -> Result<()> {
        let item_key = session.check_ptr(&item)?;
        match &self.source {
            Source::Unbound => {
                self.activity_mut().erase(item);
                Ok(())
            }
            Source::Query(_) => Err(DboError::Usage(
                "erase() is only supported on relation collections".into(),
            )),
            Source::Relation(rel) => {
                let rel = rel.clone();
                session.require_transaction()?;
                match rel.relation {
                    RelationType::ManyToOne => session.set_reciproce(item_key, &rel.join_name, None),
                    RelationType::ManyToMany => session.edit_collection(&rel, CollectionEdit::Erase(item_key)),
                }
            }
        }
    }
}

/// An edit routed to the collection stored in the owner object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectionEdit {
    Insert(DboKey),
    Erase(DboKey),
}

/// Forward-only position in a collection's result rows.
pub struct CollectionCursor<C> {
    statement: Option<(StatementKey, Box<dyn SqlStatement>)>,
    mapping: usize,
    _marker: PhantomData<fn() -> C>,
}

impl<C> CollectionCursor<C> {
    fn empty() -> Self {
        Self {
            statement: None,
            mapping: 0,
            _marker: PhantomData,
        }
    }

    fn open(session: &mut Session, key: StatementKey, mapping: usize, params: Vec<SqlValue>) -> Result<Self> {
        let mut statement = session.take_statement(&key)?;
        statement.reset();
        for (column, value) in params.into_iter().enumerate() {
            statement.bind(column, value);
        }
        statement.execute()?;

        Ok(Self {
            statement: Some((key, statement)),
            mapping,
            _marker: PhantomData,
        })
    }

    /// Loads the next row, or returns `None` and releases the statement at
    /// the end.
    pub fn fetch_next(&mut self, session: &mut Session) -> Result<Option<Ptr<C>>> {
        let Some((_, statement)) = self.statement.as_mut() else {
            return Ok(None);
        };

        if !statement.next_row()? {
            self.close(session);
            return Ok(None);
        }

        let row = (0..statement.column_count())
            .map(|column| statement.get_result(column))
            .collect::<Result<Vec<_>>>()?;
        let index = session.load_from_row(self.mapping, &row)?;
        Ok(Some(Ptr::from_key(DboKey::new(session.session_id(), index))))
    }

    /// Hands the statement back to the session cache.
    pub fn close(&mut self, session: &mut Session) {
        if let Some((key, statement)) = self.statement.take() {
            session.put_statement(key, statement);
        }
    }

    pub fn is_open(&self) -> bool {
        self.statement.is_some()
    }
}

/// Iterator over a collection, holding the session for its lifetime.
pub struct CollectionIter<'s, C> {
    session: &'s mut Session,
    cursor: CollectionCursor<C>,
}

impl<C> Iterator for CollectionIter<'_, C> {
    type Item = Result<Ptr<C>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.fetch_next(self.session) {
            Ok(Some(ptr)) => Some(Ok(ptr)),
            Ok(None) => None,
            Err(e) => {
                self.cursor.close(self.session);
                Some(Err(e))
            }
        }
    }
}

impl<C> Drop for CollectionIter<'_, C> {
    fn drop(&mut self) {
        self.cursor.close(self.session);
    }
}
