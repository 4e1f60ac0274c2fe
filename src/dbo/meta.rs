use std::any::Any;

use crate::core::SqlValue;

/// Lifecycle state of a session object.
///
/// ```text
/// New ──save──> Clean ──modify──> Dirty ──save──> Clean
///                 │                 │
///                 └─────remove──────┴──> Deleted ──save──> Purged
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DboStatus {
    New,
    Clean,
    Dirty,
    Deleted,
    Purged,
}

/// Bookkeeping for one object held by a session.
pub(crate) struct MetaDbo {
    pub mapping: usize,
    pub id: Option<SqlValue>,
    /// Committed version; -1 until the first insert commits.
    pub version: i64,
    state: u16,
    /// None while not loaded, or while checked out by an action.
    pub obj: Option<Box<dyn Any>>,
}

impl MetaDbo {
    /// Row exists in the database as of the last commit.
    pub const PERSISTED: u16 = 0x001;
    pub const NEEDS_SAVE: u16 = 0x002;
    pub const NEEDS_DELETE: u16 = 0x004;
    pub const SAVED_IN_TRANSACTION: u16 = 0x008;
    pub const DELETED_IN_TRANSACTION: u16 = 0x010;
    pub const PURGED: u16 = 0x020;
    /// Object is taken out of its slot by a running action.
    pub const CHECKED_OUT: u16 = 0x040;
    pub const IN_DIRTY_LIST: u16 = 0x080;
    pub const IN_TRANSACTION: u16 = 0x100;

    pub fn new_object(mapping: usize, obj: Box<dyn Any>) -> Self {
        Self {
            mapping,
            id: None,
            version: -1,
            state: Self::NEEDS_SAVE,
            obj: Some(obj),
        }
    }

    pub fn persisted(mapping: usize, id: SqlValue) -> Self {
        Self {
            mapping,
            id: Some(id),
            version: -1,
            state: Self::PERSISTED,
            obj: None,
        }
    }

    pub fn is(&self, flag: u16) -> bool {
        self.state & flag != 0
    }

    pub fn set(&mut self, flag: u16) {
        self.state |= flag;
    }

    pub fn clear(&mut self, flag: u16) {
        self.state &= !flag;
    }

    /// Never written to the database, neither committed nor in the open
    /// transaction.
    pub fn is_new(&self) -> bool {
        !self.is(Self::PERSISTED) && !self.is(Self::SAVED_IN_TRANSACTION)
    }

    pub fn is_dirty(&self) -> bool {
        self.is(Self::NEEDS_SAVE) || self.is(Self::NEEDS_DELETE)
    }

    pub fn is_loaded(&self) -> bool {
        self.obj.is_some() || self.is(Self::CHECKED_OUT)
    }

    /// Version the row currently has in the database, as seen by this
    /// transaction.
    pub fn database_version(&self) -> i64 {
        self.version + if self.is(Self::SAVED_IN_TRANSACTION) { 1 } else { 0 }
    }

    pub fn status(&self) -> DboStatus {
        if self.is(Self::PURGED) {
            DboStatus::Purged
        } else if self.is(Self::NEEDS_DELETE) || self.is(Self::DELETED_IN_TRANSACTION) {
            DboStatus::Deleted
        } else if self.is_new() {
            DboStatus::New
        } else if self.is(Self::NEEDS_SAVE) {
            DboStatus::Dirty
        } else {
            DboStatus::Clean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_object_status() {
        let meta = MetaDbo::new_object(0, Box::new(1u8));
        assert_eq!(meta.status(), DboStatus::New);
        assert!(meta.is_dirty());
        assert!(meta.is_loaded());
        assert_eq!(meta.version, -1);
    }

    #[test]
    fn test_status_transitions() {
        let mut meta = MetaDbo::persisted(0, SqlValue::Integer(1));
        assert_eq!(meta.status(), DboStatus::Clean);
        assert!(!meta.is_loaded());

        meta.set(MetaDbo::NEEDS_SAVE);
        assert_eq!(meta.status(), DboStatus::Dirty);

        meta.set(MetaDbo::NEEDS_DELETE);
        assert_eq!(meta.status(), DboStatus::Deleted);

        meta.clear(MetaDbo::NEEDS_DELETE | MetaDbo::NEEDS_SAVE);
        meta.set(MetaDbo::PURGED);
        assert_eq!(meta.status(), DboStatus::Purged);
    }

    #[test]
    fn test_database_version_counts_pending_save() {
        let mut meta = MetaDbo::persisted(0, SqlValue::Integer(1));
        meta.version = 3;
        assert_eq!(meta.database_version(), 3);
        meta.set(MetaDbo::SAVED_IN_TRANSACTION);
        assert_eq!(meta.database_version(), 4);
    }
}
