// ============================================================================
// Transactions
// ============================================================================
//
// A Transaction is a scoped handle on a Session. Creating one begins a
// transaction, or joins the one already open; dropping it without commit
// rolls the whole transaction back.
//
// The handle dereferences to the Session, so all session operations are
// available through it.
//
// ============================================================================

pub mod state;

pub use state::{TransactionId, TransactionState};
pub(crate) use state::TransactionImpl;

use std::ops::{Deref, DerefMut};

use log::warn;
use tracing::{Level, event, info_span};

use crate::core::Result;
use crate::session::Session;

/// Scoped transaction on a session.
///
/// ```
/// use rustdbo::{Session, connection::Sqlite3};
///
/// let mut session = Session::new(Sqlite3::open_in_memory()?);
/// let mut t = session.transaction();
/// assert!(t.is_active());
/// t.commit()?;
/// # Ok::<(), rustdbo::DboError>(())
/// ```
pub struct Transaction<'s> {
    session: &'s mut Session,
    id: TransactionId,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        let id = session.begin_transaction();
        Self {
            session,
            id,
            finished: false,
        }
    }

    /// Joins this transaction; its commit only ends the nesting level.
    pub fn nested(&mut self) -> Transaction<'_> {
        Transaction::new(&mut *self.session)
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// False once the transaction was rolled back, by this handle or a
    /// nested one.
    pub fn is_active(&self) -> bool {
        !self.finished && self.session.transaction_active()
    }

    /// Commits this level. The outermost commit flushes all changes and
    /// commits the database transaction; if that fails everything is rolled
    /// back and the error returned.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;

        let span = info_span!("dbo_commit", transaction = %self.id);
        let _enter = span.enter();

        match self.session.commit_transaction() {
            Ok(()) => {
                event!(Level::DEBUG, "transaction committed");
                Ok(())
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, "transaction commit failed");
                Err(err)
            }
        }
    }

    /// Rolls back the whole transaction, including enclosing levels.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;

        let span = info_span!("dbo_rollback", transaction = %self.id);
        let _enter = span.enter();

        self.session.rollback_transaction()?;
        event!(Level::DEBUG, "transaction rolled back");
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.session.rollback_transaction() {
            warn!("Rollback of {} on drop failed: {}", self.id, e);
        }
    }
}
