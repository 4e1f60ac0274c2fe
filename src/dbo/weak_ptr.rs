use std::fmt;

use super::collection::{Collection, RelationData};
use super::ptr::Ptr;
use crate::core::{DboError, Result};
use crate::persist::Persist;
use crate::session::Session;

/// The one side of a one-to-one relation.
///
/// Holds no reference of its own: the other class stores a `belongs_to`
/// pointing here, and every access queries for it.
pub struct WeakPtr<C> {
    collection: Collection<C>,
}

impl<C> Default for WeakPtr<C> {
    fn default() -> Self {
        Self {
            collection: Collection::default(),
        }
    }
}

impl<C> Clone for WeakPtr<C> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
        }
    }
}

impl<C> fmt::Debug for WeakPtr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.collection.relation() {
            Some(rel) => write!(f, "WeakPtr('{}')", rel.join_name),
            None => write!(f, "WeakPtr(unbound)"),
        }
    }
}

impl<C> WeakPtr<C> {
    pub(crate) fn bind_relation(&mut self, relation: RelationData) {
        self.collection.bind_relation(relation);
    }

    pub(crate) fn relation(&self) -> Option<&RelationData> {
        self.collection.relation()
    }

    pub fn is_bound(&self) -> bool {
        self.collection.is_bound()
    }

    /// The object currently referring back to the owner.
    pub fn query(&self, session: &mut Session) -> Result<Option<Ptr<C>>> {
        let mut cursor = self.collection.cursor(session)?;
        let first = cursor.fetch_next(session);
        let second = match &first {
            Ok(Some(_)) => cursor.fetch_next(session),
            _ => Ok(None),
        };
        cursor.close(session);

        match (first?, second?) {
            (Some(_), Some(_)) => Err(DboError::Consistency(
                "one-to-one relation matches more than one row".into(),
            )),
            (first, _) => Ok(first),
        }
    }
}

impl<C: Persist> WeakPtr<C> {
    /// Points the relation at `target`: the previous object's reference is
    /// cleared and the new one's is set to the owner.
    pub fn reset(&self, session: &mut Session, target: Option<Ptr<C>>) -> Result<()> {
        let rel = self
            .relation()
            .cloned()
            .ok_or_else(|| DboError::Usage("weak pointer is not bound to a session".into()))?;

        let current = self.query(session)?;
        if current == target {
            return Ok(());
        }

        if let Some(old) = current {
            let old_key = session.check_ptr(&old)?;
            session.set_reciproce(old_key, &rel.join_name, None)?;
        }

        if let Some(new) = target {
            let new_key = session.check_ptr(&new)?;
            session.set_reciproce(new_key, &rel.join_name, Some((rel.owner, rel.owner_mapping)))?;
        }

        Ok(())
    }
}
