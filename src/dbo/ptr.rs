use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Address of one object in a session's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DboKey {
    pub(crate) session: u64,
    pub(crate) index: usize,
}

impl DboKey {
    pub(crate) fn new(session: u64, index: usize) -> Self {
        Self { session, index }
    }
}

/// Handle to a persisted object of class `C`.
///
/// A `Ptr` is a plain copyable key into the session that created it; the
/// object itself is reached through `Session::get` and `Session::modify`.
/// Two handles are equal exactly when they refer to the same database row,
/// since the session keeps one object per row.
pub struct Ptr<C> {
    key: Option<DboKey>,
    _marker: PhantomData<fn() -> C>,
}

impl<C> Ptr<C> {
    /// The null handle.
    pub const fn null() -> Self {
        Self {
            key: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_key(key: DboKey) -> Self {
        Self {
            key: Some(key),
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_option(key: Option<DboKey>) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.key.is_none()
    }

    pub fn reset(&mut self) {
        self.key = None;
    }

    pub(crate) fn key(&self) -> Option<DboKey> {
        self.key
    }
}

impl<C> Default for Ptr<C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<C> Clone for Ptr<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Ptr<C> {}

impl<C> PartialEq for Ptr<C> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<C> Eq for Ptr<C> {}

impl<C> Hash for Ptr<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<C> PartialOrd for Ptr<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Ptr<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl<C> fmt::Debug for Ptr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "Ptr({}:{})", key.session, key.index),
            None => write!(f, "Ptr(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct Thing;

    #[test]
    fn test_null_by_default() {
        let p: Ptr<Thing> = Ptr::default();
        assert!(p.is_null());
        assert_eq!(p, Ptr::null());
    }

    #[test]
    fn test_identity_follows_key() {
        let a: Ptr<Thing> = Ptr::from_key(DboKey::new(1, 3));
        let b = a;
        let c: Ptr<Thing> = Ptr::from_key(DboKey::new(1, 4));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: BTreeSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_reset_makes_null() {
        let mut a: Ptr<Thing> = Ptr::from_key(DboKey::new(1, 0));
        a.reset();
        assert!(a.is_null());
        assert_eq!(format!("{:?}", a), "Ptr(null)");
    }
}
