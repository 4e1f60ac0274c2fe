// ============================================================================
// Transaction State
// ============================================================================
//
// One TransactionImpl exists per Session while any Transaction handle is
// alive. Nested handles share it through a depth count; only the outermost
// commit touches the connection.
//
// The physical database transaction is opened lazily, when the first
// statement runs.
//
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// State transitions:
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Session-side record of the open transaction.
#[derive(Debug)]
pub(crate) struct TransactionImpl {
    pub id: TransactionId,
    pub state: TransactionState,
    /// Number of live `Transaction` handles.
    pub depth: usize,
    /// Whether the database transaction was started.
    pub open: bool,
    /// Slots written in this transaction, settled when it ends.
    pub objects: Vec<usize>,
    start_time: Instant,
}

impl TransactionImpl {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            depth: 1,
            open: false,
            objects: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::new();
        let id2 = TransactionId::new();
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_new_transaction_is_active_and_closed() {
        let txn = TransactionImpl::new();
        assert!(txn.state.is_active());
        assert!(!txn.state.is_terminal());
        assert!(!txn.open);
        assert_eq!(txn.depth, 1);
        assert!(txn.objects.is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransactionState::Aborted.to_string(), "ABORTED");
        assert!(TransactionState::Committed.is_terminal());
    }
}
