//! Transaction management.
//!
//! Transactions have thread affinity: a transaction is usable from the
//! thread that began it, or from a thread that explicitly opened it with
//! [`Transaction::open_in_current_thread`]. Opening is scoped and
//! ref-counted; the returned [`TxScope`] releases the binding on drop.
//! Other threads never observe a binding they did not make.
//!
//! The manager only tracks open transactions. A finished transaction's
//! terminal state lives on in its handle, so misuse still fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
    /// Invalidated by [`TransactionManager::clear`].
    Invalidated,
}

/// State shared between the manager's record and the handle.
type SharedState = Arc<Mutex<TxState>>;

#[derive(Debug)]
struct TxRecord {
    state: SharedState,
    owner: ThreadId,
}

#[derive(Debug)]
struct ThreadBinding {
    tx: TxId,
    depth: usize,
}

#[derive(Debug, Default)]
struct ManagerState {
    next_id: u64,
    transactions: HashMap<TxId, TxRecord>,
    threads: HashMap<ThreadId, ThreadBinding>,
}

/// Hands out transactions and tracks their state and thread bindings.
#[derive(Debug, Clone, Default)]
pub struct TransactionManager {
    inner: Arc<Mutex<ManagerState>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new transaction owned by the calling thread.
    pub fn begin(&self, mode: TxMode) -> Transaction {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = TxId(state.next_id);
        let shared = Arc::new(Mutex::new(TxState::Open));
        state.transactions.insert(id, TxRecord { state: Arc::clone(&shared), owner: thread::current().id() });
        debug!(%id, ?mode, "transaction begun");
        Transaction { id, mode, state: shared, manager: self.clone() }
    }

    /// Transaction explicitly opened in the calling thread, if any.
    pub fn current(&self) -> Option<TxId> {
        self.inner.lock().threads.get(&thread::current().id()).map(|b| b.tx)
    }

    /// State of a transaction the manager still tracks. Finished
    /// transactions are forgotten and report `None`.
    pub fn state(&self, id: TxId) -> Option<TxState> {
        self.inner.lock().transactions.get(&id).map(|r| *r.state.lock())
    }

    /// Number of transactions still open.
    pub fn open_count(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    /// Invalidate every outstanding transaction and drop all thread bindings.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        for (_, record) in state.transactions.drain() {
            *record.state.lock() = TxState::Invalidated;
        }
        state.threads.clear();
        debug!("transaction manager cleared");
    }

    fn finish(&self, id: TxId, handle: &SharedState, to: TxState) -> Result<()> {
        let mut state = self.inner.lock();
        let Some(record) = state.transactions.remove(&id) else {
            return Err(Error::TransactionState(format!(
                "cannot move {id} to {to:?}: transaction is {:?}",
                *handle.lock()
            )));
        };
        *record.state.lock() = to;
        state.threads.retain(|_, b| b.tx != id);
        debug!(%id, ?to, "transaction finished");
        Ok(())
    }

    fn open_in_thread(&self, id: TxId, handle: &SharedState) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.transactions.contains_key(&id) {
            return Err(Error::TransactionState(format!("cannot open {id}: transaction is {:?}", *handle.lock())));
        }
        let thread = thread::current().id();
        match state.threads.get_mut(&thread) {
            Some(binding) if binding.tx == id => binding.depth += 1,
            Some(binding) => {
                return Err(Error::TransactionState(format!(
                    "cannot open {id}: {} is already open in the current thread",
                    binding.tx
                )));
            }
            None => {
                state.threads.insert(thread, ThreadBinding { tx: id, depth: 1 });
            }
        }
        trace!(%id, "opened in current thread");
        Ok(())
    }

    fn release(&self, id: TxId) {
        let mut state = self.inner.lock();
        let thread = thread::current().id();
        if let Some(binding) = state.threads.get_mut(&thread) {
            if binding.tx == id {
                binding.depth -= 1;
                if binding.depth == 0 {
                    state.threads.remove(&thread);
                }
            }
        }
    }

    fn check_usable(&self, id: TxId, handle: &SharedState) -> Result<()> {
        let state = self.inner.lock();
        let Some(record) = state.transactions.get(&id) else {
            return Err(Error::TransactionState(format!("{id} is {:?}", *handle.lock())));
        };
        let thread = thread::current().id();
        let bound_here = state.threads.get(&thread).is_some_and(|b| b.tx == id);
        if record.owner != thread && !bound_here {
            return Err(Error::TransactionState(format!("{id} is not open in the current thread")));
        }
        Ok(())
    }
}

/// Handle to a transaction created by a [`TransactionManager`].
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    mode: TxMode,
    state: SharedState,
    manager: TransactionManager,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn state(&self) -> TxState {
        *self.state.lock()
    }

    /// Bind this transaction to the calling thread until the scope drops.
    /// Nested calls from the same thread are ref-counted.
    pub fn open_in_current_thread(&self) -> Result<TxScope<'_>> {
        self.manager.open_in_thread(self.id, &self.state)?;
        Ok(TxScope { tx: self })
    }

    /// Fails unless the transaction is open and usable from this thread.
    pub fn check_usable(&self) -> Result<()> {
        self.manager.check_usable(self.id, &self.state)
    }

    pub fn commit(&self) -> Result<()> {
        self.manager.finish(self.id, &self.state, TxState::Committed)
    }

    pub fn rollback(&self) -> Result<()> {
        self.manager.finish(self.id, &self.state, TxState::RolledBack)
    }
}

/// RAII binding of a transaction to the current thread.
#[derive(Debug)]
pub struct TxScope<'t> {
    tx: &'t Transaction,
}

impl TxScope<'_> {
    pub fn transaction(&self) -> &Transaction {
        self.tx
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        self.tx.manager.release(self.tx.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_twice_fails() {
        let mgr = TransactionManager::new();
        let tx = mgr.begin(TxMode::ReadWrite);
        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert!(matches!(tx.commit(), Err(Error::TransactionState(_))));
        assert!(matches!(tx.rollback(), Err(Error::TransactionState(_))));
        assert!(tx.open_in_current_thread().is_err());
    }

    #[test]
    fn test_rollback_then_commit_fails() {
        let mgr = TransactionManager::new();
        let tx = mgr.begin(TxMode::ReadWrite);
        tx.rollback().unwrap();
        assert!(tx.commit().is_err());
    }

    #[test]
    fn test_nested_open_is_refcounted() {
        let mgr = TransactionManager::new();
        let tx = mgr.begin(TxMode::ReadWrite);
        assert_eq!(mgr.current(), None);
        {
            let _outer = tx.open_in_current_thread().unwrap();
            {
                let _inner = tx.open_in_current_thread().unwrap();
                assert_eq!(mgr.current(), Some(tx.id()));
            }
            assert_eq!(mgr.current(), Some(tx.id()));
        }
        assert_eq!(mgr.current(), None);
    }

    #[test]
    fn test_second_transaction_in_same_thread_fails() {
        let mgr = TransactionManager::new();
        let a = mgr.begin(TxMode::ReadWrite);
        let b = mgr.begin(TxMode::ReadWrite);
        let _scope = a.open_in_current_thread().unwrap();
        assert!(matches!(b.open_in_current_thread(), Err(Error::TransactionState(_))));
    }

    #[test]
    fn test_other_thread_sees_no_current_transaction() {
        let mgr = TransactionManager::new();
        let tx = mgr.begin(TxMode::ReadWrite);
        let _scope = tx.open_in_current_thread().unwrap();
        let other = mgr.clone();
        let seen = std::thread::spawn(move || other.current()).join().unwrap();
        assert_eq!(seen, None);
        assert_eq!(mgr.current(), Some(tx.id()));
    }

    #[test]
    fn test_transaction_not_usable_from_foreign_thread() {
        let mgr = TransactionManager::new();
        let tx = Arc::new(mgr.begin(TxMode::ReadWrite));
        tx.check_usable().unwrap();
        let shared = Arc::clone(&tx);
        let foreign = std::thread::spawn(move || shared.check_usable().is_err()).join().unwrap();
        assert!(foreign);

        let shared = Arc::clone(&tx);
        let handed_off = std::thread::spawn(move || {
            let _scope = shared.open_in_current_thread().unwrap();
            shared.check_usable().is_ok()
        })
        .join()
        .unwrap();
        assert!(handed_off);
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let mgr = TransactionManager::new();
        let a = mgr.begin(TxMode::ReadWrite);
        let b = mgr.begin(TxMode::ReadOnly);
        let _scope = a.open_in_current_thread().unwrap();
        assert_eq!(mgr.open_count(), 2);
        mgr.clear();
        assert_eq!(mgr.open_count(), 0);
        assert_eq!(mgr.current(), None);
        assert_eq!(a.state(), TxState::Invalidated);
        assert!(a.commit().is_err());
        assert!(b.rollback().is_err());
        assert!(b.open_in_current_thread().is_err());
    }

    #[test]
    fn test_finished_transactions_are_forgotten() {
        let mgr = TransactionManager::new();
        for _ in 0..100 {
            let tx = mgr.begin(TxMode::ReadWrite);
            tx.commit().unwrap();
            let other = mgr.begin(TxMode::ReadOnly);
            other.rollback().unwrap();
        }
        let kept = mgr.begin(TxMode::ReadWrite);
        assert_eq!(mgr.open_count(), 1);
        assert_eq!(mgr.inner.lock().transactions.len(), 1);
        assert_eq!(mgr.state(kept.id()), Some(TxState::Open));

        kept.commit().unwrap();
        assert_eq!(mgr.state(kept.id()), None);
        assert_eq!(kept.state(), TxState::Committed);
        assert!(matches!(kept.commit(), Err(Error::TransactionState(m)) if m.contains("Committed")));
        assert!(kept.check_usable().is_err());
    }
}
