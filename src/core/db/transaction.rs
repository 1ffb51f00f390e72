/// Transaction Control Module
///
/// Begins, commits and rolls back transactions on a single connection and
/// tracks the state of each one. A connection carries at most one active
/// transaction; commands issued while it is active must be bound to it.

use crate::core::{Cleanup, DaliteError, Result};
use rusqlite::Connection;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started
    NoTransaction,
    /// Transaction in progress
    Active,
    /// Transaction committed
    Committed,
    /// Transaction rolled back, explicitly or after a failure
    RolledBack,
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::NoTransaction
    }
}

/// Handle for one transaction on one connection.
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    state: TransactionState,
}

impl Transaction {
    /// Unique identifier, used to check command bindings
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Records that an active transaction is gone, e.g. with its connection
    pub(crate) fn mark_rolled_back(&mut self) {
        if self.is_active() {
            self.state = TransactionState::RolledBack;
        }
    }
}

/// Starts a transaction on `conn`
///
/// # Errors
///
/// Returns `DaliteError::Transaction` if a transaction is already active on
/// the connection or the storage layer refuses to begin one.
pub fn begin(conn: &Connection) -> Result<Transaction> {
    if !conn.is_autocommit() {
        return Err(DaliteError::Transaction("Transaction already in progress".to_string()));
    }

    conn.execute_batch("BEGIN")
        .map_err(|e| DaliteError::Transaction(format!("failed to begin transaction: {}", e)))?;

    let tx = Transaction {
        id: Uuid::new_v4(),
        state: TransactionState::Active,
    };
    debug!(transaction = %tx.id, "transaction started");
    Ok(tx)
}

/// Commits an active transaction
///
/// When the storage layer rejects the commit, whatever is left of the
/// transaction is rolled back and the handle becomes unusable.
pub fn commit(conn: &Connection, tx: &mut Transaction) -> Result<()> {
    if !tx.is_active() {
        return Err(DaliteError::Transaction(format!(
            "No transaction in progress (transaction {} is {:?})",
            tx.id, tx.state
        )));
    }

    match conn.execute_batch("COMMIT") {
        Ok(()) => {
            tx.state = TransactionState::Committed;
            debug!(transaction = %tx.id, "transaction committed");
            Ok(())
        }
        Err(e) => {
            error!(transaction = %tx.id, error = %e, "commit failed");
            rollback(conn, tx);
            Err(DaliteError::Transaction(format!(
                "failed to commit transaction {}: {}",
                tx.id, e
            )))
        }
    }
}

/// Rolls back a transaction. Never fails; a no-op unless the transaction is active.
pub fn rollback(conn: &Connection, tx: &mut Transaction) {
    let mut cleanup = Cleanup::new("transaction rollback");
    cleanup.attempt("rollback", || try_rollback(conn, tx));
    cleanup.finish();
}

/// Marks the transaction rolled back and undoes it on the connection.
///
/// The state changes even when the storage layer reports an error, so a
/// retry never issues a second ROLLBACK.
pub(crate) fn try_rollback(conn: &Connection, tx: &mut Transaction) -> Result<()> {
    if !tx.is_active() {
        return Ok(());
    }
    tx.mark_rolled_back();

    if conn.is_autocommit() {
        // the storage layer already ended it, e.g. after a failed COMMIT
        return Ok(());
    }
    conn.execute_batch("ROLLBACK")?;
    debug!(transaction = %tx.id, "transaction rolled back");
    Ok(())
}

/// SQL text bound to a connection and, while one is active, to its transaction.
#[derive(Debug, Default)]
pub struct Command {
    text: String,
    transaction: Option<Uuid>,
}

impl Command {
    pub fn new() -> Self {
        Command::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, sql: &str) {
        self.text.clear();
        self.text.push_str(sql);
    }

    /// Transaction the command is currently bound to
    pub fn transaction_id(&self) -> Option<Uuid> {
        self.transaction
    }

    /// Binds the command to `tx`, or unbinds it with `None`
    pub fn bind(&mut self, tx: Option<&Transaction>) {
        self.transaction = tx.map(Transaction::id);
    }

    /// Checks that the binding matches the connection's active transaction
    pub fn ensure_bound(&self, active: Option<&Transaction>) -> Result<()> {
        let expected = active.filter(|tx| tx.is_active()).map(Transaction::id);
        if self.transaction == expected {
            return Ok(());
        }
        warn!(bound = ?self.transaction, active = ?expected, "stale command binding");
        Err(DaliteError::Transaction(format!(
            "command is bound to transaction {:?} but the active transaction is {:?}",
            self.transaction, expected
        )))
    }
}
