//! Scoped store transactions.

use ribbon_core::error::Result;
use ribbon_core::store::{GraphStore, GraphTx};

/// One store transaction owned for the duration of an API call.
///
/// [`TransactionScope::finish`] commits when the scoped work succeeded and
/// rolls back otherwise. A scope dropped without finishing discards its
/// staged statements.
pub struct TransactionScope {
    tx: Box<dyn GraphTx>,
}

impl TransactionScope {
    pub async fn begin(store: &dyn GraphStore) -> Result<Self> {
        Ok(Self {
            tx: store.begin().await?,
        })
    }

    /// The open transaction, for engines that compose inside this scope.
    pub fn tx(&mut self) -> &mut dyn GraphTx {
        self.tx.as_mut()
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        tracing::info!("Committed transaction");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        tracing::debug!("Rolled back transaction");
        Ok(())
    }

    /// Commit if `outcome` is `Ok`, otherwise roll back and return the
    /// original error. A failed rollback is logged, not reported.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Rolling back transaction");
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}
