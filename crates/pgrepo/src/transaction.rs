//! Transaction scopes.
//!
//! A [`TransactionalExecutor`] opens a [`TransactionScope`]: an [`Executor`] whose
//! statements only become visible once it is committed. Manager methods accept any
//! `Executor`, so the same method runs inside or outside a transaction.
//!
//! For ergonomic commit/rollback handling, use
//! [`run_transaction`](TransactionalExecutor::run_transaction):
//!
//! ```ignore
//! use pgrepo::{TransactionalExecutor, field_map};
//!
//! let (mut client, connection) = tokio_postgres::connect("postgres://...", NoTls).await?;
//! tokio::spawn(async move { let _ = connection.await; });
//!
//! let accounts = accounts.clone();
//! client
//!     .run_transaction(move |tx| {
//!         Box::pin(async move {
//!             accounts.update_by_id(tx, 1, &field_map! { "balance" => 0 }).await?;
//!             accounts.delete_by_id(tx, 2).await?;
//!             Ok(())
//!         })
//!     })
//!     .await?;
//! ```

use crate::error::{OrmError, OrmResult};
use crate::executor::Executor;
use std::future::Future;

pub use futures_util::future::BoxFuture;

/// An open transaction.
pub trait TransactionScope: Executor + Sized {
    fn commit(self) -> impl Future<Output = OrmResult<()>> + Send;

    fn rollback(self) -> impl Future<Output = OrmResult<()>> + Send;
}

/// An executor that can open a transaction scope.
pub trait TransactionalExecutor: Executor {
    type Transaction<'a>: TransactionScope
    where
        Self: 'a;

    /// Begin a transaction (a savepoint when `self` is already a transaction).
    fn begin(&mut self) -> impl Future<Output = OrmResult<Self::Transaction<'_>>> + Send;

    /// Run `f` inside one transaction.
    ///
    /// - Commits on `Ok(_)`.
    /// - Rolls back on `Err(_)` and returns that error.
    /// - A failed rollback is reported as [`OrmError::Other`] naming both errors.
    fn run_transaction<'c, T, F>(
        &'c mut self,
        f: F,
    ) -> impl Future<Output = OrmResult<T>> + Send + 'c
    where
        Self: Sized,
        T: Send + 'c,
        F: for<'t> FnOnce(&'t Self::Transaction<'c>) -> BoxFuture<'t, OrmResult<T>> + Send + 'c,
    {
        async move {
            let tx = self.begin().await?;
            let result = f(&tx).await;
            finish(tx, result).await
        }
    }
}

/// Commit `tx` if `result` is `Ok`, otherwise roll it back and hand the error on.
pub(crate) async fn finish<S, T>(tx: S, result: OrmResult<T>) -> OrmResult<T>
where
    S: TransactionScope,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            #[cfg(feature = "tracing")]
            tracing::debug!(target: "pgrepo.sql", "transaction committed");
            Ok(value)
        }
        Err(error) => match tx.rollback().await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "pgrepo.sql", error = %error, "transaction rolled back");
                Err(error)
            }
            Err(rollback_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "pgrepo.sql",
                    error = %error,
                    rollback_error = %rollback_err,
                    "transaction rollback failed"
                );
                Err(OrmError::Other(format!(
                    "{error} (rollback failed: {rollback_err})"
                )))
            }
        },
    }
}

impl TransactionScope for tokio_postgres::Transaction<'_> {
    async fn commit(self) -> OrmResult<()> {
        tokio_postgres::Transaction::commit(self)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn rollback(self) -> OrmResult<()> {
        tokio_postgres::Transaction::rollback(self)
            .await
            .map_err(OrmError::from_db_error)
    }
}

impl TransactionalExecutor for tokio_postgres::Client {
    type Transaction<'a> = tokio_postgres::Transaction<'a>;

    async fn begin(&mut self) -> OrmResult<tokio_postgres::Transaction<'_>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "pgrepo.sql", "transaction begin");
        self.transaction().await.map_err(OrmError::from_db_error)
    }
}

impl TransactionalExecutor for tokio_postgres::Transaction<'_> {
    type Transaction<'a>
        = tokio_postgres::Transaction<'a>
    where
        Self: 'a;

    async fn begin(&mut self) -> OrmResult<tokio_postgres::Transaction<'_>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "pgrepo.sql", "savepoint begin");
        self.transaction().await.map_err(OrmError::from_db_error)
    }
}

// ===== deadpool-postgres support =====

#[cfg(feature = "pool")]
impl TransactionScope for deadpool_postgres::Transaction<'_> {
    async fn commit(self) -> OrmResult<()> {
        deadpool_postgres::Transaction::commit(self)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn rollback(self) -> OrmResult<()> {
        deadpool_postgres::Transaction::rollback(self)
            .await
            .map_err(OrmError::from_db_error)
    }
}

#[cfg(feature = "pool")]
impl TransactionalExecutor for deadpool_postgres::Client {
    type Transaction<'a> = deadpool_postgres::Transaction<'a>;

    async fn begin(&mut self) -> OrmResult<deadpool_postgres::Transaction<'_>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "pgrepo.sql", "transaction begin");
        self.transaction().await.map_err(OrmError::from_db_error)
    }
}
