//! Backend-agnostic transaction abstractions modeled after Spring's TransactionTemplate.
//! This module defines only generic types and traits. Backends provide implementations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::{RepoResult, Session};

/// Transaction isolation level (best-effort across backends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Transaction definition describing desired semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDefinition {
    pub isolation: Isolation,
    /// Writes inside a read-only transaction fail.
    pub read_only: bool,
    /// Upper bound on waiting for locks, where the backend supports it.
    pub timeout: Option<Duration>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            isolation: Isolation::Default,
            read_only: false,
            timeout: None,
        }
    }
}

impl TransactionDefinition {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

/// Backend-implemented transaction manager.
///
/// `execute` hands the callback a session bound to a fresh transaction. The transaction
/// commits when the callback returns `Ok` and rolls back when it returns `Err`, in which case
/// that error is returned unchanged. Failures to begin, commit or roll back surface as
/// [`crate::RepoError::Transaction`].
#[async_trait]
pub trait TransactionManager: Send + Sync {
    type Session: Session + Clone + 'static;

    /// A session outside any transaction; each statement commits on its own.
    async fn session(&self) -> RepoResult<Self::Session>;

    async fn execute<R, F, Fut>(&self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(Self::Session) -> Fut + Send,
        Fut: Future<Output = RepoResult<R>> + Send,
        R: Send;
}

/// Convenience wrapper similar to Spring's TransactionTemplate.
#[derive(Debug, Clone)]
pub struct TransactionTemplate<M: TransactionManager> {
    manager: M,
    defaults: TransactionDefinition,
}

impl<M: TransactionManager> TransactionTemplate<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            defaults: TransactionDefinition::default(),
        }
    }

    pub fn with_defaults(mut self, def: TransactionDefinition) -> Self {
        self.defaults = def;
        self
    }

    pub fn defaults(&self) -> &TransactionDefinition {
        &self.defaults
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Autocommit session for reads and one-off writes.
    pub async fn session(&self) -> RepoResult<M::Session> {
        self.manager.session().await
    }

    pub async fn execute<R, F, Fut>(&self, f: F) -> RepoResult<R>
    where
        F: FnOnce(M::Session) -> Fut + Send,
        Fut: Future<Output = RepoResult<R>> + Send,
        R: Send,
    {
        self.manager.execute(&self.defaults, f).await
    }

    pub async fn execute_with<R, F, Fut>(&self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(M::Session) -> Fut + Send,
        Fut: Future<Output = RepoResult<R>> + Send,
        R: Send,
    {
        self.manager.execute(def, f).await
    }
}
