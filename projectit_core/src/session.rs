//! The store-agnostic contract backends implement.

use crate::{ParamValue, RepoResult, Row, SequenceDefinition};
use async_trait::async_trait;

/// A structured `SELECT` of named columns with an optional equality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Select<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    /// Conjunction of `column = value` comparisons.
    pub filter: Vec<(&'a str, ParamValue)>,
    /// Ascending order column. `None` leaves the backend's natural order.
    pub order_by: Option<&'a str>,
}

impl<'a> Select<'a> {
    pub fn new(table: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            table,
            columns,
            filter: Vec::new(),
            order_by: None,
        }
    }

    pub fn filter(mut self, column: &'a str, value: ParamValue) -> Self {
        self.filter.push((column, value));
        self
    }

    pub fn order_by(mut self, column: &'a str) -> Self {
        self.order_by = Some(column);
        self
    }
}

/// An explicit handle to storage. Every repository operation receives one; a session
/// obtained inside [`crate::transactions::TransactionManager::execute`] is bound to
/// that transaction, one obtained from `session()` autocommits each statement.
#[async_trait]
pub trait Session: Send + Sync {
    /// Allocate the next value of `sequence`, creating it at its initial value on first use.
    async fn next_value(&self, sequence: &SequenceDefinition) -> RepoResult<i64>;

    async fn insert(&self, table: &str, columns: &[&str], values: Vec<ParamValue>)
        -> RepoResult<()>;

    /// Returns the number of rows changed (0 or 1).
    async fn update(
        &self,
        table: &str,
        id_column: &str,
        id: i64,
        columns: &[&str],
        values: Vec<ParamValue>,
    ) -> RepoResult<u64>;

    async fn delete_by_id(&self, table: &str, id_column: &str, id: i64) -> RepoResult<u64>;

    /// Remove every row of `table` in one statement.
    async fn delete_all(&self, table: &str) -> RepoResult<u64>;

    async fn select(&self, select: &Select<'_>) -> RepoResult<Vec<Row>>;

    async fn count(&self, table: &str) -> RepoResult<u64>;
}
