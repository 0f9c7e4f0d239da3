//! Data session contract
//!
//! The kernel issues no raw storage commands; every row operation goes
//! through an injected [`DataSession`]. The session owns its own isolation
//! and locking. The kernel only guarantees the call order:
//! `begin` before PRE_HANDLER, `commit` after every OUT_* phase succeeded,
//! `rollback` on any abort once `begin` ran.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use thiserror::Error;

use super::filters::Predicate;
use super::sorter::SortSpec;

/// A stored row, keyed by field name
pub type Row = Map<String, Value>;

/// Boxed future returned by session methods
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = SessionResult<T>> + Send + 'a>>;

/// Session result type
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by a data session
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Constraint violation, e.g. a duplicate primary key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// `commit` without a matching `begin`, or a nested `begin`
    #[error("Transaction state error: {0}")]
    Transaction(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Filter, order and page for a list-style query
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub predicates: Vec<Predicate>,
    pub sort: Option<SortSpec>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.predicates.extend(predicates);
        self
    }

    pub fn sort(mut self, sort: Option<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }
}

/// Transactional row store used by CRUD handlers
pub trait DataSession: Send + Sync {
    /// Open a transaction
    fn begin(&self) -> SessionFuture<'_, ()>;

    /// Publish the open transaction
    fn commit(&self) -> SessionFuture<'_, ()>;

    /// Discard the open transaction. Must be idempotent.
    fn rollback(&self) -> SessionFuture<'_, ()>;

    /// Fetch a row by primary key
    fn get<'a>(&'a self, model: &'a str, id: &'a Value) -> SessionFuture<'a, Option<Row>>;

    /// Insert a row. Generates the primary key when absent; returns the stored row.
    fn insert<'a>(&'a self, model: &'a str, pk: &'a str, row: Row) -> SessionFuture<'a, Row>;

    /// Apply `changes` to the row with key `id`; `None` if absent
    fn update<'a>(
        &'a self,
        model: &'a str,
        id: &'a Value,
        changes: Row,
    ) -> SessionFuture<'a, Option<Row>>;

    /// Remove the row with key `id`; `false` if absent
    fn delete<'a>(&'a self, model: &'a str, id: &'a Value) -> SessionFuture<'a, bool>;

    /// Filter, sort and paginate rows
    fn query<'a>(&'a self, model: &'a str, query: &'a RowQuery) -> SessionFuture<'a, Vec<Row>>;
}
