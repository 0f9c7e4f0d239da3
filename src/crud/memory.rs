//! In-memory data session
//!
//! Reference [`DataSession`] backed by process memory. `begin` snapshots the
//! committed tables into a private staging copy and starts a write log;
//! reads inside the transaction see the snapshot plus the session's own
//! writes. `commit` replays the log onto the current committed tables under
//! the store's write lock, so transactions on separate sessions never drop
//! each other's rows. `rollback` discards both. Operations outside a
//! transaction apply directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use uuid::Uuid;

use super::filters::matches_all;
use super::session::{DataSession, Row, RowQuery, SessionError, SessionFuture, SessionResult};
use super::sorter::sort_rows;

/// Rows per model in insertion order, each with its primary key value
type Tables = HashMap<String, Vec<(Value, Row)>>;

/// One staged write, replayed at commit
#[derive(Debug, Clone)]
enum Write {
    Insert { model: String, key: Value, row: Row },
    Update { model: String, id: Value, changes: Row },
    Delete { model: String, id: Value },
}

/// Private state of an open transaction
#[derive(Debug)]
struct Staging {
    tables: Tables,
    log: Vec<Write>,
}

/// Shared committed state
#[derive(Debug, Default)]
pub struct InMemoryStore {
    committed: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new session on this store
    pub fn session(self: &Arc<Self>) -> Arc<InMemorySession> {
        Arc::new(InMemorySession {
            store: Arc::clone(self),
            staging: Mutex::new(None),
        })
    }

    /// Committed rows of `model`, in insertion order
    pub fn rows(&self, model: &str) -> Vec<Row> {
        self.committed
            .read()
            .map(|tables| {
                tables
                    .get(model)
                    .map(|rows| rows.iter().map(|(_, row)| row.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of committed rows in `model`
    pub fn len(&self, model: &str) -> usize {
        self.committed
            .read()
            .map(|tables| tables.get(model).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, model: &str) -> bool {
        self.len(model) == 0
    }
}

/// One caller's view of an [`InMemoryStore`]
#[derive(Debug)]
pub struct InMemorySession {
    store: Arc<InMemoryStore>,
    staging: Mutex<Option<Staging>>,
}

impl InMemorySession {
    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.staging.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> SessionResult<R> {
        let staging = self.staging.lock().map_err(|_| poisoned())?;
        match staging.as_ref() {
            Some(staged) => Ok(f(&staged.tables)),
            None => {
                let committed = self.store.committed.read().map_err(|_| poisoned())?;
                Ok(f(&committed))
            }
        }
    }

    /// Applies `write` to the staging copy and logs it, or straight to the
    /// committed tables outside a transaction
    fn apply(&self, write: Write) -> SessionResult<Applied> {
        let mut staging = self.staging.lock().map_err(|_| poisoned())?;
        match staging.as_mut() {
            Some(staged) => {
                let applied = apply_write(&mut staged.tables, &write)?;
                if applied.changed() {
                    staged.log.push(write);
                }
                Ok(applied)
            }
            None => {
                let mut committed = self.store.committed.write().map_err(|_| poisoned())?;
                apply_write(&mut committed, &write)
            }
        }
    }

    fn begin_now(&self) -> SessionResult<()> {
        let mut staging = self.staging.lock().map_err(|_| poisoned())?;
        if staging.is_some() {
            return Err(SessionError::Transaction(
                "transaction already open".to_string(),
            ));
        }
        let snapshot = self
            .store
            .committed
            .read()
            .map_err(|_| poisoned())?
            .clone();
        *staging = Some(Staging {
            tables: snapshot,
            log: Vec::new(),
        });
        Ok(())
    }

    /// Replays the log onto a copy of the current committed tables and
    /// publishes it only if every write still applies
    fn commit_now(&self) -> SessionResult<()> {
        let mut staging = self.staging.lock().map_err(|_| poisoned())?;
        let staged = staging
            .take()
            .ok_or_else(|| SessionError::Transaction("no open transaction".to_string()))?;
        if staged.log.is_empty() {
            return Ok(());
        }

        let mut committed = self.store.committed.write().map_err(|_| poisoned())?;
        let mut next = committed.clone();
        for write in &staged.log {
            if let Applied::Missing = apply_write(&mut next, write)? {
                if let Write::Update { model, id, .. } = write {
                    return Err(SessionError::Conflict(format!(
                        "row {} in {} was removed by a concurrent transaction",
                        id, model
                    )));
                }
            }
        }
        *committed = next;
        Ok(())
    }

    fn rollback_now(&self) -> SessionResult<()> {
        self.staging.lock().map_err(|_| poisoned())?.take();
        Ok(())
    }
}

/// Outcome of one write against a set of tables
#[derive(Debug)]
enum Applied {
    Row(Row),
    Deleted,
    Missing,
}

impl Applied {
    fn changed(&self) -> bool {
        !matches!(self, Applied::Missing)
    }
}

fn apply_write(tables: &mut Tables, write: &Write) -> SessionResult<Applied> {
    match write {
        Write::Insert { model, key, row } => {
            let rows = tables.entry(model.clone()).or_default();
            if rows.iter().any(|(k, _)| k == key) {
                return Err(SessionError::Conflict(format!(
                    "duplicate primary key {} in {}",
                    key, model
                )));
            }
            rows.push((key.clone(), row.clone()));
            Ok(Applied::Row(row.clone()))
        }
        Write::Update { model, id, changes } => {
            let found = tables
                .get_mut(model)
                .and_then(|rows| rows.iter_mut().find(|(key, _)| key == id));
            let Some((_, row)) = found else {
                return Ok(Applied::Missing);
            };
            for (field, value) in changes {
                row.insert(field.clone(), value.clone());
            }
            Ok(Applied::Row(row.clone()))
        }
        Write::Delete { model, id } => {
            let Some(rows) = tables.get_mut(model) else {
                return Ok(Applied::Missing);
            };
            let before = rows.len();
            rows.retain(|(key, _)| key != id);
            if rows.len() != before {
                Ok(Applied::Deleted)
            } else {
                Ok(Applied::Missing)
            }
        }
    }
}

fn poisoned() -> SessionError {
    SessionError::Backend("in-memory store lock poisoned".to_string())
}

fn ready<'a, T: Send + 'a>(result: SessionResult<T>) -> SessionFuture<'a, T> {
    Box::pin(async move { result })
}

impl DataSession for InMemorySession {
    fn begin(&self) -> SessionFuture<'_, ()> {
        ready(self.begin_now())
    }

    fn commit(&self) -> SessionFuture<'_, ()> {
        ready(self.commit_now())
    }

    fn rollback(&self) -> SessionFuture<'_, ()> {
        ready(self.rollback_now())
    }

    fn get<'a>(&'a self, model: &'a str, id: &'a Value) -> SessionFuture<'a, Option<Row>> {
        ready(self.read(|tables| {
            tables
                .get(model)
                .and_then(|rows| rows.iter().find(|(key, _)| key == id))
                .map(|(_, row)| row.clone())
        }))
    }

    fn insert<'a>(&'a self, model: &'a str, pk: &'a str, mut row: Row) -> SessionFuture<'a, Row> {
        let key = match row.get(pk) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                let key = Value::String(Uuid::new_v4().to_string());
                row.insert(pk.to_string(), key.clone());
                key
            }
        };
        let write = Write::Insert {
            model: model.to_string(),
            key,
            row: row.clone(),
        };
        ready(self.apply(write).map(|_| row))
    }

    fn update<'a>(
        &'a self,
        model: &'a str,
        id: &'a Value,
        changes: Row,
    ) -> SessionFuture<'a, Option<Row>> {
        let write = Write::Update {
            model: model.to_string(),
            id: id.clone(),
            changes,
        };
        ready(self.apply(write).map(|applied| match applied {
            Applied::Row(row) => Some(row),
            _ => None,
        }))
    }

    fn delete<'a>(&'a self, model: &'a str, id: &'a Value) -> SessionFuture<'a, bool> {
        let write = Write::Delete {
            model: model.to_string(),
            id: id.clone(),
        };
        ready(self.apply(write).map(|applied| matches!(applied, Applied::Deleted)))
    }

    fn query<'a>(&'a self, model: &'a str, query: &'a RowQuery) -> SessionFuture<'a, Vec<Row>> {
        ready(self.read(|tables| {
            let mut rows: Vec<Row> = tables
                .get(model)
                .map(|rows| {
                    rows.iter()
                        .filter(|(_, row)| matches_all(row, &query.predicates))
                        .map(|(_, row)| row.clone())
                        .collect()
                })
                .unwrap_or_default();
            if let Some(sort) = &query.sort {
                sort_rows(&mut rows, sort);
            }
            let limit = query.limit.unwrap_or(usize::MAX);
            rows.into_iter().skip(query.skip).take(limit).collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crud::filters::Predicate;
    use crate::crud::sorter::SortSpec;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_generates_key() {
        let store = InMemoryStore::new();
        let session = store.session();

        let stored = session.insert("W", "id", row(json!({"name": "a"}))).await.unwrap();
        let id = stored["id"].clone();
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());
        assert_eq!(session.get("W", &id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let store = InMemoryStore::new();
        let session = store.session();
        session.insert("W", "id", row(json!({"id": 1}))).await.unwrap();
        let err = session.insert("W", "id", row(json!({"id": 1}))).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_rows() {
        let store = InMemoryStore::new();
        let session = store.session();

        session.begin().await.unwrap();
        session.insert("W", "id", row(json!({"id": 1}))).await.unwrap();
        assert!(store.is_empty("W"));
        session.rollback().await.unwrap();
        assert!(store.is_empty("W"));
        assert!(!session.in_transaction());

        session.begin().await.unwrap();
        session.insert("W", "id", row(json!({"id": 2}))).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(store.len("W"), 1);
    }

    #[tokio::test]
    async fn test_commit_without_begin_fails() {
        let store = InMemoryStore::new();
        let session = store.session();
        assert!(session.commit().await.is_err());
        assert!(session.rollback().await.is_ok());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryStore::new();
        let session = store.session();
        session.insert("W", "id", row(json!({"id": 1, "n": "a"}))).await.unwrap();

        let updated = session
            .update("W", &json!(1), row(json!({"n": "b"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["n"], "b");
        assert!(session.update("W", &json!(9), Row::new()).await.unwrap().is_none());

        assert!(session.delete("W", &json!(1)).await.unwrap());
        assert!(!session.delete("W", &json!(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_pages() {
        let store = InMemoryStore::new();
        let session = store.session();
        for v in [3, 1, 2, 5] {
            session.insert("W", "id", row(json!({"v": v}))).await.unwrap();
        }

        let query = RowQuery::new()
            .filter([Predicate::new("v", crate::spec::FilterOp::Gt, json!(1))])
            .sort(Some(SortSpec::desc("v")))
            .page(1, Some(2));
        let rows = session.query("W", &query).await.unwrap();
        let values: Vec<_> = rows.iter().map(|r| r["v"].clone()).collect();
        assert_eq!(values, [json!(3), json!(2)]);
    }

    #[tokio::test]
    async fn test_interleaved_transactions_keep_both_writes() {
        let store = InMemoryStore::new();
        let a = store.session();
        let b = store.session();

        a.begin().await.unwrap();
        b.begin().await.unwrap();
        a.insert("W", "id", row(json!({"id": 1}))).await.unwrap();
        b.insert("W", "id", row(json!({"id": 2}))).await.unwrap();
        a.commit().await.unwrap();
        b.commit().await.unwrap();

        assert_eq!(store.len("W"), 2);
    }

    #[tokio::test]
    async fn test_commit_conflicts_on_concurrent_key() {
        let store = InMemoryStore::new();
        let a = store.session();
        let b = store.session();

        a.begin().await.unwrap();
        b.begin().await.unwrap();
        a.insert("W", "id", row(json!({"id": 1, "by": "a"}))).await.unwrap();
        b.insert("W", "id", row(json!({"id": 1, "by": "b"}))).await.unwrap();
        a.commit().await.unwrap();

        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));
        assert!(!b.in_transaction());
        assert_eq!(store.rows("W")[0]["by"], "a");
    }

    #[tokio::test]
    async fn test_update_of_concurrently_deleted_row_conflicts() {
        let store = InMemoryStore::new();
        let setup = store.session();
        setup.insert("W", "id", row(json!({"id": 1, "n": "a"}))).await.unwrap();

        let a = store.session();
        a.begin().await.unwrap();
        a.update("W", &json!(1), row(json!({"n": "b"}))).await.unwrap();
        setup.delete("W", &json!(1)).await.unwrap();

        assert!(matches!(a.commit().await.unwrap_err(), SessionError::Conflict(_)));
        assert!(store.is_empty("W"));
    }
}
