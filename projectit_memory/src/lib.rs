#![forbid(unsafe_code)]
//! In-process backend: tables are vectors of [`Row`]s kept in insertion order.
//!
//! A transaction reads and writes a private copy of the tables taken when it begins and
//! records every write it makes. On commit the recorded writes are replayed against the
//! shared tables, so rows written outside the transaction in the meantime survive; on
//! rollback the copy and the record are dropped. Sequence counters live outside the
//! tables, so values drawn inside a rolled-back transaction are never handed out again.
//!
//! Foreign keys of entities registered with [`MemoryTransactionManager::with_entity`] are
//! enforced on every write.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use projectit_core::transactions::{TransactionDefinition, TransactionManager};
use projectit_core::{
    Fetchable, ForeignKey, ParamValue, RepoError, RepoResult, Row, Select, SequenceDefinition,
    Session,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("table `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },
    #[error("{columns} columns but {values} values for `{table}`")]
    ColumnCount {
        table: String,
        columns: usize,
        values: usize,
    },
    #[error("write to `{0}` inside a read-only transaction")]
    ReadOnly(String),
    #[error("`{table}.{column}` points at no row of `{target}`")]
    DanglingReference {
        table: String,
        column: String,
        target: String,
    },
    #[error("row of `{table}` is still referenced by `{referrer}.{column}`")]
    StillReferenced {
        table: String,
        referrer: String,
        column: String,
    },
    #[error("memory store lock poisoned")]
    Poisoned,
}

type Tables = HashMap<String, Vec<Row>>;

/// `(owning table, key column)` pairs collected from registered entities.
type References = Vec<(&'static str, ForeignKey)>;

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    sequences: Mutex<HashMap<String, i64>>,
}

/// A change to one table, applied to a transaction's copy and replayed on commit.
#[derive(Debug, Clone)]
enum Write {
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        id_column: String,
        id: i64,
        changes: Vec<(String, ParamValue)>,
    },
    DeleteById {
        table: String,
        id_column: String,
        id: i64,
    },
    DeleteAll {
        table: String,
    },
}

impl Write {
    fn table(&self) -> &str {
        match self {
            Write::Insert { table, .. }
            | Write::Update { table, .. }
            | Write::DeleteById { table, .. }
            | Write::DeleteAll { table } => table,
        }
    }
}

#[derive(Debug, Default)]
struct TxState {
    tables: Tables,
    writes: Vec<Write>,
}

fn lock<T>(m: &Mutex<T>) -> RepoResult<MutexGuard<'_, T>> {
    m.lock().map_err(|_| RepoError::backend(MemoryError::Poisoned))
}

fn matches_id(row: &Row, id_column: &str, id: i64) -> bool {
    matches!(row.get(id_column), Some(ParamValue::I64(v)) if *v == id)
        || matches!(row.get(id_column), Some(ParamValue::I32(v)) if i64::from(*v) == id)
}

fn same_value(a: &ParamValue, b: &ParamValue) -> bool {
    match (a, b) {
        (ParamValue::I32(x), ParamValue::I64(y)) | (ParamValue::I64(y), ParamValue::I32(x)) => {
            i64::from(*x) == *y
        }
        (ParamValue::Bool(x), ParamValue::I64(y)) | (ParamValue::I64(y), ParamValue::Bool(x)) => {
            i64::from(*x) == *y
        }
        _ => a == b,
    }
}

fn compare(a: Option<&ParamValue>, b: Option<&ParamValue>) -> Ordering {
    use ParamValue::*;
    match (a, b) {
        (Some(I64(x)), Some(I64(y))) => x.cmp(y),
        (Some(I32(x)), Some(I32(y))) => x.cmp(y),
        (Some(String(x)), Some(String(y))) => x.cmp(y),
        (Some(F64(x)), Some(F64(y))) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Some(Bool(x)), Some(Bool(y))) => x.cmp(y),
        // NULLs first, like SQLite.
        (Some(Null) | None, Some(Null) | None) => Ordering::Equal,
        (Some(Null) | None, _) => Ordering::Less,
        (_, Some(Null) | None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Every non-null key `row` holds must exist in the table it points at.
fn check_targets(tables: &Tables, references: &References, table: &str, row: &Row) -> RepoResult<()> {
    for (owner, fk) in references.iter().filter(|(owner, _)| *owner == table) {
        let value = match row.get(fk.column) {
            None | Some(ParamValue::Null) => continue,
            Some(v) => v,
        };
        let found = tables.get(fk.table).map_or(false, |rows| {
            rows.iter()
                .any(|r| r.get(fk.key_column).map_or(false, |k| same_value(k, value)))
        });
        if !found {
            return Err(RepoError::backend(MemoryError::DanglingReference {
                table: owner.to_string(),
                column: fk.column.to_string(),
                target: fk.table.to_string(),
            }));
        }
    }
    Ok(())
}

/// None of `removed` may still be pointed at from another row.
fn check_unreferenced(
    tables: &Tables,
    references: &References,
    table: &str,
    removed: &[&Row],
) -> RepoResult<()> {
    for (owner, fk) in references.iter().filter(|(_, fk)| fk.table == table) {
        let keys: Vec<&ParamValue> = removed.iter().filter_map(|r| r.get(fk.key_column)).collect();
        let referenced = tables.get(*owner).map_or(false, |rows| {
            rows.iter().any(|r| {
                r.get(fk.column)
                    .map_or(false, |v| keys.iter().any(|k| same_value(v, k)))
            })
        });
        if referenced {
            return Err(RepoError::backend(MemoryError::StillReferenced {
                table: table.to_string(),
                referrer: owner.to_string(),
                column: fk.column.to_string(),
            }));
        }
    }
    Ok(())
}

/// Apply one write to `tables`, returning the number of rows it touched.
fn apply(tables: &mut Tables, references: &References, write: &Write) -> RepoResult<u64> {
    match write {
        Write::Insert { table, row } => {
            check_targets(tables, references, table, row)?;
            tables.entry(table.clone()).or_default().push(row.clone());
            Ok(1)
        }
        Write::Update {
            table,
            id_column,
            id,
            changes,
        } => {
            let Some(index) = tables
                .get(table)
                .and_then(|rows| rows.iter().position(|r| matches_id(r, id_column, *id)))
            else {
                return Ok(0);
            };
            let current = &tables[table][index];
            let mut updated = Row::with_capacity(current.len());
            for column in current.columns() {
                let value = match changes.iter().find(|(c, _)| c == column) {
                    Some((_, v)) => v.clone(),
                    None => current.get(column).cloned().unwrap_or(ParamValue::Null),
                };
                updated.push(column, value);
            }
            if let Some((column, _)) = changes.iter().find(|(c, _)| current.get(c).is_none()) {
                return Err(RepoError::backend(MemoryError::UnknownColumn {
                    table: table.clone(),
                    column: column.clone(),
                }));
            }
            check_targets(tables, references, table, &updated)?;
            if let Some(rows) = tables.get_mut(table) {
                rows[index] = updated;
            }
            Ok(1)
        }
        Write::DeleteById {
            table,
            id_column,
            id,
        } => {
            let Some(rows) = tables.get(table) else {
                return Ok(0);
            };
            let removed: Vec<&Row> = rows.iter().filter(|r| matches_id(r, id_column, *id)).collect();
            check_unreferenced(tables, references, table, &removed)?;
            let n = removed.len() as u64;
            if let Some(rows) = tables.get_mut(table) {
                rows.retain(|r| !matches_id(r, id_column, *id));
            }
            Ok(n)
        }
        Write::DeleteAll { table } => {
            let Some(rows) = tables.get(table) else {
                return Ok(0);
            };
            let removed: Vec<&Row> = rows.iter().collect();
            check_unreferenced(tables, references, table, &removed)?;
            Ok(tables
                .get_mut(table)
                .map_or(0, |rows| std::mem::take(rows).len() as u64))
        }
    }
}

/// A [`Session`] over the in-process store. Sessions handed out by
/// [`MemoryTransactionManager::execute`] read and write the transaction's copy.
#[derive(Debug, Clone)]
pub struct MemorySession {
    shared: Arc<Shared>,
    references: Arc<References>,
    tx: Option<Arc<Mutex<TxState>>>,
    read_only: bool,
}

impl MemorySession {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> RepoResult<R>) -> RepoResult<R> {
        match &self.tx {
            Some(tx) => f(&lock(tx)?.tables),
            None => f(&*lock(&self.shared.tables)?),
        }
    }

    fn write(&self, write: Write) -> RepoResult<u64> {
        if self.read_only {
            return Err(RepoError::transaction(MemoryError::ReadOnly(
                write.table().to_string(),
            )));
        }
        match &self.tx {
            Some(tx) => {
                let mut guard = lock(tx)?;
                let state = &mut *guard;
                let n = apply(&mut state.tables, &self.references, &write)?;
                if n > 0 {
                    state.writes.push(write);
                }
                Ok(n)
            }
            None => apply(&mut *lock(&self.shared.tables)?, &self.references, &write),
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn next_value(&self, sequence: &SequenceDefinition) -> RepoResult<i64> {
        let mut sequences = lock(&self.shared.sequences)?;
        let next = sequences
            .entry(sequence.name.to_string())
            .or_insert(sequence.initial_value);
        let value = *next;
        *next += sequence.allocation_size;
        Ok(value)
    }

    async fn insert(&self, table: &str, columns: &[&str], values: Vec<ParamValue>) -> RepoResult<()> {
        if columns.len() != values.len() {
            return Err(RepoError::backend(MemoryError::ColumnCount {
                table: table.to_string(),
                columns: columns.len(),
                values: values.len(),
            }));
        }
        let mut row = Row::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(values) {
            row.push(*column, value);
        }
        self.write(Write::Insert {
            table: table.to_string(),
            row,
        })
        .map(|_| ())
    }

    async fn update(
        &self,
        table: &str,
        id_column: &str,
        id: i64,
        columns: &[&str],
        values: Vec<ParamValue>,
    ) -> RepoResult<u64> {
        self.write(Write::Update {
            table: table.to_string(),
            id_column: id_column.to_string(),
            id,
            changes: columns.iter().map(|c| c.to_string()).zip(values).collect(),
        })
    }

    async fn delete_by_id(&self, table: &str, id_column: &str, id: i64) -> RepoResult<u64> {
        self.write(Write::DeleteById {
            table: table.to_string(),
            id_column: id_column.to_string(),
            id,
        })
    }

    async fn delete_all(&self, table: &str) -> RepoResult<u64> {
        self.write(Write::DeleteAll {
            table: table.to_string(),
        })
    }

    async fn select(&self, select: &Select<'_>) -> RepoResult<Vec<Row>> {
        self.read(|tables| {
            let Some(rows) = tables.get(select.table) else {
                return Ok(Vec::new());
            };
            let mut out = Vec::new();
            for row in rows {
                // A NULL filter value matches stored NULLs.
                let keep = select.filter.iter().all(|(column, value)| {
                    row.get(column)
                        .map_or(false, |stored| same_value(stored, value))
                });
                if keep {
                    out.push(row);
                }
            }
            if let Some(order) = select.order_by {
                out.sort_by(|a, b| compare(a.get(order), b.get(order)));
            }
            out.into_iter()
                .map(|row| {
                    row.project(select.columns).map_err(|_| {
                        let missing = select
                            .columns
                            .iter()
                            .find(|c| row.get(c).is_none())
                            .copied()
                            .unwrap_or_default();
                        RepoError::backend(MemoryError::UnknownColumn {
                            table: select.table.to_string(),
                            column: missing.to_string(),
                        })
                    })
                })
                .collect()
        })
    }

    async fn count(&self, table: &str) -> RepoResult<u64> {
        self.read(|tables| Ok(tables.get(table).map_or(0, |rows| rows.len() as u64)))
    }
}

/// Transaction manager over one shared in-process store. Clones share the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransactionManager {
    shared: Arc<Shared>,
    references: Arc<References>,
}

impl MemoryTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce `T`'s foreign keys on every write to its table and to the tables it points at.
    pub fn with_entity<T: Fetchable>(mut self) -> Self {
        Arc::make_mut(&mut self.references)
            .extend(T::REFERENCES.iter().map(|fk| (T::TABLE, *fk)));
        self
    }
}

#[async_trait]
impl TransactionManager for MemoryTransactionManager {
    type Session = MemorySession;

    async fn session(&self) -> RepoResult<MemorySession> {
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            references: Arc::clone(&self.references),
            tx: None,
            read_only: false,
        })
    }

    async fn execute<R, F, Fut>(&self, def: &TransactionDefinition, f: F) -> RepoResult<R>
    where
        F: FnOnce(MemorySession) -> Fut + Send,
        Fut: Future<Output = RepoResult<R>> + Send,
        R: Send,
    {
        let state = TxState {
            tables: lock(&self.shared.tables)?.clone(),
            writes: Vec::new(),
        };
        let tx = Arc::new(Mutex::new(state));
        let session = MemorySession {
            shared: Arc::clone(&self.shared),
            references: Arc::clone(&self.references),
            tx: Some(Arc::clone(&tx)),
            read_only: def.read_only,
        };
        match f(session).await {
            Ok(value) => {
                let writes = std::mem::take(&mut lock(&tx)?.writes);
                let mut tables = lock(&self.shared.tables)?;
                let mut next = tables.clone();
                for write in &writes {
                    if let Err(e) = apply(&mut next, &self.references, write) {
                        warn!(error = %e, table = write.table(), "memory transaction failed to commit");
                        return Err(e);
                    }
                }
                *tables = next;
                debug!(
                    read_only = def.read_only,
                    writes = writes.len(),
                    "memory transaction committed"
                );
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "memory transaction rolled back");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use projectit_core::transactions::TransactionTemplate;
    use projectit_core::{EntityRepository, UNSAVED_ID};

    #[derive(projectit_macros::Entity, Clone, Debug, PartialEq)]
    #[entity(table = "tags", initial_value = 7)]
    struct Tag {
        #[fetch(not_blank)]
        label: String,
        #[fetch(id)]
        id: i64,
    }

    fn tag(label: &str) -> Tag {
        Tag {
            label: label.into(),
            id: UNSAVED_ID,
        }
    }

    #[derive(projectit_macros::Entity, Clone, Debug, PartialEq)]
    #[entity(table = "pins", initial_value = 50)]
    struct Pin {
        #[fetch(one_to_one)]
        tag: Option<Tag>,
        #[fetch(id)]
        id: i64,
    }

    fn pinned() -> TransactionTemplate<MemoryTransactionManager> {
        TransactionTemplate::new(MemoryTransactionManager::new().with_entity::<Pin>())
    }

    #[tokio::test]
    async fn outside_writes_during_a_transaction_survive_commit() {
        let tpl = TransactionTemplate::new(MemoryTransactionManager::new());
        let repo = EntityRepository::<Tag>::new();
        let outside = tpl.session().await.unwrap();
        let (r, o) = (&repo, &outside);
        tpl.execute(|s| async move {
            r.save(&s, tag("in-tx")).await?;
            r.save(o, tag("outside")).await?;
            Ok(())
        })
        .await
        .unwrap();
        let labels: Vec<String> = repo
            .find_all(&outside)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, vec!["in-tx".to_string(), "outside".into()]);
    }

    #[tokio::test]
    async fn referenced_rows_cannot_be_deleted() {
        let tpl = pinned();
        let tags = EntityRepository::<Tag>::new();
        let pins = EntityRepository::<Pin>::new();
        let s = tpl.session().await.unwrap();
        let pin = pins
            .save(&s, Pin { tag: Some(tag("held")), id: UNSAVED_ID })
            .await
            .unwrap();
        let held = pin.tag.clone().unwrap();

        let err = tags.delete(&s, &held).await.unwrap_err();
        assert!(matches!(err, RepoError::Backend { .. }), "{err:?}");
        assert!(tags.delete_all_in_batch(&s).await.is_err());
        assert_eq!(pins.find_all(&s).await.unwrap(), vec![pin.clone()]);

        pins.delete(&s, &pin).await.unwrap();
        tags.delete(&s, &held).await.unwrap();
        assert_eq!(tags.count(&s).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dangling_keys_are_rejected() {
        let tpl = pinned();
        let s = tpl.session().await.unwrap();
        let err = s
            .insert("pins", &["id", "tag_id"], vec![ParamValue::I64(1), ParamValue::I64(99)])
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Backend { .. }));
        assert_eq!(s.count("pins").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_that_breaks_a_reference_fails_and_publishes_nothing() {
        let tpl = pinned();
        let tags = EntityRepository::<Tag>::new();
        let pins = EntityRepository::<Pin>::new();
        let outside = tpl.session().await.unwrap();
        let t = tags.save(&outside, tag("shared")).await.unwrap();
        let (tg, p, o) = (&tags, &pins, &outside);
        let err = tpl
            .execute(|s| async move {
                p.save(&s, Pin { tag: Some(t.clone()), id: UNSAVED_ID }).await?;
                // Not yet referenced as far as the shared tables know.
                tg.delete(o, &t).await?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Backend { .. }));
        assert_eq!(pins.count(&outside).await.unwrap(), 0);
        assert_eq!(tags.count(&outside).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let tpl = TransactionTemplate::new(MemoryTransactionManager::new());
        let repo = EntityRepository::<Tag>::new();
        let r = &repo;
        let saved = tpl
            .execute(|s| async move { r.save(&s, tag("a")).await })
            .await
            .unwrap();
        assert_eq!(saved.id, 7);
        let s = tpl.session().await.unwrap();
        assert_eq!(repo.find_all(&s).await.unwrap(), vec![saved]);
    }

    #[tokio::test]
    async fn rollback_discards_rows_but_not_sequence_values() {
        let tpl = TransactionTemplate::new(MemoryTransactionManager::new());
        let repo = EntityRepository::<Tag>::new();
        let r = &repo;
        let err = tpl
            .execute(|s| async move {
                let t = r.save(&s, tag("gone")).await?;
                assert_eq!(r.count(&s).await?, 1);
                assert_eq!(t.id, 7);
                Err::<(), _>(RepoError::NotFound)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
        let s = tpl.session().await.unwrap();
        assert_eq!(repo.count(&s).await.unwrap(), 0);
        assert_eq!(repo.save(&s, tag("b")).await.unwrap().id, 8);
    }

    #[tokio::test]
    async fn transaction_writes_are_invisible_outside_until_commit() {
        let tpl = TransactionTemplate::new(MemoryTransactionManager::new());
        let repo = EntityRepository::<Tag>::new();
        let outside = tpl.session().await.unwrap();
        let (r, o) = (&repo, &outside);
        tpl.execute(|s| async move {
            r.save(&s, tag("a")).await?;
            assert_eq!(r.count(o).await?, 0);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(repo.count(&outside).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_only_transaction_rejects_writes() {
        let tpl = TransactionTemplate::new(MemoryTransactionManager::new());
        let repo = EntityRepository::<Tag>::new();
        let r = &repo;
        let err = tpl
            .execute_with(&TransactionDefinition::read_only(), |s| async move {
                r.save(&s, tag("a")).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Transaction { .. }));
    }

    #[tokio::test]
    async fn select_filters_orders_and_checks_columns() {
        let mgr = MemoryTransactionManager::new();
        let s = mgr.session().await.unwrap();
        for (id, name) in [(3, "c"), (1, "a"), (2, "a")] {
            s.insert("t", &["id", "name"], vec![ParamValue::I64(id), name.into()])
                .await
                .unwrap();
        }
        let cols = ["id"];
        let rows = s
            .select(&Select::new("t", &cols).filter("name", "a".into()).order_by("id"))
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.try_get("id").unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);

        let bad = ["nope"];
        assert!(matches!(
            s.select(&Select::new("t", &bad)).await,
            Err(RepoError::Backend { .. })
        ));
        assert!(s.select(&Select::new("missing", &cols)).await.unwrap().is_empty());
        assert_eq!(s.update("t", "id", 9, &["name"], vec!["z".into()]).await.unwrap(), 0);
        assert_eq!(s.delete_all("t").await.unwrap(), 3);
    }
}
