//! Save/load/delete coordination over a [`Session`].
//!
//! Writes follow one order: validate the whole object graph, save owned references
//! (inserting transient ones, updating persisted ones), then insert the owner (allocating
//! a sequence value and stamping both timestamps) or update it in place (stamping
//! `updated_at` only). Deletes never follow references.

use std::marker::PhantomData;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::{
    Entity, ParamValue, RepoError, RepoResult, Row, RowAdapter, Select, Session, Timestamp,
};

/// Owned references that follow their owner on save.
///
/// `#[derive(Entity)]` implements this for every entity; fields marked
/// `#[fetch(one_to_one)]` get real bodies, everything else is a no-op.
#[async_trait]
pub trait Cascade {
    /// Save referenced entities so their keys and current state exist before the owner's row.
    async fn cascade_save<S: Session + ?Sized>(&mut self, session: &S) -> RepoResult<()>;

    /// Resolve foreign keys in `row` into referenced entities.
    async fn load_associations<S: Session + ?Sized>(
        &mut self,
        row: &Row,
        session: &S,
    ) -> RepoResult<()>;
}

fn now() -> Timestamp {
    chrono::Utc::now().naive_utc()
}

/// Insert or update `entity` and everything it owns. Run it inside a transaction when the
/// owner and its references must become visible together.
pub async fn save_entity<T, S>(session: &S, mut entity: T) -> RepoResult<T>
where
    T: Entity,
    S: Session + ?Sized,
{
    let start = Instant::now();
    entity.validate()?;
    entity.cascade_save(session).await?;

    if let Some(id) = entity.id() {
        entity.stamp_updated(now());
        let changed = session
            .update(
                T::TABLE,
                T::ID_COLUMN,
                id,
                T::UPDATE_COLUMNS,
                entity.update_values(),
            )
            .await?;
        if changed > 0 {
            debug!(
                table = T::TABLE,
                id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "updated"
            );
            return Ok(entity);
        }
        // Unknown key: treat as new and let the sequence decide the identifier.
        debug!(table = T::TABLE, id, "no row for key, inserting as new");
    }

    let id = session.next_value(&T::SEQUENCE).await?;
    entity.assign_id(id);
    entity.stamp_created(now());

    let mut columns = Vec::with_capacity(T::INSERT_COLUMNS.len() + 1);
    columns.push(T::ID_COLUMN);
    columns.extend_from_slice(T::INSERT_COLUMNS);
    let mut values = Vec::with_capacity(columns.len());
    values.push(ParamValue::I64(id));
    values.extend(entity.insert_values());

    session.insert(T::TABLE, &columns, values).await?;
    debug!(
        table = T::TABLE,
        id,
        sequence = T::SEQUENCE.name,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "inserted"
    );
    Ok(entity)
}

/// Map a fetched row into `T` and resolve its references.
pub async fn materialize<T, S>(session: &S, row: Row) -> RepoResult<T>
where
    T: Entity,
    S: Session + ?Sized,
{
    let mut entity = T::Adapter::default().from_row(&row)?;
    entity.load_associations(&row, session).await?;
    Ok(entity)
}

/// Load one entity by key, with its references.
pub async fn load_entity<T, S>(session: &S, id: i64) -> RepoResult<Option<T>>
where
    T: Entity,
    S: Session + ?Sized,
{
    let select = Select::new(T::TABLE, T::SELECT_COLUMNS).filter(T::ID_COLUMN, ParamValue::I64(id));
    let mut rows = session.select(&select).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let row = rows.swap_remove(0);
    Ok(Some(materialize(session, row).await?))
}

/// Generic repository for an entity type. Holds no connection: every call names the
/// [`Session`] it runs on.
pub struct EntityRepository<T: Entity> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for EntityRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> std::fmt::Debug for EntityRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("table", &T::TABLE)
            .finish()
    }
}

impl<T: Entity> EntityRepository<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// Insert or update. Owned references are saved first.
    pub async fn save<S: Session + ?Sized>(&self, session: &S, entity: T) -> RepoResult<T> {
        save_entity(session, entity).await
    }

    /// Save each entity in order, stopping at the first failure.
    pub async fn save_all<S, I>(&self, session: &S, entities: I) -> RepoResult<Vec<T>>
    where
        S: Session + ?Sized,
        I: IntoIterator<Item = T> + Send,
        I::IntoIter: Send,
    {
        let mut out = Vec::new();
        for entity in entities {
            out.push(save_entity(session, entity).await?);
        }
        Ok(out)
    }

    pub async fn find_by_id<S: Session + ?Sized>(
        &self,
        session: &S,
        id: i64,
    ) -> RepoResult<Option<T>> {
        load_entity(session, id).await
    }

    pub async fn exists_by_id<S: Session + ?Sized>(&self, session: &S, id: i64) -> RepoResult<bool> {
        let columns = [T::ID_COLUMN];
        let select = Select::new(T::TABLE, &columns).filter(T::ID_COLUMN, ParamValue::I64(id));
        Ok(!session.select(&select).await?.is_empty())
    }

    /// All rows in insertion order.
    pub async fn find_all<S: Session + ?Sized>(&self, session: &S) -> RepoResult<Vec<T>> {
        let select = Select::new(T::TABLE, T::SELECT_COLUMNS).order_by(T::ID_COLUMN);
        self.fetch(session, &select).await
    }

    /// Equality lookup on one column. The column must belong to the entity.
    pub async fn find_by_field<S: Session + ?Sized>(
        &self,
        session: &S,
        field_name: &str,
        value: ParamValue,
    ) -> RepoResult<Vec<T>> {
        let column = T::SELECT_COLUMNS
            .iter()
            .find(|c| **c == field_name)
            .ok_or_else(|| {
                RepoError::QueryDerivation(crate::QueryDerivationError::UnknownProperty {
                    method: "find_by_field".to_string(),
                    property: field_name.to_string(),
                })
            })?;
        let select = Select::new(T::TABLE, T::SELECT_COLUMNS)
            .filter(*column, value)
            .order_by(T::ID_COLUMN);
        self.fetch(session, &select).await
    }

    pub async fn count<S: Session + ?Sized>(&self, session: &S) -> RepoResult<u64> {
        session.count(T::TABLE).await
    }

    /// Remove the entity's own row. Referenced rows stay where they are.
    pub async fn delete<S: Session + ?Sized>(&self, session: &S, entity: &T) -> RepoResult<()> {
        let id = entity.id().ok_or(RepoError::NotFound)?;
        if self.delete_by_id(session, id).await? {
            Ok(())
        } else {
            Err(RepoError::NotFound)
        }
    }

    /// Returns true if a row was removed.
    pub async fn delete_by_id<S: Session + ?Sized>(&self, session: &S, id: i64) -> RepoResult<bool> {
        let n = session.delete_by_id(T::TABLE, T::ID_COLUMN, id).await?;
        debug!(table = T::TABLE, id, removed = n, "delete");
        Ok(n > 0)
    }

    /// One bulk delete of every row of this type, without loading or cascading.
    pub async fn delete_all_in_batch<S: Session + ?Sized>(&self, session: &S) -> RepoResult<u64> {
        let n = session.delete_all(T::TABLE).await?;
        debug!(table = T::TABLE, removed = n, "delete all in batch");
        Ok(n)
    }

    async fn fetch<S: Session + ?Sized>(
        &self,
        session: &S,
        select: &Select<'_>,
    ) -> RepoResult<Vec<T>> {
        let rows = session.select(select).await?;
        trace!(table = T::TABLE, rows = rows.len(), "fetched");
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(materialize(session, row).await?);
        }
        Ok(out)
    }
}
