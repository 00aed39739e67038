#![forbid(unsafe_code)]
//! Core traits for the projectit repository library.
//! This crate is database-agnostic and should not contain any backend-specific logic.

// Re-export for downstream macro expansions (used by projectit_macros)
pub use async_trait::async_trait;

pub mod persist;
pub mod query;
mod row;
mod session;
pub mod transactions;

pub use persist::{Cascade, EntityRepository};
pub use query::{Projection, ProjectionShape, QueryDerivationError, QueryRegistry};
pub use row::{format_timestamp, FromParam, MappingError, Row, Timestamp, TIMESTAMP_FORMAT};
pub use session::{Select, Session};

/// Identifier carried by an entity that has not been persisted yet.
/// Sequences never hand this value out.
pub const UNSAVED_ID: i64 = -1;

/// Marker trait for types that can be fetched from a database.
/// Implemented via `#[derive(Entity)]` in `projectit_macros`.
///
/// Provides compile-time metadata used by repository generators.
pub trait Fetchable {
    const TABLE: &'static str;
    const SELECT_COLUMNS: &'static [&'static str];

    /// A list of (column_name, rust_type) tuples for fields that can be used
    /// in derived query predicates such as `find_by_last_name`.
    const FINDABLE_COLUMNS: &'static [(&'static str, &'static str)];

    /// Columns of this table holding keys of rows in other tables.
    const REFERENCES: &'static [ForeignKey] = &[];
}

/// A column that must hold either NULL or the key of an existing row in `table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub table: &'static str,
    pub key_column: &'static str,
}

/// A backend-agnostic representation of a database parameter value.
/// This is used to pass entity field values from generated code to backend adapters
/// without making `projectit_core` dependent on a specific database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Null,
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::I32(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::I64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::F64(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

/// Trait for entities that have an identifiable key.
/// This trait exposes the key type and column name so macros can introspect it.
pub trait Identifiable {
    /// The type of the primary key.
    type Key;

    /// The name of the primary key column in the database.
    const ID_COLUMN: &'static str;

    /// Returns a copy of the entity's ID, or `None` while it is unsaved.
    fn id(&self) -> Option<Self::Key>;

    /// Stores a generated key on the entity. Only the persistence layer calls this.
    fn assign_id(&mut self, key: Self::Key);
}

/// Describes a per-type identifier sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceDefinition {
    pub name: &'static str,
    pub initial_value: i64,
    /// How far the sequence advances per allocation.
    pub allocation_size: i64,
}

/// Entities whose keys are drawn from a named sequence.
pub trait Sequenced {
    const SEQUENCE: SequenceDefinition;
}

/// Trait for types whose fields can be extracted for an INSERT statement.
/// This is implemented by the `#[derive(Entity)]` macro.
pub trait Insertable {
    /// The columns to be used in an INSERT statement, excluding the generated key.
    const INSERT_COLUMNS: &'static [&'static str];

    /// The values of the fields corresponding to `INSERT_COLUMNS`.
    fn insert_values(&self) -> Vec<ParamValue>;
}

/// Trait for types whose fields can be extracted for an UPDATE statement.
/// This is implemented by the `#[derive(Entity)]` macro.
pub trait Updatable {
    /// The columns to be used in an UPDATE statement's SET clause.
    const UPDATE_COLUMNS: &'static [&'static str];

    /// The values of the fields corresponding to `UPDATE_COLUMNS`.
    fn update_values(&self) -> Vec<ParamValue>;
}

/// Creation and update stamps maintained by the persistence layer.
pub trait Timestamped {
    /// Called once, right before the first insert. Sets both stamps.
    fn stamp_created(&mut self, at: Timestamp);
    /// Called before every update.
    fn stamp_updated(&mut self, at: Timestamp);
}

/// A required attribute was blank.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity}.{field} must not be blank")]
pub struct ValidationError {
    pub entity: &'static str,
    pub field: &'static str,
}

/// Presence checks run before anything is written.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Returns true when `s` holds at least one non-whitespace character.
pub fn is_not_blank(s: &str) -> bool {
    !s.trim().is_empty()
}

/// Lightweight, backend-agnostic error type for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// The entity was not found.
    #[error("entity not found")]
    NotFound,
    /// A required attribute failed validation; nothing was written.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A query method could not be derived from its name.
    #[error("query derivation failed: {0}")]
    QueryDerivation(#[from] QueryDerivationError),
    /// Beginning, committing or rolling back a transaction failed.
    #[error("transaction failure")]
    Transaction {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Error while mapping a backend row into an entity.
    #[error("mapping error")]
    Mapping {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Opaque backend error from the underlying driver or adapter.
    #[error("backend error")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RepoError {
    /// Wrap a backend/driver error.
    pub fn backend<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Backend {
            source: Box::new(e),
        }
    }
    /// Wrap a row-mapping error.
    pub fn mapping<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Mapping {
            source: Box::new(e),
        }
    }
    /// Wrap a failure of the transaction machinery itself.
    pub fn transaction<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RepoError::Transaction {
            source: Box::new(e),
        }
    }
}

/// Convenience alias for results returned by repository methods.
pub type RepoResult<T> = Result<T, RepoError>;

/// A tiny adapter for mapping a row into an entity `T`.
/// `#[derive(Entity)]` generates one per entity over the backend-agnostic [`Row`].
#[allow(clippy::wrong_self_convention)]
pub trait RowAdapter<T> {
    type Row;
    fn from_row(&self, row: &Self::Row) -> RepoResult<T>;
}

/// Everything the persistence coordinator needs from a persistent type.
/// Implemented by `#[derive(Entity)]`.
pub trait Entity:
    Fetchable
    + Identifiable<Key = i64>
    + Sequenced
    + Insertable
    + Updatable
    + Timestamped
    + Validate
    + Cascade
    + Clone
    + Send
    + Sync
    + 'static
{
    type Adapter: RowAdapter<Self, Row = Row> + Default + Send + Sync;
}
