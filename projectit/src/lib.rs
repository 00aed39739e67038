#![forbid(unsafe_code)]
//! Facade crate re-exporting core traits and macros for the `projectit` library.
//!
//! This crate provides the main public API. It re-exports all necessary traits
//! and procedural macros so that you only need to add this single crate (plus
//! `projectit_core`, which the derives expand to) as a dependency in your application.
//!
//! # Example: entities, projections and a repository
//!
//! ```ignore
//! use projectit::{repository, view, Entity, Fetchable, Projection};
//!
//! #[derive(Entity, Clone, Debug)]
//! #[entity(table = "person", initial_value = 222)]
//! pub struct Person {
//!     #[fetch(not_blank)]
//!     pub first_name: String,
//!     #[fetch(id)]
//!     pub id: i64,
//! }
//!
//! // Capability view: accessors read straight from the fetched row.
//! #[view(entity = Person)]
//! pub trait FirstName {
//!     fn first_name(&self) -> &str;
//! }
//!
//! // Independent record: a plain copy of the selected columns.
//! #[derive(Projection)]
//! #[projection(entity = Person)]
//! pub struct FirstNameRecord {
//!     pub first_name: String,
//! }
//!
//! // The middle of a query name is decoration; the result type decides the columns.
//! #[repository(entity = Person, queries(get_all_first_names_by -> FirstNameProxy, get_by -> FirstNameRecord))]
//! pub mod person_repository {}
//!
//! assert_eq!(Person::TABLE, "person");
//! let repo = person_repository::Repository::new()?;
//! ```
//!
//! Runnable end-to-end usage lives in the `people` crate's tests.

// Re-export all core traits.
pub use projectit_core::{
    is_not_blank, Cascade, Entity, EntityRepository, Fetchable, ForeignKey, FromParam, Identifiable,
    Insertable, MappingError, ParamValue, Projection, ProjectionShape, QueryDerivationError,
    QueryRegistry, RepoError, RepoResult, Row, RowAdapter, Select, SequenceDefinition, Sequenced,
    Session, Timestamp, Timestamped, Updatable, Validate, ValidationError, TIMESTAMP_FORMAT,
    UNSAVED_ID,
};

// Re-export all procedural macros.
pub use projectit_macros::{repository, view, Entity, Projection};

// Optional re-export of the SQL builder helpers.
#[cfg(feature = "sql-builder")]
pub use projectit_sql_builder as sql_builder;

// Re-export backend-agnostic transactions, resolver and coordinator modules.
pub use projectit_core::{persist, query, transactions};

// Optional streaming extension: wraps repository reads into a Stream.
#[cfg(feature = "stream-ext")]
pub mod stream_ext {
    use crate::{Entity, EntityRepository, ParamValue, RepoResult, Session};
    use futures_core::Stream;
    use std::pin::Pin;

    pub type EntityStream<'a, T> = Pin<Box<dyn Stream<Item = RepoResult<T>> + Send + 'a>>;

    pub trait FindStreamExt<T: Entity> {
        /// Streams `find_all`. Rows are fetched up front and yielded one by one.
        fn find_all_stream<'a, S>(&'a self, session: &'a S) -> EntityStream<'a, T>
        where
            S: Session + ?Sized;

        /// Streams `find_by_field`, with the same eager fetch.
        fn find_by_field_stream<'a, S>(
            &'a self,
            session: &'a S,
            field_name: &str,
            value: ParamValue,
        ) -> EntityStream<'a, T>
        where
            S: Session + ?Sized;
    }

    impl<T: Entity> FindStreamExt<T> for EntityRepository<T> {
        fn find_all_stream<'a, S>(&'a self, session: &'a S) -> EntityStream<'a, T>
        where
            S: Session + ?Sized,
        {
            Box::pin(async_stream::try_stream! {
                let items = self.find_all(session).await?;
                for item in items {
                    yield item;
                }
            })
        }

        fn find_by_field_stream<'a, S>(
            &'a self,
            session: &'a S,
            field_name: &str,
            value: ParamValue,
        ) -> EntityStream<'a, T>
        where
            S: Session + ?Sized,
        {
            let field = field_name.to_string();
            Box::pin(async_stream::try_stream! {
                let items = self.find_by_field(session, &field, value).await?;
                for item in items {
                    yield item;
                }
            })
        }
    }
}

// Backend sessions and transaction managers re-exported under a neutral namespace, so
// end-users don't have to depend on backend crates directly. These are feature-gated.
pub mod backends {
    #[cfg(feature = "libsql-backend")]
    pub use projectit_libsql::{LibsqlSession, LibsqlTransactionManager, DATABASE_URL_ENV};
    #[cfg(feature = "memory-backend")]
    pub use projectit_memory::{MemorySession, MemoryTransactionManager};
}
