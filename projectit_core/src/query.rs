//! Query-method resolution.
//!
//! A read operation is declared by name plus result type. The name follows
//! `{action}{Subject}By{Prop}(And{Prop})*`; the action picks the intent, the subject is
//! ignored and the predicate becomes equality filters. The result type alone decides which
//! columns are selected and how they are materialised. Names are parsed and checked once, when
//! the owning repository is constructed.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use tracing::debug;

use crate::{Fetchable, Identifiable, ParamValue, RepoResult, Row, Select, Session};

/// Reasons a query method could not be derived or invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryDerivationError {
    #[error("query method name is empty")]
    EmptyName,
    #[error("`{method}`: unknown action `{action}`, expected one of find, get, query, read, stream")]
    UnknownAction { method: String, action: String },
    #[error("`{method}`: missing `By` separator")]
    MissingBy { method: String },
    #[error("`{method}`: empty property in predicate")]
    EmptyProperty { method: String },
    #[error("`{method}`: `{property}` is not a findable property")]
    UnknownProperty { method: String, property: String },
    #[error("`{method}`: predicate takes {expected} parameter(s) but {found} were declared")]
    ArityMismatch {
        method: String,
        expected: usize,
        found: usize,
    },
    #[error("`{method}`: registered twice")]
    DuplicateMethod { method: String },
    #[error("`{method}`: projection selects no columns")]
    EmptyProjection { method: String },
    #[error("`{method}`: projection column `{column}` does not belong to the entity")]
    UnknownColumn { method: String, column: String },
    #[error("`{method}`: no such query method")]
    NotRegistered { method: String },
    #[error("`{method}`: invoked with a result type it was not registered with")]
    ShapeMismatch { method: String },
}

/// The verb a query method starts with. All of them read many rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Find,
    Get,
    Query,
    Read,
    Stream,
}

impl Action {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "find" => Some(Action::Find),
            "get" => Some(Action::Get),
            "query" => Some(Action::Query),
            "read" => Some(Action::Read),
            "stream" => Some(Action::Stream),
            _ => None,
        }
    }
}

/// How a projection relates to the fetched row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionShape {
    /// Accessors over the fetched row, which the view keeps alive.
    View,
    /// A standalone value holding copies of the selected columns.
    Record,
}

/// A narrowed read model of entity `Source`.
///
/// Derived with `#[derive(Projection)]` for records and `#[view(entity = ...)]` for views.
pub trait Projection: Sized + Send + 'static {
    type Source: Fetchable;
    /// Columns to select, in order.
    const COLUMNS: &'static [&'static str];
    const SHAPE: ProjectionShape;
    fn from_row(row: Row) -> RepoResult<Self>;
}

/// A parsed method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMethod {
    pub name: String,
    pub action: Action,
    /// Words between the action and `By`. Never used to build the query.
    pub subject: Vec<String>,
    /// snake_case predicate properties, in declaration order.
    pub properties: Vec<String>,
}

impl QueryMethod {
    pub fn parse(name: &str) -> Result<Self, QueryDerivationError> {
        let words = split_words(name);
        let Some((first, rest)) = words.split_first() else {
            return Err(QueryDerivationError::EmptyName);
        };
        let action = Action::from_word(first).ok_or_else(|| QueryDerivationError::UnknownAction {
            method: name.to_string(),
            action: first.clone(),
        })?;
        let by = rest
            .iter()
            .position(|w| w == "by")
            .ok_or_else(|| QueryDerivationError::MissingBy {
                method: name.to_string(),
            })?;
        let subject = rest[..by].to_vec();
        let predicate = &rest[by + 1..];

        let mut properties = Vec::new();
        if !predicate.is_empty() {
            for part in predicate.split(|w| w == "and") {
                if part.is_empty() {
                    return Err(QueryDerivationError::EmptyProperty {
                        method: name.to_string(),
                    });
                }
                properties.push(part.join("_"));
            }
        }

        Ok(Self {
            name: name.to_string(),
            action,
            subject,
            properties,
        })
    }
}

/// Lowercased words of a camelCase or snake_case identifier.
fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower_or_digit = false;
    for c in name.chars() {
        if c == '_' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower_or_digit = false;
            continue;
        }
        if c.is_uppercase() && prev_lower_or_digit && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// A validated, executable read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub method: String,
    pub action: Action,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub predicate: Vec<&'static str>,
    pub shape: ProjectionShape,
    pub order_by: &'static str,
    type_id: TypeId,
}

impl QueryPlan {
    /// Bind `params` to the predicate, in order.
    pub fn select(&self, params: Vec<ParamValue>) -> Result<Select<'_>, QueryDerivationError> {
        if params.len() != self.predicate.len() {
            return Err(QueryDerivationError::ArityMismatch {
                method: self.method.clone(),
                expected: self.predicate.len(),
                found: params.len(),
            });
        }
        let mut select = Select::new(self.table, self.columns).order_by(self.order_by);
        for (column, value) in self.predicate.iter().zip(params) {
            select = select.filter(*column, value);
        }
        Ok(select)
    }
}

/// Query methods of one entity type, keyed by name.
pub struct QueryRegistry<T> {
    plans: HashMap<String, QueryPlan>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for QueryRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.plans.keys().collect();
        names.sort();
        f.debug_struct("QueryRegistry").field("methods", &names).finish()
    }
}

impl<T> Default for QueryRegistry<T> {
    fn default() -> Self {
        Self {
            plans: HashMap::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: Fetchable + Identifiable> QueryRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `method`, check it against `T` and `P`, and store the plan.
    /// `arity` is the number of parameters the method is declared with.
    pub fn register<P>(&mut self, method: &str, arity: usize) -> Result<&QueryPlan, QueryDerivationError>
    where
        P: Projection<Source = T>,
    {
        let parsed = QueryMethod::parse(method)?;
        if self.plans.contains_key(method) {
            return Err(QueryDerivationError::DuplicateMethod {
                method: method.to_string(),
            });
        }
        if P::COLUMNS.is_empty() {
            return Err(QueryDerivationError::EmptyProjection {
                method: method.to_string(),
            });
        }
        if let Some(column) = P::COLUMNS.iter().find(|c| !T::SELECT_COLUMNS.contains(*c)) {
            return Err(QueryDerivationError::UnknownColumn {
                method: method.to_string(),
                column: column.to_string(),
            });
        }

        let mut predicate = Vec::with_capacity(parsed.properties.len());
        for property in &parsed.properties {
            let column = if property == T::ID_COLUMN {
                T::ID_COLUMN
            } else {
                T::FINDABLE_COLUMNS
                    .iter()
                    .map(|(c, _)| *c)
                    .find(|c| c == property)
                    .ok_or_else(|| QueryDerivationError::UnknownProperty {
                        method: method.to_string(),
                        property: property.clone(),
                    })?
            };
            predicate.push(column);
        }
        if predicate.len() != arity {
            return Err(QueryDerivationError::ArityMismatch {
                method: method.to_string(),
                expected: predicate.len(),
                found: arity,
            });
        }

        let plan = QueryPlan {
            method: method.to_string(),
            action: parsed.action,
            table: T::TABLE,
            columns: P::COLUMNS,
            predicate,
            shape: P::SHAPE,
            order_by: T::ID_COLUMN,
            type_id: TypeId::of::<P>(),
        };
        debug!(
            method,
            table = plan.table,
            shape = ?plan.shape,
            columns = ?plan.columns,
            predicate = ?plan.predicate,
            "registered query method"
        );
        Ok(self.plans.entry(method.to_string()).or_insert(plan))
    }

    /// Resolve the column behind a `find_by_<column>` finder. Finders return whole
    /// entities, so they are checked here instead of being registered.
    pub fn check_finder(method: &str) -> Result<&'static str, QueryDerivationError> {
        let property = method.strip_prefix("find_by_").unwrap_or(method);
        T::FINDABLE_COLUMNS
            .iter()
            .map(|(c, _)| *c)
            .find(|c| *c == property)
            .ok_or_else(|| QueryDerivationError::UnknownProperty {
                method: method.to_string(),
                property: property.to_string(),
            })
    }

    pub fn plan(&self, method: &str) -> Result<&QueryPlan, QueryDerivationError> {
        self.plans
            .get(method)
            .ok_or_else(|| QueryDerivationError::NotRegistered {
                method: method.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Run a registered method and map each row into `P`, in ascending key order.
    pub async fn execute<P, S>(
        &self,
        session: &S,
        method: &str,
        params: Vec<ParamValue>,
    ) -> RepoResult<Vec<P>>
    where
        P: Projection<Source = T>,
        S: Session + ?Sized,
    {
        let plan = self.plan(method)?;
        if plan.type_id != TypeId::of::<P>() {
            return Err(QueryDerivationError::ShapeMismatch {
                method: method.to_string(),
            }
            .into());
        }
        let select = plan.select(params)?;
        let rows = session.select(&select).await?;
        rows.into_iter().map(P::from_row).collect()
    }
}
