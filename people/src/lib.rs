#![forbid(unsafe_code)]
//! A person with an optional, exclusively owned address, plus several ways of reading back
//! only first names.

use chrono::NaiveDateTime;
use projectit::{repository, view, Entity, Projection, UNSAVED_ID};
use serde::{Deserialize, Serialize};

/// Schema for the libsql backend.
pub const DDL: &str = include_str!("../migrations/libsql/ddl.sql");
/// Drops everything `DDL` creates, plus the sequence table.
pub const DROP_DDL: &str = include_str!("../migrations/libsql/drop-ddl.sql");

#[derive(Entity, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[entity(
    table = "address",
    sequence = "address_sequence",
    initial_value = 111,
    allocation_size = 1
)]
pub struct Address {
    #[fetch(not_blank)]
    pub country: String,
    #[fetch(not_blank)]
    pub city: String,
    #[fetch(not_blank)]
    pub street: String,
    #[fetch(id)]
    pub id: i64,
    #[fetch(created_at)]
    #[serde(default, with = "json_timestamp")]
    pub created_at: Option<NaiveDateTime>,
    #[fetch(updated_at)]
    #[serde(default, with = "json_timestamp")]
    pub updated_at: Option<NaiveDateTime>,
}

impl Address {
    pub fn new(country: impl Into<String>, city: impl Into<String>, street: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            city: city.into(),
            street: street.into(),
            id: UNSAVED_ID,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Entity, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[entity(
    table = "person",
    sequence = "person_sequence",
    initial_value = 222,
    allocation_size = 1
)]
pub struct Person {
    #[fetch(not_blank)]
    pub first_name: String,
    #[fetch(not_blank)]
    pub last_name: String,
    /// Saved along with the person. Deleting the person leaves it alone.
    #[fetch(one_to_one, column = "address_id")]
    pub address: Option<Address>,
    #[fetch(id)]
    pub id: i64,
    #[fetch(created_at)]
    #[serde(default, with = "json_timestamp")]
    pub created_at: Option<NaiveDateTime>,
    #[fetch(updated_at)]
    #[serde(default, with = "json_timestamp")]
    pub updated_at: Option<NaiveDateTime>,
}

impl Person {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            address: None,
            id: UNSAVED_ID,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }
}

/// First name only, read straight from the fetched row.
#[view(entity = Person)]
pub trait PersonFirstNameView {
    fn first_name(&self) -> &str;
}

/// First name only, copied out of the row.
#[derive(Projection, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[projection(entity = Person)]
pub struct PersonFirstNameRecord {
    pub first_name: String,
}

impl PersonFirstNameView for PersonFirstNameRecord {
    fn first_name(&self) -> &str {
        &self.first_name
    }
}

#[repository(entity = Address)]
pub mod address_repository {}

// The words between the verb and `by` are ignored; each method returns every person,
// shaped by its result type.
#[repository(
    entity = Person,
    finders(find_by_last_name: String),
    queries(
        get_all_first_names_by -> PersonFirstNameViewProxy,
        find_ololo_trololo_by -> PersonFirstNameRecord,
        find_all_by -> PersonFirstNameViewProxy,
        find_by -> PersonFirstNameViewProxy,
        get_by -> PersonFirstNameRecord,
        read_first_names_by_last_name(last_name: String) -> PersonFirstNameRecord,
    )
)]
pub mod person_repository {}

/// `yyyy-MM-dd HH:mm:ss` on the wire.
mod json_timestamp {
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(at: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => s.serialize_some(&at.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| NaiveDateTime::parse_from_str(&s, FORMAT).map_err(D::Error::custom))
            .transpose()
    }
}
