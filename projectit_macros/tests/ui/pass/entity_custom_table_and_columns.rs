use projectit_core::{Fetchable, Insertable, Sequenced, Updatable};
use projectit_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "people", sequence = "people_seq", initial_value = 500, allocation_size = 5)]
struct Person {
    #[fetch(column = "email_address")]
    email: String,
    #[fetch(column = "full_name")]
    name: String,
    #[fetch(id)]
    id: i64,
    #[fetch(skip)]
    scratch: Vec<u8>,
}

fn main() {
    assert_eq!(Person::TABLE, "people");
    assert_eq!(Person::SELECT_COLUMNS, &["email_address", "full_name", "id"]);
    assert_eq!(Person::INSERT_COLUMNS, &["email_address", "full_name"]);
    assert_eq!(Person::UPDATE_COLUMNS, &["email_address", "full_name"]);
    assert_eq!(Person::SEQUENCE.name, "people_seq");
    assert_eq!(Person::SEQUENCE.initial_value, 500);
    assert_eq!(Person::SEQUENCE.allocation_size, 5);
    let _adapter = PersonRowAdapter;
    let _ = _adapter;
}
