use chrono::NaiveDateTime;
use projectit_core::{
    Entity, Fetchable, ForeignKey, Insertable, ParamValue, Row, RowAdapter, Timestamped, Updatable, Validate,
    UNSAVED_ID,
};
use projectit_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "address", initial_value = 111)]
struct Address {
    #[fetch(not_blank)]
    city: String,
    #[fetch(id)]
    id: i64,
    #[fetch(created_at)]
    created_at: Option<NaiveDateTime>,
    #[fetch(updated_at)]
    updated_at: Option<NaiveDateTime>,
}

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(table = "person", initial_value = 222)]
struct Person {
    #[fetch(not_blank)]
    first_name: String,
    #[fetch(one_to_one)]
    address: Option<Address>,
    #[fetch(id)]
    id: i64,
}

fn assert_entity<T: Entity>() {}

fn main() {
    assert_entity::<Address>();
    assert_entity::<Person>();
    assert_eq!(Person::SELECT_COLUMNS, &["first_name", "address_id", "id"]);
    assert_eq!(Person::FINDABLE_COLUMNS, &[("first_name", "String")]);
    assert_eq!(Address::UPDATE_COLUMNS, &["city", "updated_at"]);
    assert_eq!(
        Person::REFERENCES,
        &[ForeignKey { column: "address_id", table: "address", key_column: "id" }]
    );

    let city = Address { city: " ".into(), id: UNSAVED_ID, created_at: None, updated_at: None };
    let p = Person { first_name: "Max".into(), address: Some(city.clone()), id: UNSAVED_ID };
    // Owned addresses are validated with their owner, saved or not.
    assert_eq!(p.validate().unwrap_err().field, "city");
    let saved = Address { id: 111, ..city };
    let p = Person { address: Some(saved.clone()), ..p };
    assert_eq!(p.validate().unwrap_err().field, "city");

    let saved = Address { city: "Kiev".into(), ..saved };
    let p = Person { address: Some(saved.clone()), ..p };
    assert!(p.validate().is_ok());
    assert_eq!(p.insert_values()[1], ParamValue::I64(111));

    let mut a = saved;
    let at = NaiveDateTime::default();
    a.stamp_created(at);
    assert_eq!((a.created_at, a.updated_at), (Some(at), Some(at)));

    let mut row = Row::new();
    row.push("first_name", ParamValue::from("Max"));
    row.push("address_id", ParamValue::I64(111));
    row.push("id", ParamValue::I64(222));
    let loaded = PersonRowAdapter.from_row(&row).unwrap();
    assert_eq!(loaded.address, None);
    assert_eq!(loaded.id, 222);
}
