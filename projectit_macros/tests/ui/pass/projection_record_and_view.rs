use projectit_core::{ParamValue, Projection, ProjectionShape, Row};
use projectit_macros::{view, Entity, Projection};

#[derive(Entity, Clone, Debug)]
#[entity(table = "person")]
struct Person {
    first_name: String,
    last_name: String,
    #[fetch(id)]
    id: i64,
}

#[view(entity = Person)]
trait FullName {
    fn first_name(&self) -> &str;
    fn last_name(&self) -> Option<&str>;
    fn id(&self) -> i64;
}

#[derive(Projection, Debug, PartialEq)]
#[projection(entity = Person)]
struct Surname {
    #[projection(column = "last_name")]
    value: String,
}

fn main() {
    assert_eq!(FullNameProxy::COLUMNS, &["first_name", "last_name", "id"]);
    assert_eq!(FullNameProxy::SHAPE, ProjectionShape::View);
    assert_eq!(Surname::COLUMNS, &["last_name"]);
    assert_eq!(Surname::SHAPE, ProjectionShape::Record);

    let mut row = Row::new();
    row.push("first_name", ParamValue::from("Max"));
    row.push("last_name", ParamValue::from("Maksimko"));
    row.push("id", ParamValue::I64(222));
    let view = FullNameProxy::from_row(row.clone()).unwrap();
    assert_eq!(view.first_name(), "Max");
    assert_eq!(view.last_name(), Some("Maksimko"));
    assert_eq!(view.id(), 222);
    assert_eq!(view.row().len(), 3);

    let record = Surname::from_row(row.project(Surname::COLUMNS).unwrap()).unwrap();
    assert_eq!(record, Surname { value: "Maksimko".into() });

    let mut bad = Row::new();
    bad.push("first_name", ParamValue::I64(1));
    assert!(FullNameProxy::from_row(bad).is_err());
}
