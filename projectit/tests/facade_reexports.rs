use chrono::NaiveDateTime;
use projectit::*;

#[derive(Entity, Clone, Debug, PartialEq)]
struct Mini {
    #[fetch(id)]
    id: Option<i64>,
    #[fetch(column = "email_address", not_blank)]
    email: String,
    #[fetch(created_at)]
    created_at: Option<NaiveDateTime>,
}

#[view(entity = Mini)]
trait MiniEmail {
    fn email_address(&self) -> &str;
}

#[derive(Projection, Debug, PartialEq)]
#[projection(entity = Mini)]
struct MiniEmailRecord {
    #[projection(column = "email_address")]
    email: String,
}

#[repository(entity = Mini, queries(find_emails_by -> MiniEmailProxy, get_by -> MiniEmailRecord))]
mod minis {}

#[test]
fn facade_reexports_and_entity_metadata() {
    // Ensure re-exported traits and macros are usable from the facade crate.
    assert_eq!(Mini::TABLE, "minis");
    assert_eq!(Mini::SELECT_COLUMNS, &["id", "email_address", "created_at"]);
    assert_eq!(Mini::SEQUENCE.name, "mini_sequence");
    assert_eq!(Mini::SEQUENCE.initial_value, 1);

    // Ensure the generated RowAdapter type is in scope via facade usage.
    let mut row = Row::new();
    row.push("id", ParamValue::I64(3));
    row.push("email_address", ParamValue::from("a@x"));
    row.push("created_at", ParamValue::Null);
    let mini = MiniRowAdapter.from_row(&row).unwrap();
    assert_eq!(mini.id(), Some(3));

    let view = MiniEmailProxy::from_row(row.project(MiniEmailProxy::COLUMNS).unwrap()).unwrap();
    assert_eq!(view.email_address(), "a@x");
    let record = MiniEmailRecord::from_row(row.project(MiniEmailRecord::COLUMNS).unwrap()).unwrap();
    assert_eq!(record.email, "a@x");

    let err = Mini { email: "  ".into(), ..mini }.validate().unwrap_err();
    assert_eq!(err.field, "email");
}

#[test]
fn repository_from_facade_resolves_queries() {
    let repo = minis::Repository::new().unwrap();
    let plan = repo.queries().plan("find_emails_by").unwrap();
    assert_eq!(plan.shape, ProjectionShape::View);
    assert_eq!(plan.table, "minis");
    assert_eq!(repo.queries().plan("get_by").unwrap().shape, ProjectionShape::Record);
    assert!(matches!(
        repo.queries().plan("nope"),
        Err(QueryDerivationError::NotRegistered { .. })
    ));
}
