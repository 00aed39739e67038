use projectit_macros::{repository, view, Entity, Projection};

#[derive(Entity, Clone, Debug)]
#[entity(table = "users")]
struct User {
    #[fetch(id)]
    id: Option<i64>,
    email: String,
}

#[view(entity = User)]
trait Email {
    fn email(&self) -> &str;
}

#[derive(Projection)]
#[projection(entity = User)]
struct EmailRecord {
    email: String,
}

#[repository(
    entity = User,
    finders(find_by_email: String),
    queries(
        get_all_emails_by -> EmailProxy,
        read_by_email(email: String) -> EmailRecord,
    )
)]
mod users_repo {}

#[repository(entity = User, queries(find_all_by_nickname(nick: String) -> EmailRecord))]
mod broken_repo {}

fn main() {
    let repo = users_repo::Repository::new().unwrap();
    assert_eq!(repo.queries().len(), 2);

    // Bad names surface when the repository is built, not when a query runs.
    let err = broken_repo::Repository::new().unwrap_err();
    assert!(err.to_string().contains("find_all_by_nickname"));
}
