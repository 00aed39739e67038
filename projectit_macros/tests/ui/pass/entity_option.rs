use projectit_core::{Fetchable, Identifiable, Sequenced};
use projectit_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
struct Article {
    #[fetch(id)]
    id: Option<i64>,
    title: String,
    subtitle: Option<String>,
}

fn main() {
    // Table name is pluralised, sequence name derived from the type.
    assert_eq!(Article::TABLE, "articles");
    assert_eq!(Article::SEQUENCE.name, "article_sequence");
    assert_eq!(Article::SEQUENCE.initial_value, 1);
    assert_eq!(Article::SELECT_COLUMNS, &["id", "title", "subtitle"]);
    assert_eq!(
        Article::FINDABLE_COLUMNS,
        &[("title", "String"), ("subtitle", "String")]
    );
    let mut a = Article { id: None, title: "t".into(), subtitle: None };
    assert_eq!(a.id(), None);
    a.assign_id(5);
    let id: Option<<Article as Identifiable>::Key> = a.id();
    assert_eq!(id, Some(5));
}
