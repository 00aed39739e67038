#![cfg(feature = "memory-backend")]

use projectit::backends::MemoryTransactionManager;
use projectit::transactions::TransactionTemplate;
use projectit::{Entity, EntityRepository, RepoError, UNSAVED_ID};

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(initial_value = 100)]
struct E1 {
    #[fetch(id)]
    id: i64,
    label: String,
}

#[derive(Entity, Clone, Debug, PartialEq)]
#[entity(initial_value = 500)]
struct E2 {
    #[fetch(id)]
    id: Option<i64>,
}

#[tokio::test]
async fn single_template_used_for_multiple_entities() {
    // Obtain a single, entity-agnostic template.
    let tpl = TransactionTemplate::new(MemoryTransactionManager::new());
    let (r1, r2) = (EntityRepository::<E1>::new(), EntityRepository::<E2>::new());
    let (r1, r2) = (&r1, &r2);

    // Use it for a closure that mentions two different entities.
    let out = tpl
        .execute(|s| async move {
            let a = r1
                .save(&s, E1 { id: UNSAVED_ID, label: "a".into() })
                .await?;
            let b = r2.save(&s, E2 { id: None }).await?;
            Ok::<_, RepoError>(a.id + b.id.unwrap_or_default())
        })
        .await
        .expect("template should execute and return a value");

    assert_eq!(out, 600);
    let s = tpl.session().await.unwrap();
    assert_eq!(r1.count(&s).await.unwrap(), 1);
    assert_eq!(r2.count(&s).await.unwrap(), 1);
}
