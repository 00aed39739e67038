#![cfg(all(feature = "stream-ext", feature = "memory-backend"))]

use futures::StreamExt;
use projectit::backends::MemoryTransactionManager;
use projectit::stream_ext::FindStreamExt;
use projectit::transactions::TransactionManager;
use projectit::{Entity, EntityRepository, ParamValue, UNSAVED_ID};

#[derive(Entity, Clone, Debug, PartialEq)]
struct Note {
    #[fetch(id)]
    id: i64,
    body: String,
}

#[tokio::test]
async fn streams_yield_rows_in_id_order() {
    let mgr = MemoryTransactionManager::new();
    let s = mgr.session().await.unwrap();
    let repo = EntityRepository::<Note>::new();
    for body in ["x", "y", "x"] {
        repo.save(&s, Note { id: UNSAVED_ID, body: body.into() })
            .await
            .unwrap();
    }

    let all: Vec<_> = repo.find_all_stream(&s).collect().await;
    let ids: Vec<i64> = all.into_iter().map(|n| n.unwrap().id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let xs: Vec<_> = repo
        .find_by_field_stream(&s, "body", ParamValue::from("x"))
        .map(|n| n.map(|n| n.id))
        .collect()
        .await;
    assert_eq!(xs.into_iter().collect::<Result<Vec<_>, _>>().unwrap(), vec![1, 3]);

    let mut bad = repo.find_by_field_stream(&s, "missing", ParamValue::Null);
    assert!(bad.next().await.unwrap().is_err());
}
