//! Backend-agnostic scenarios over the people schema, run by every backend's test suite.

use async_trait::async_trait;
use people::{address_repository, person_repository, Address, Person, PersonFirstNameView};
use projectit::transactions::{TransactionDefinition, TransactionManager, TransactionTemplate};
use projectit::{RepoError, RepoResult};

#[async_trait]
pub trait SessionFactory: Sync {
    type Manager: TransactionManager;

    /// A template over a store that has the people schema and no rows.
    async fn fresh(&self) -> RepoResult<TransactionTemplate<Self::Manager>>;
}

fn repos() -> RepoResult<(address_repository::Repository, person_repository::Repository)> {
    Ok((
        address_repository::Repository::new()?,
        person_repository::Repository::new()?,
    ))
}

/// Two people saved with inline addresses; the first-name projection returns both in order.
pub async fn scenario_a_projection_after_cascading_saves<F: SessionFactory>(
    f: &F,
) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let p = &people;
    let (max, bax) = tpl
        .execute(|s| async move {
            let max = p
                .save(
                    &s,
                    Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")),
                )
                .await?;
            let bax = p
                .save(
                    &s,
                    Person::new("Bax", "Fax").with_address(Address::new("Ukraine", "Kiev", "hz")),
                )
                .await?;
            Ok((max, bax))
        })
        .await?;

    let max_address = max.address.clone().ok_or(RepoError::NotFound)?;
    let bax_address = bax.address.clone().ok_or(RepoError::NotFound)?;
    assert_eq!((max_address.id, bax_address.id), (111, 112));
    assert_eq!((max.id, bax.id), (222, 223));
    assert!(max.created_at.is_some() && max_address.created_at.is_some());

    let s = tpl.session().await?;
    let names = people.get_all_first_names_by(&s).await?;
    assert_eq!(names.len(), 2);
    assert_eq!(names[0].first_name(), "Max");
    assert_eq!(names[1].first_name(), "Bax");

    // The address is retrievable on its own.
    assert_eq!(addresses.find_by_id(&s, 111).await?, Some(max_address));
    Ok(())
}

/// Two people share one saved address; deleting one leaves the other and the address.
pub async fn scenario_b_shared_address_survives_delete<F: SessionFactory>(
    f: &F,
) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let (a, p) = (&addresses, &people);
    tpl.execute(|s| async move {
        let home = a.save(&s, Address::new("Ukraine", "Odessa", "hz")).await?;
        p.save(&s, Person::new("Max", "Maksimko").with_address(home.clone()))
            .await?;
        p.save(&s, Person::new("Bax", "Fax").with_address(home)).await?;
        Ok(())
    })
    .await?;

    let s = tpl.session().await?;
    let all_addresses = addresses.find_all(&s).await?;
    assert_eq!(all_addresses.len(), 1);

    let p = &people;
    tpl.execute(|tx| async move {
        let everyone = p.find_all(&tx).await?;
        let first = everyone.first().ok_or(RepoError::NotFound)?;
        p.delete(&tx, first).await
    })
    .await?;

    let remaining = people.find_all(&s).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].first_name, "Bax");
    assert_eq!(remaining[0].address.as_ref(), all_addresses.first());
    assert_eq!(addresses.count(&s).await?, 1);
    Ok(())
}

/// Batch delete clears people without touching addresses; a new save then stands alone.
pub async fn scenario_c_batch_delete_then_save<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let p = &people;
    tpl.execute(|s| async move {
        p.save(
            &s,
            Person::new("Old", "Timer").with_address(Address::new("Ukraine", "Lviv", "hz")),
        )
        .await?;
        p.delete_all_in_batch(&s).await?;
        p.save(
            &s,
            Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")),
        )
        .await?;
        Ok(())
    })
    .await?;

    let s = tpl.session().await?;
    let everyone = people.find_all(&s).await?;
    assert_eq!(everyone.len(), 1);
    assert_eq!(everyone[0].first_name, "Max");
    assert_eq!(addresses.count(&s).await?, 2);
    Ok(())
}

/// All five first-name queries agree on values and order, whatever their name or shape.
pub async fn projection_queries_are_equivalent<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (_, people) = repos()?;
    let p = &people;
    tpl.execute(|s| async move {
        p.save_all(
            &s,
            vec![
                Person::new("Max", "Maksimko"),
                Person::new("Bax", "Fax"),
                Person::new("Ann", "Fax").with_address(Address::new("Ukraine", "Kiev", "hz")),
            ],
        )
        .await
    })
    .await?;

    let s = tpl.session().await?;
    fn names<V: PersonFirstNameView>(v: &[V]) -> Vec<String> {
        v.iter().map(|x| x.first_name().to_string()).collect()
    }
    let expected = vec!["Max".to_string(), "Bax".into(), "Ann".into()];
    assert_eq!(names(&people.get_all_first_names_by(&s).await?), expected);
    assert_eq!(names(&people.find_ololo_trololo_by(&s).await?), expected);
    assert_eq!(names(&people.find_all_by(&s).await?), expected);
    assert_eq!(names(&people.find_by(&s).await?), expected);
    assert_eq!(names(&people.get_by(&s).await?), expected);

    // Views keep the fetched row; it holds only the projected column.
    let views = people.find_by(&s).await?;
    assert_eq!(views[0].row().len(), 1);

    let fax = people
        .read_first_names_by_last_name(&s, "Fax".to_string())
        .await?;
    assert_eq!(names(&fax), vec!["Bax".to_string(), "Ann".into()]);
    assert_eq!(people.find_by_last_name(&s, &"Maksimko".to_string()).await?.len(), 1);
    Ok(())
}

/// Two `find_all` calls without writes in between return identical results.
pub async fn find_all_is_idempotent<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (_, people) = repos()?;
    let p = &people;
    tpl.execute(|s| async move {
        p.save(&s, Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")))
            .await?;
        p.save(&s, Person::new("Bax", "Fax")).await
    })
    .await?;
    let s = tpl.session().await?;
    let first = people.find_all(&s).await?;
    let second = people.find_all(&s).await?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    Ok(())
}

/// A person with blank names is rejected before anything is written or allocated.
pub async fn blank_person_is_rejected_before_any_write<F: SessionFactory>(
    f: &F,
) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let p = &people;
    let err = tpl
        .execute(|s| async move {
            p.save(&s, Person::new("", " ").with_address(Address::new("Ukraine", "Odessa", "hz")))
                .await
        })
        .await;
    match err {
        Err(RepoError::Validation(e)) => assert_eq!((e.entity, e.field), ("Person", "first_name")),
        other => panic!("expected a validation error, got {other:?}"),
    }
    let s = tpl.session().await?;
    assert_eq!(people.count(&s).await?, 0);
    assert_eq!(addresses.count(&s).await?, 0);

    // No identifier was consumed by the rejected graph.
    let saved = people
        .save(&s, Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")))
        .await?;
    assert_eq!(saved.id, 222);
    assert_eq!(saved.address.map(|a| a.id), Some(111));
    Ok(())
}

/// A failure after a cascading save rolls back both rows.
pub async fn failed_transaction_leaves_no_rows<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let p = &people;
    let result: RepoResult<()> = tpl
        .execute(|s| async move {
            p.save(&s, Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")))
                .await?;
            Err(RepoError::NotFound)
        })
        .await;
    assert!(matches!(result, Err(RepoError::NotFound)));
    let s = tpl.session().await?;
    assert_eq!(people.count(&s).await?, 0);
    assert_eq!(addresses.count(&s).await?, 0);
    Ok(())
}

/// Saving a persisted person updates it in place and keeps the creation stamp.
pub async fn update_keeps_identity_and_creation_time<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let s = tpl.session().await?;
    let saved = people
        .save(&s, Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")))
        .await?;
    let mut renamed = saved.clone();
    renamed.first_name = "Maxim".into();
    let updated = people.save(&s, renamed).await?;
    assert_eq!(updated.id, saved.id);
    assert_eq!(updated.created_at, saved.created_at);
    assert!(updated.updated_at >= saved.updated_at);
    assert_eq!(people.count(&s).await?, 1);
    assert_eq!(addresses.count(&s).await?, 1);
    let stored = people.find_by_id(&s, saved.id).await?.ok_or(RepoError::NotFound)?;
    assert_eq!(stored.first_name, "Maxim");
    assert_eq!(stored.created_at, saved.created_at);
    assert!(people.exists_by_id(&s, saved.id).await?);
    assert!(!people.exists_by_id(&s, saved.id + 1).await?);
    Ok(())
}

/// Writes inside a read-only transaction fail; reads succeed.
pub async fn read_only_transaction_rejects_writes<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (_, people) = repos()?;
    let p = &people;
    let def = TransactionDefinition::read_only();
    let names = tpl
        .execute_with(&def, |s| async move { p.get_by(&s).await })
        .await?;
    assert!(names.is_empty());
    let write = tpl
        .execute_with(&def, |s| async move { p.save(&s, Person::new("Max", "Maksimko")).await })
        .await;
    assert!(write.is_err());
    let s = tpl.session().await?;
    assert_eq!(people.count(&s).await?, 0);
    Ok(())
}

/// Edits to an already saved address travel with its owner's save and are validated first.
pub async fn edited_address_is_saved_with_its_owner<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let s = tpl.session().await?;
    let mut max = people
        .save(&s, Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")))
        .await?;
    if let Some(home) = max.address.as_mut() {
        home.city = "Kiev".into();
    }
    let max = people.save(&s, max).await?;
    assert_eq!(max.address.as_ref().map(|a| a.city.as_str()), Some("Kiev"));
    let stored = addresses.find_by_id(&s, 111).await?.ok_or(RepoError::NotFound)?;
    assert_eq!(stored.city, "Kiev");
    assert_eq!(addresses.count(&s).await?, 1);

    let mut blank = max.clone();
    if let Some(home) = blank.address.as_mut() {
        home.city = " ".into();
    }
    match people.save(&s, blank).await {
        Err(RepoError::Validation(e)) => assert_eq!((e.entity, e.field), ("Address", "city")),
        other => panic!("expected a validation error, got {other:?}"),
    }
    let reloaded = people.find_by_id(&s, max.id).await?.ok_or(RepoError::NotFound)?;
    assert_eq!(reloaded.address.map(|a| a.city), Some("Kiev".to_string()));
    Ok(())
}

/// An address a person still points at cannot be removed, singly or in batch.
pub async fn referenced_address_cannot_be_deleted<F: SessionFactory>(f: &F) -> RepoResult<()> {
    let tpl = f.fresh().await?;
    let (addresses, people) = repos()?;
    let s = tpl.session().await?;
    let max = people
        .save(&s, Person::new("Max", "Maksimko").with_address(Address::new("Ukraine", "Odessa", "hz")))
        .await?;
    let home = max.address.clone().ok_or(RepoError::NotFound)?;

    let single = addresses.delete(&s, &home).await;
    assert!(matches!(single, Err(RepoError::Backend { .. })), "{single:?}");
    let batch = addresses.delete_all_in_batch(&s).await;
    assert!(matches!(batch, Err(RepoError::Backend { .. })), "{batch:?}");

    let everyone = people.find_all(&s).await?;
    assert_eq!(everyone.len(), 1);
    assert_eq!(everyone[0].address.as_ref(), Some(&home));
    assert_eq!(addresses.count(&s).await?, 1);

    // Once nobody points at it the address goes.
    people.delete(&s, &max).await?;
    addresses.delete(&s, &home).await?;
    assert_eq!(addresses.count(&s).await?, 0);
    Ok(())
}
