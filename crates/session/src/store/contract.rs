//! Behaviour every `CredentialStore` backend must share. Each backend's test
//! module runs these against its own instance.

use std::sync::Arc;

use provider::{Profile, TokenSet};

use super::CredentialStore;
use crate::error::Error;
use crate::record::{IssuedTokens, TokenRotation, UpdateOutcome};

pub(crate) fn profile(id: &str) -> Profile {
    Profile {
        id: id.into(),
        display_name: Some(format!("User {id}")),
        mail: None,
        user_principal_name: None,
    }
}

pub(crate) fn token_set(suffix: &str) -> TokenSet {
    TokenSet {
        access_token: format!("at_{suffix}"),
        refresh_token: format!("rt_{suffix}"),
        expires_at: Some(1_735_500_000_000),
    }
}

pub(crate) fn issued(suffix: &str, temporary: &str) -> IssuedTokens {
    IssuedTokens::from_authorization(token_set(suffix), temporary.into())
}

pub(crate) async fn upsert_is_create_or_update<S: CredentialStore + ?Sized>(store: &S) {
    let first = store.upsert(&profile("u1"), issued("1", "temp-1")).await.unwrap();
    assert_eq!(first.identity_id, "u1");
    assert_eq!(first.display_name, "User u1");

    let second = store.upsert(&profile("u1"), issued("2", "temp-2")).await.unwrap();
    assert_eq!(second.identity_id, "u1");
    assert_eq!(second.access_token, "at_2");
    assert_eq!(second.temporary_token.as_deref(), Some("temp-2"));

    // The earlier temporary token was replaced, not kept alongside
    assert!(matches!(
        store.find_by_temporary_token("temp-1").await,
        Err(Error::RecordNotFound(_))
    ));
    let current = store.find_by_temporary_token("temp-2").await.unwrap();
    assert_eq!(current.refresh_token, "rt_2");
}

pub(crate) async fn lookups_by_token<S: CredentialStore + ?Sized>(store: &S) {
    store.upsert(&profile("u1"), issued("1", "temp-1")).await.unwrap();
    store.upsert(&profile("u2"), issued("2", "temp-2")).await.unwrap();

    assert_eq!(
        store.find_by_temporary_token("temp-2").await.unwrap().identity_id,
        "u2"
    );
    assert!(matches!(
        store.find_by_temporary_token("nope").await,
        Err(Error::RecordNotFound(_))
    ));
    assert!(matches!(
        store.find_by_public_token("nope").await,
        Err(Error::RecordNotFound(_))
    ));
    assert!(matches!(
        store.find_by_public_token("").await,
        Err(Error::RecordNotFound(_))
    ));
    assert!(matches!(
        store.find_by_temporary_token("").await,
        Err(Error::RecordNotFound(_))
    ));
}

pub(crate) async fn promotion_is_single_use<S: CredentialStore + ?Sized>(store: &S) {
    store.upsert(&profile("u1"), issued("1", "abc")).await.unwrap();

    let public = store.promote_temporary_to_public("abc").await.unwrap();
    assert!(!public.is_empty());

    let record = store.find_by_public_token(&public).await.unwrap();
    assert_eq!(record.identity_id, "u1");
    assert_eq!(record.public_token.as_deref(), Some(public.as_str()));
    assert!(record.temporary_token.is_none());

    assert!(matches!(
        store.promote_temporary_to_public("abc").await,
        Err(Error::RecordNotFound(_))
    ));
    assert!(matches!(
        store.promote_temporary_to_public("").await,
        Err(Error::RecordNotFound(_))
    ));
}

pub(crate) async fn concurrent_promotion_has_one_winner<S>(store: Arc<S>)
where
    S: CredentialStore + ?Sized + 'static,
{
    store.upsert(&profile("u1"), issued("1", "race")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.promote_temporary_to_public("race").await
        }));
    }

    let mut winners = Vec::new();
    let mut not_found = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(public) => winners.push(public),
            Err(Error::RecordNotFound(_)) => not_found += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one promotion must win");
    assert_eq!(not_found, 7);
    let record = store.find_by_public_token(&winners[0]).await.unwrap();
    assert!(record.temporary_token.is_none());
}

pub(crate) async fn concurrent_upsert_keeps_one_coherent_record<S>(store: Arc<S>)
where
    S: CredentialStore + ?Sized + 'static,
{
    const WRITERS: usize = 16;

    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .upsert(&profile("u1"), issued(&i.to_string(), &format!("t{i}")))
                .await
        }));
    }
    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.identity_id, "u1");
    }

    // Every upsert replaces the temporary token, so exactly one of them still resolves
    let mut survivors = Vec::new();
    for i in 0..WRITERS {
        match store.find_by_temporary_token(&format!("t{i}")).await {
            Ok(record) => survivors.push((i, record)),
            Err(Error::RecordNotFound(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(survivors.len(), 1, "one record per identity");

    let (writer, record) = &survivors[0];
    assert_eq!(record.identity_id, "u1");
    assert_eq!(record.access_token, format!("at_{writer}"));
    assert_eq!(record.refresh_token, format!("rt_{writer}"));
    assert_eq!(record.temporary_token, Some(format!("t{writer}")));
}

pub(crate) async fn update_tokens_compare_and_set<S: CredentialStore + ?Sized>(store: &S) {
    store.upsert(&profile("u1"), issued("1", "temp-1")).await.unwrap();
    let public = store.promote_temporary_to_public("temp-1").await.unwrap();

    let rotation = TokenRotation {
        previous_refresh: "rt_1".into(),
        tokens: token_set("2"),
    };
    assert_eq!(
        store.update_tokens(&public, &rotation).await.unwrap(),
        UpdateOutcome::Updated
    );
    let record = store.find_by_public_token(&public).await.unwrap();
    assert_eq!(record.access_token, "at_2");
    assert_eq!(record.refresh_token, "rt_2");

    // A second refresh from the superseded token must not overwrite the newer pair
    let late = TokenRotation {
        previous_refresh: "rt_1".into(),
        tokens: token_set("late"),
    };
    assert_eq!(
        store.update_tokens(&public, &late).await.unwrap(),
        UpdateOutcome::Stale
    );
    let record = store.find_by_public_token(&public).await.unwrap();
    assert_eq!(record.access_token, "at_2");

    assert!(matches!(
        store.update_tokens("unknown", &rotation).await,
        Err(Error::RecordNotFound(_))
    ));
}

pub(crate) async fn reauthorization_keeps_public_token<S: CredentialStore + ?Sized>(store: &S) {
    store.upsert(&profile("u1"), issued("1", "temp-1")).await.unwrap();
    let public = store.promote_temporary_to_public("temp-1").await.unwrap();

    let record = store.upsert(&profile("u1"), issued("2", "temp-2")).await.unwrap();
    assert_eq!(record.public_token.as_deref(), Some(public.as_str()));
    assert_eq!(record.temporary_token.as_deref(), Some("temp-2"));

    let by_public = store.find_by_public_token(&public).await.unwrap();
    assert_eq!(by_public.access_token, "at_2");
}
