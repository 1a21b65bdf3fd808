//! On-disk behaviour: state written by one process is visible to the next.

use std::sync::Arc;

use chrono::Duration;
use skillscan_api::{Credential, Plan, Quota, Recommendation, SkillIdentifier, Verdict};
use skillscan_store::{Clock, CredentialStore, DB_FILE_NAME, Database, ManualClock, ResultCache};

fn safe() -> Verdict {
    Verdict {
        score: 92,
        recommendation: Some(Recommendation::Safe),
        issues: vec![],
    }
}

#[tokio::test]
async fn credential_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DB_FILE_NAME);

    {
        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        let store = CredentialStore::load(db).await.unwrap();
        store
            .put(Credential::new("k1", Plan::Free, Quota::Limited(5)))
            .await
            .unwrap();
        store
            .update_plan(Plan::PayPerScan, Some(Quota::Unbounded))
            .await
            .unwrap();
    }

    let db = Database::open_and_migrate(path).await.unwrap();
    let store = CredentialStore::load(db).await.unwrap();
    let cred = store.get().await.unwrap();
    assert_eq!(cred.api_key, "k1");
    assert_eq!(cred.plan, Plan::PayPerScan);
    assert_eq!(cred.scans_remaining, Quota::Unbounded);
}

#[tokio::test]
async fn cached_verdict_survives_reopen_until_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(DB_FILE_NAME);
    let clock = Arc::new(ManualClock::default());
    let skill = SkillIdentifier::parse("https://github.com/Acme/Weather").unwrap();

    {
        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        let cache = ResultCache::builder(db)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();
        cache.store(&skill, &safe()).await.unwrap();
    }

    clock.advance(Duration::hours(23));
    let db = Database::open_and_migrate(path).await.unwrap();
    let cache = ResultCache::builder(db)
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .build();

    // A fresh process finds the entry through SQLite, via an equivalent URL.
    let variant = SkillIdentifier::parse("github.com/acme/weather/").unwrap();
    assert_eq!(cache.lookup(&variant).await.unwrap(), Some(safe()));

    clock.advance(Duration::hours(1));
    assert_eq!(cache.lookup(&skill).await.unwrap(), None);
}

#[tokio::test]
async fn concurrent_registrations_share_one_credential() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let store = Arc::new(CredentialStore::load(db).await.unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            store
                .get_or_register(|| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok::<_, skillscan_store::StoreError>(Credential::new(
                        format!("key-{n}"),
                        Plan::Free,
                        Quota::Limited(5),
                    ))
                })
                .await
                .unwrap()
        }));
    }

    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await.unwrap().api_key.clone());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(keys.iter().all(|k| k == "key-0"));
}
