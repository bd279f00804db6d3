//! End-to-end exercises of the session -> key -> worker cascade, driven
//! entirely through in-process fakes.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use cascade_clients::fakes::{FakeBrokerClient, FakeCloudClientFactory};
use cascade_clients::{CloudClientFactory, SecretsBrokerClient};
use cascade_core::{Controller, LeaseObserver};
use cascade_worker::refreshers::{KeyRefresher, SessionRefresher, WorkerRefresher};

const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[tokio::test]
async fn session_then_key_then_worker_warm_up_in_order() {
    let broker = FakeBrokerClient::new(Duration::from_secs(600), Duration::from_secs(300));
    let cloud = Arc::new(FakeCloudClientFactory::new(vec!["bucket-a".to_owned(), "bucket-b".to_owned()]))
        as Arc<dyn CloudClientFactory>;

    let session = Controller::new(
        "session",
        SessionRefresher::new(Arc::clone(&broker) as Arc<dyn SecretsBrokerClient>),
        MAX_BACKOFF,
    );
    let key = Controller::new(
        "key",
        KeyRefresher::new(
            Arc::clone(&broker) as Arc<dyn SecretsBrokerClient>,
            "secret/data/gcs-lister".to_owned(),
            Duration::from_secs(120),
        ),
        MAX_BACKOFF,
    );
    let worker = Controller::new(
        "worker",
        WorkerRefresher::new(Arc::clone(&key), Arc::clone(&cloud), "proj-1".to_owned(), Duration::from_secs(60)),
        MAX_BACKOFF,
    );

    session
        .register(Arc::clone(&key) as Arc<dyn cascade_core::LeaseObserver>)
        .await;
    key.register(Arc::clone(&worker) as Arc<dyn cascade_core::LeaseObserver>)
        .await;

    session.start().await.unwrap();
    key.start().await.unwrap();
    worker.start().await.unwrap();

    assert!(!session.credential().await.is_empty());
    assert!(!key.credential().await.is_empty());
    assert!(!worker.credential().await.is_empty());
    assert_eq!(worker.credential().await.identifier, "2-buckets");

    worker.stop().await;
    key.stop().await;
    session.stop().await;
}

#[tokio::test]
async fn key_refresh_failure_propagates_stale_to_worker() {
    let broker = FakeBrokerClient::new(Duration::from_secs(600), Duration::from_secs(300));
    let cloud = Arc::new(FakeCloudClientFactory::new(vec!["bucket-a".to_owned()])) as Arc<dyn CloudClientFactory>;

    let key = Controller::new(
        "key",
        KeyRefresher::new(
            Arc::clone(&broker) as Arc<dyn SecretsBrokerClient>,
            "secret/data/gcs-lister".to_owned(),
            Duration::from_secs(120),
        ),
        MAX_BACKOFF,
    );
    let worker = Controller::new(
        "worker",
        WorkerRefresher::new(Arc::clone(&key), Arc::clone(&cloud), "proj-1".to_owned(), Duration::from_secs(60)),
        MAX_BACKOFF,
    );
    key.register(Arc::clone(&worker) as Arc<dyn cascade_core::LeaseObserver>)
        .await;

    key.start().await.unwrap();
    assert!(!key.credential().await.is_empty());
    worker.start().await.unwrap();
    assert!(!worker.credential().await.is_empty());

    // A stale notification clears the key controller's credential and
    // cascades to the worker controller, which has nothing to refresh with.
    key.notify_stale_lease();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(key.credential().await.is_empty());

    worker.stop().await;
    key.stop().await;
}

#[tokio::test]
async fn worker_refresh_fails_without_a_key_credential() {
    let cloud = Arc::new(FakeCloudClientFactory::new(vec!["bucket-a".to_owned()])) as Arc<dyn CloudClientFactory>;
    let broker = FakeBrokerClient::new(Duration::from_secs(600), Duration::from_secs(300));

    // Key controller created but never started, so its credential stays
    // empty — the worker controller's warm start must fail gracefully.
    let key = Controller::new(
        "key",
        KeyRefresher::new(
            Arc::clone(&broker) as Arc<dyn SecretsBrokerClient>,
            "secret/data/gcs-lister".to_owned(),
            Duration::from_secs(120),
        ),
        MAX_BACKOFF,
    );
    let worker = Controller::new(
        "worker",
        WorkerRefresher::new(Arc::clone(&key), Arc::clone(&cloud), "proj-1".to_owned(), Duration::from_secs(60)),
        MAX_BACKOFF,
    );

    worker.start().await.unwrap();
    assert!(worker.credential().await.is_empty());
    worker.stop().await;
}

#[tokio::test]
async fn broker_login_failures_leave_session_controller_unhealthy() {
    let broker = FakeBrokerClient::new(Duration::from_secs(600), Duration::from_secs(300)).with_login_failures(3);
    let session = Controller::new(
        "session",
        SessionRefresher::new(broker as Arc<dyn SecretsBrokerClient>),
        MAX_BACKOFF,
    );

    session.start().await.unwrap();
    assert!(session.credential().await.is_empty());
    session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn session_controller_recovers_on_the_expected_backoff_schedule() {
    let broker = FakeBrokerClient::new(Duration::from_secs(600), Duration::from_secs(300)).with_login_failures(2);
    let login_counter = Arc::clone(&broker);
    let session = Controller::new(
        "session",
        SessionRefresher::new(Arc::clone(&broker) as Arc<dyn SecretsBrokerClient>),
        MAX_BACKOFF,
    );

    // Warm attempt is the 1st login, which fails.
    session.start().await.unwrap();
    assert!(session.credential().await.is_empty());
    assert_eq!(login_counter.login_call_count(), 1);

    // calc_backoff(0, ..) is in [1s, 2s): the 2nd login (also failing) must
    // land before 2s. A post-increment backoff bug would draw from
    // calc_backoff(1, ..) instead and miss this window.
    tokio::time::advance(Duration::from_millis(1_999)).await;
    assert_eq!(login_counter.login_call_count(), 2);
    assert!(session.credential().await.is_empty());

    // calc_backoff(1, ..) is in [2s, 3s): the 3rd login, which succeeds, must
    // land well before the 5s mark.
    tokio::time::advance(Duration::from_millis(3_000)).await;
    assert_eq!(login_counter.login_call_count(), 3);
    assert!(!session.credential().await.is_empty());

    session.stop().await;
}
