//! Scenario 5 (timeout) from spec.md §8: a handler whose command outlives its
//! configured timeout is killed, its dispatch record outcome is `timeout`, and
//! the cursor still advances past the event despite the handler failing.

use metarelay::cloud::mock::MockCloudClient;
use metarelay::daemon::{run_repo_worker, DaemonContext};
use metarelay::dispatch::Dispatcher;
use metarelay::handlers::HandlerRegistry;
use metarelay::model::{Event, HandlerConfig, Outcome, RepoConfig};
use metarelay::store::EventStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn event(remote_id: i64) -> Event {
    Event {
        remote_id,
        repo: "o/r".to_owned(),
        event_type: "check_run".to_owned(),
        action: "completed".to_owned(),
        ref_name: None,
        actor: None,
        summary: String::new(),
        payload: serde_json::json!({}),
        delivery_id: format!("d{remote_id}"),
        created_at: chrono::Utc::now(),
    }
}

fn slow_handler() -> HandlerConfig {
    HandlerConfig {
        name: "slow".to_owned(),
        event_type: "check_run".to_owned(),
        action: String::new(),
        command: "sleep 5".to_owned(),
        filters: vec![],
        timeout: Duration::from_secs(1),
        enabled: true,
    }
}

async fn wait_for_cursor(store: &EventStore, repo: &str, target: i64) {
    for _ in 0..300 {
        if store.get_cursor(repo).await.unwrap() == Some(target) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cursor for {repo} never reached {target}");
}

#[tokio::test]
async fn a_timed_out_handler_still_advances_the_cursor() {
    let store = Arc::new(EventStore::open_in_memory().unwrap());
    let cloud = MockCloudClient::new(vec![event(1)]);
    let ctx = DaemonContext {
        store: store.clone(),
        cloud: Arc::new(cloud),
        handlers: Arc::new(HandlerRegistry::new(vec![slow_handler()])),
        dispatcher: Arc::new(Dispatcher::new(4)),
        cloud_secret: Arc::from("test-secret"),
    };

    let shutdown = CancellationToken::new();
    let repo = RepoConfig { name: "o/r".to_owned(), path: None };
    let worker = tokio::spawn(run_repo_worker(ctx, repo, shutdown.clone()));

    wait_for_cursor(&store, "o/r", 1).await;

    let outcome = store.get_dispatch_outcome(1, "slow").await.unwrap();
    assert_eq!(outcome, Some(Outcome::Timeout));

    shutdown.cancel();
    worker.await.unwrap();
}
