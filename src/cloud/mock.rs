//! In-memory `CloudClient` test double. Plays the same role for the daemon
//! loop's tests that `rt_test_utils::MockWsServer` plays for the teacher's
//! uplink tests, but in-process: no socket, just preloaded event fixtures
//! and a live queue a test can push to mid-run.

use super::{CloudClient, EventStream};
use crate::error::CloudError;
use crate::model::Event;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub struct MockCloudClient {
    catalog: Mutex<Vec<Event>>,
    live_queue: Mutex<VecDeque<Event>>,
    fail_auth: bool,
}

impl MockCloudClient {
    pub fn new(catalog: Vec<Event>) -> Self {
        MockCloudClient {
            catalog: Mutex::new(catalog),
            live_queue: Mutex::new(VecDeque::new()),
            fail_auth: false,
        }
    }

    pub fn with_auth_failure() -> Self {
        MockCloudClient {
            catalog: Mutex::new(Vec::new()),
            live_queue: Mutex::new(VecDeque::new()),
            fail_auth: true,
        }
    }

    /// Append an event to the catalog (so a subsequent `fetch_since` sees it)
    /// and to the live queue (so an open `subscribe` stream yields it next).
    pub fn push_event(&self, event: Event) {
        self.catalog.lock().unwrap().push(event.clone());
        self.live_queue.lock().unwrap().push_back(event);
    }
}

#[async_trait]
impl CloudClient for MockCloudClient {
    async fn fetch_since(
        &self,
        repo: &str,
        after_remote_id: i64,
        limit: u32,
    ) -> Result<Vec<Event>, CloudError> {
        if self.fail_auth {
            return Err(CloudError::Fatal("mock auth failure".to_owned()));
        }
        let catalog = self.catalog.lock().unwrap();
        let mut page: Vec<Event> = catalog
            .iter()
            .filter(|e| e.repo == repo && e.remote_id > after_remote_id)
            .cloned()
            .collect();
        page.sort_by_key(|e| e.remote_id);
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn subscribe(&self, repo: &str) -> Result<EventStream, CloudError> {
        if self.fail_auth {
            return Err(CloudError::Fatal("mock auth failure".to_owned()));
        }
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        // Drain matching events out of the queue so a second `subscribe` call
        // (after a gap-fill or reconnect) doesn't redeliver the same events.
        let pending: Vec<Event> = {
            let mut queue = self.live_queue.lock().unwrap();
            let (matching, rest): (VecDeque<Event>, VecDeque<Event>) =
                queue.drain(..).partition(|e| e.repo == repo);
            *queue = rest;
            matching.into_iter().collect()
        };
        tokio::spawn(async move {
            for event in pending {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
