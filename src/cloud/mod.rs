//! Cloud Client (spec §4.B): catch-up fetch plus live subscription behind one
//! trait, so the daemon loop can be driven against a mock in tests exactly as
//! the teacher drives `uplink.rs` against `rt-test-utils::MockWsServer`.

pub mod backoff;
pub mod http;
pub mod mock;

use crate::error::CloudError;
use crate::model::Event;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// A lazy stream of live events, in arrival order (spec §4.B: "not guaranteed
/// to equal remote_id order"). Ends (yields `None`) on disconnect; callers
/// must fall back to catch-up per spec.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, CloudError>> + Send>>;

#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Events for `repo` strictly after `after_remote_id`, ordered by
    /// `remote_id` ascending, at most `limit` rows. Caller paginates until an
    /// empty page.
    async fn fetch_since(
        &self,
        repo: &str,
        after_remote_id: i64,
        limit: u32,
    ) -> Result<Vec<Event>, CloudError>;

    /// Open a live subscription for `repo`. Restartable: a fresh call after
    /// the previous stream ended re-enters cleanly.
    async fn subscribe(&self, repo: &str) -> Result<EventStream, CloudError>;
}

pub const DEFAULT_FETCH_LIMIT: u32 = 100;
