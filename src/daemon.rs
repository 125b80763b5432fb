//! Daemon Loop (spec §4.H): one repo worker per configured repo, each a
//! small state machine — INIT → CATCHUP → SUBSCRIBING ↔ RECONNECTING →
//! SHUTDOWN — generalized from the connect/send/reconnect shape of
//! `uplink.rs` and the pending-event computation of `replay.rs`.

use crate::cloud::backoff::Backoff;
use crate::cloud::{CloudClient, DEFAULT_FETCH_LIMIT};
use crate::error::CloudError;
use crate::handlers::HandlerRegistry;
use crate::journal::JournalWriter;
use crate::model::{Event, RepoConfig};
use crate::redact::redact;
use crate::store::EventStore;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;

/// Shared dependencies every repo worker needs; cheap to clone (all `Arc`).
#[derive(Clone)]
pub struct DaemonContext {
    pub store: Arc<EventStore>,
    pub cloud: Arc<dyn CloudClient>,
    pub handlers: Arc<HandlerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    /// The configured cloud API key, so any logged cloud-client error can be
    /// scrubbed of it before it reaches `tracing` (spec §7).
    pub cloud_secret: Arc<str>,
}

/// Run the per-repo worker loop until `shutdown` is cancelled. Never
/// returns an error to the caller — transport failures are handled
/// internally via RECONNECTING; this function returns once SHUTDOWN
/// completes.
pub async fn run_repo_worker(ctx: DaemonContext, repo: RepoConfig, shutdown: CancellationToken) {
    let mut cursor = ctx
        .store
        .get_cursor(&repo.name)
        .await
        .unwrap_or(None)
        .unwrap_or(0);

    let mut journal = repo
        .path
        .as_ref()
        .and_then(|p| match JournalWriter::open(p) {
            Ok(j) => Some(j),
            Err(e) => {
                warn!(repo = %repo.name, error = %e, "failed to open event journal, continuing without it");
                None
            }
        });

    let mut backoff = Backoff::default();

    'outer: loop {
        if shutdown.is_cancelled() {
            break;
        }

        // CATCHUP: drain pages until empty.
        match catchup(&ctx, &repo.name, &mut cursor, &mut journal, &shutdown).await {
            Ok(()) => {}
            Err(CloudError::Fatal(msg)) => {
                warn!(repo = %repo.name, error = %redact(&msg, &ctx.cloud_secret), "fatal cloud error during catch-up, worker exiting");
                break;
            }
            Err(CloudError::Transient(msg)) => {
                warn!(repo = %repo.name, error = %redact(&msg, &ctx.cloud_secret), "transient error during catch-up, backing off");
                reconnect_delay(&mut backoff, &shutdown).await;
                continue 'outer;
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        // SUBSCRIBING: live stream until it ends or a gap needs CATCHUP.
        match subscribe_and_drain(&ctx, &repo.name, &mut cursor, &mut journal, &shutdown).await {
            SubscribeOutcome::StreamEnded => {
                debug!(repo = %repo.name, "subscribe stream ended, re-entering catch-up");
                backoff.reset();
            }
            SubscribeOutcome::GapDetected => {
                debug!(repo = %repo.name, "gap detected in live stream, re-entering catch-up");
                backoff.reset();
            }
            SubscribeOutcome::Fatal(msg) => {
                warn!(repo = %repo.name, error = %redact(&msg, &ctx.cloud_secret), "fatal cloud error during subscribe, worker exiting");
                break;
            }
            SubscribeOutcome::Transient(msg) => {
                warn!(repo = %repo.name, error = %redact(&msg, &ctx.cloud_secret), "subscribe stream errored, backing off");
                reconnect_delay(&mut backoff, &shutdown).await;
            }
            SubscribeOutcome::Cancelled => break,
        }
    }

    info!(repo = %repo.name, cursor, "repo worker shut down");
}

async fn reconnect_delay(backoff: &mut Backoff, shutdown: &CancellationToken) {
    let delay = backoff.next_delay();
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.cancelled() => {}
    }
}

/// CATCHUP state: repeatedly fetch pages until one comes back empty.
async fn catchup(
    ctx: &DaemonContext,
    repo: &str,
    cursor: &mut i64,
    journal: &mut Option<JournalWriter>,
    shutdown: &CancellationToken,
) -> Result<(), CloudError> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        let page = ctx.cloud.fetch_since(repo, *cursor, DEFAULT_FETCH_LIMIT).await?;
        if page.is_empty() {
            return Ok(());
        }
        for event in page {
            dispatch_one(ctx, &event, cursor, journal).await;
        }
    }
}

enum SubscribeOutcome {
    StreamEnded,
    GapDetected,
    Fatal(String),
    Transient(String),
    Cancelled,
}

/// SUBSCRIBING state: consume the live stream, dispatching in-order events
/// and detecting gaps (spec §4.H: "arrived remote_id > cursor + 1 AND the
/// store has not already claimed intermediate events").
async fn subscribe_and_drain(
    ctx: &DaemonContext,
    repo: &str,
    cursor: &mut i64,
    journal: &mut Option<JournalWriter>,
    shutdown: &CancellationToken,
) -> SubscribeOutcome {
    let mut stream = match ctx.cloud.subscribe(repo).await {
        Ok(s) => s,
        Err(CloudError::Fatal(msg)) => return SubscribeOutcome::Fatal(msg),
        Err(CloudError::Transient(msg)) => return SubscribeOutcome::Transient(msg),
    };

    loop {
        let next = tokio::select! {
            item = stream.next() => item,
            _ = shutdown.cancelled() => return SubscribeOutcome::Cancelled,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(CloudError::Fatal(msg))) => return SubscribeOutcome::Fatal(msg),
            Some(Err(CloudError::Transient(msg))) => return SubscribeOutcome::Transient(msg),
            None => return SubscribeOutcome::StreamEnded,
        };

        if event.remote_id <= *cursor {
            // Dedup hit per spec §4.H: accept into the dedup table, don't redispatch.
            let _ = ctx.store.try_claim(&event).await;
            continue;
        }

        if event.remote_id > *cursor + 1 {
            let already_claimed = gap_already_claimed(ctx, repo, *cursor, event.remote_id).await;
            if !already_claimed {
                return SubscribeOutcome::GapDetected;
            }
        }

        dispatch_one(ctx, &event, cursor, journal).await;
    }
}

/// Check whether every `remote_id` strictly between `cursor` and `arrived`
/// has already been claimed (so the apparent gap is not really missing
/// data). Falls back to "not claimed" (a real gap) on store error, since
/// that's the safe direction — it costs a redundant catch-up page rather
/// than silently skipping events.
async fn gap_already_claimed(ctx: &DaemonContext, repo: &str, cursor: i64, arrived: i64) -> bool {
    ctx.store
        .all_claimed_in_range(repo, cursor, arrived)
        .await
        .unwrap_or(false)
}

/// Per-event dispatch procedure (spec §4.H, common to CATCHUP and SUBSCRIBING).
async fn dispatch_one(
    ctx: &DaemonContext,
    event: &Event,
    cursor: &mut i64,
    journal: &mut Option<JournalWriter>,
) {
    let claimed = ctx.store.try_claim(event).await.unwrap_or(false);
    if claimed {
        if let Some(journal) = journal {
            if let Err(e) = journal.append(event) {
                warn!(repo = %event.repo, remote_id = event.remote_id, error = %e, "failed to append to event journal");
            }
        }

        let matches = ctx.handlers.matching(event);
        let dispatches = matches.into_iter().map(|handler| ctx.dispatcher.dispatch(handler, event));
        let records = futures_util::future::join_all(dispatches).await;
        for record in &records {
            if let Err(e) = ctx.store.record_dispatch(record).await {
                warn!(repo = %event.repo, remote_id = event.remote_id, error = %e, "failed to record dispatch outcome");
            }
        }
    }

    // Dedup hit (claimed == false) skips straight to here: the cursor still
    // advances so a replayed already-claimed event can't stall catch-up.
    if let Err(e) = ctx.store.set_cursor(&event.repo, event.remote_id).await {
        warn!(repo = %event.repo, remote_id = event.remote_id, error = %e, "failed to advance cursor");
        return;
    }
    *cursor = event.remote_id;
}
