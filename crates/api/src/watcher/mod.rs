//! Per-scan supervisor tasks.
//!
//! A watcher mirrors the external scanner's bus state into the database,
//! enforces the progress-inactivity timeout, ingests terminal results
//! through the classifier, and publishes lifecycle transitions for stream
//! clients. It is the single writer of a scan's status, timestamps, result
//! and final output.

pub(crate) mod state;

use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::StreamExt;
use sqlx::{Pool, Postgres};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classifier;
use crate::scans::models::{Scan, ScanStateEnvelope, ScanStatus, StatusEvent};
use crate::storage::kvb::{KvbClient, keys};
use crate::storage::postgres::{findings, scans};
use state::Transition;

/// Sleep between combined subscribe/poll passes. Together with the
/// subscribe timeout this keeps passes under 1.5s apart.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Read timeout for the subscribe half of a pass, so status changes on the
/// KV side are seen within about a second.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

/// A running scan whose progress channel stays silent this long is failed.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// TTL for the cached last-progress value.
const PROGRESS_CACHE_TTL_SECS: u64 = 3600;

#[derive(Clone)]
pub(crate) struct WatcherContext {
    pub db: Pool<Postgres>,
    pub kvb: KvbClient,
}

/// Dispatch a background watcher task for one scan.
pub(crate) fn spawn_watcher(ctx: WatcherContext, scan_uuid: Uuid) {
    actix_web::rt::spawn(async move {
        if let Err(e) = watch_scan(&ctx, scan_uuid).await {
            error!(%scan_uuid, error = ?e, "watcher exited with error");
        }
    });
}

/// Respawn watchers for scans that were non-terminal when the process last
/// stopped.
pub(crate) async fn resume_active_scans(ctx: &WatcherContext) -> Result<usize> {
    let uuids = scans::get_active_scan_uuids(&ctx.db).await?;
    let count = uuids.len();
    for scan_uuid in uuids {
        spawn_watcher(ctx.clone(), scan_uuid);
    }
    if count > 0 {
        info!(count, "resumed watchers for active scans");
    }
    Ok(count)
}

async fn watch_scan(ctx: &WatcherContext, scan_uuid: Uuid) -> Result<()> {
    let Some(scan) = scans::get_scan_by_uuid(&ctx.db, scan_uuid).await? else {
        warn!(%scan_uuid, "watcher started for unknown scan");
        return Ok(());
    };
    if scan.status.is_terminal() {
        return Ok(());
    }

    let progress_channel = keys::progress_channel(scan_uuid);
    let mut pubsub = ctx.kvb.subscribe(std::slice::from_ref(&progress_channel)).await?;
    info!(%scan_uuid, "watcher started");

    let mut last_status = scan.status;
    let mut last_progress = Instant::now();

    loop {
        // Subscribe half: wait up to a second for progress traffic.
        {
            let mut messages = pubsub.on_message();
            if let Ok(Some(msg)) = timeout(SUBSCRIBE_TIMEOUT, messages.next()).await {
                last_progress = Instant::now();
                if let Ok(payload) = msg.get_payload::<String>() {
                    cache_progress(ctx, scan_uuid, &payload).await;
                }
            }
        }

        // Poll half: mirror the scanner's KV state into the database.
        let envelope = ctx
            .kvb
            .get_json::<ScanStateEnvelope>(&keys::scan_state(scan_uuid))
            .await;
        if let Some(envelope) = envelope {
            match envelope.status.parse::<ScanStatus>() {
                Ok(observed) => {
                    if let Some(plan) = state::plan_transition(last_status, observed) {
                        match apply_transition(ctx, scan_uuid, plan).await {
                            Ok(Some(settled)) => {
                                if settled.status == ScanStatus::Running
                                    && last_status != ScanStatus::Running
                                {
                                    // Arm the inactivity timer from the moment
                                    // the scan is seen running.
                                    last_progress = Instant::now();
                                }
                                last_status = settled.status;
                                if last_status.is_terminal() {
                                    break;
                                }
                            }
                            Ok(None) => {
                                warn!(%scan_uuid, "scan row disappeared, stopping watcher");
                                return Ok(());
                            }
                            Err(e) => {
                                // Transient DB/bus failure: retry on the next poll.
                                warn!(%scan_uuid, error = ?e, "transition attempt failed, will retry");
                            }
                        }
                    }
                }
                Err(()) => {
                    warn!(%scan_uuid, status = %envelope.status, "ignoring unknown scanner status");
                }
            }
        }

        // A running scan must keep its progress channel alive.
        if last_status == ScanStatus::Running && last_progress.elapsed() >= INACTIVITY_TIMEOUT {
            warn!(%scan_uuid, "no progress traffic within the inactivity window, failing scan");
            let plan = Transition {
                to: ScanStatus::Failed,
                drain_output: true,
                process_results: false,
            };
            if let Err(e) = apply_transition(ctx, scan_uuid, plan).await {
                error!(%scan_uuid, error = ?e, "failed to mark inactive scan as failed");
            }
            break;
        }

        sleep(POLL_INTERVAL).await;
    }

    info!(%scan_uuid, status = %last_status, "watcher finished");
    Ok(())
}

/// Apply a planned transition: database first, side effects, then the
/// status publication, so stream clients never observe a status the
/// database does not yet hold.
///
/// Returns the scan row as settled after the attempt, or None when the row
/// no longer exists. When the transition was absorbed because the webhook
/// already moved the row to a terminal state, the terminal side effects
/// still run here — output drain and result ingestion belong to the
/// watcher regardless of who won the status race, and both are idempotent.
async fn apply_transition(
    ctx: &WatcherContext,
    scan_uuid: Uuid,
    plan: Transition,
) -> Result<Option<Scan>> {
    if let Some(scan) = scans::transition_scan_status(&ctx.db, scan_uuid, plan.to).await? {
        info!(%scan_uuid, status = %scan.status, "scan transitioned");

        if plan.drain_output {
            drain_output(ctx, scan_uuid).await;
        }
        if plan.process_results {
            process_results(ctx, scan_uuid).await;
        }

        publish_status(ctx, scan_uuid, &scan).await;
        publish_final_progress(ctx, scan_uuid, scan.status).await;
        return Ok(Some(scan));
    }

    let Some(current) = scans::get_scan_by_uuid(&ctx.db, scan_uuid).await? else {
        return Ok(None);
    };

    if current.status.is_terminal() {
        drain_output(ctx, scan_uuid).await;
        if current.status == ScanStatus::Completed {
            process_results(ctx, scan_uuid).await;
        }
        publish_status(ctx, scan_uuid, &current).await;
        publish_final_progress(ctx, scan_uuid, current.status).await;
    }

    Ok(Some(current))
}

/// Final progress tick so client progress bars always reach 100%.
async fn publish_final_progress(ctx: &WatcherContext, scan_uuid: Uuid, status: ScanStatus) {
    if !status.is_terminal() {
        return;
    }
    if let Err(e) = ctx
        .kvb
        .publish(&keys::progress_channel(scan_uuid), "100")
        .await
    {
        warn!(%scan_uuid, error = ?e, "failed to publish final progress");
    }
}

/// Cache the latest numeric progress value for GETs and the list stream.
async fn cache_progress(ctx: &WatcherContext, scan_uuid: Uuid, payload: &str) {
    match payload.trim().parse::<f64>() {
        Ok(value) => {
            ctx.kvb
                .set_string_ex(
                    &keys::scan_progress(scan_uuid),
                    &value.to_string(),
                    PROGRESS_CACHE_TTL_SECS,
                )
                .await;
        }
        Err(_) => {
            warn!(%scan_uuid, payload, "ignoring non-numeric progress payload");
        }
    }
}

/// Move the accumulated output ring into the scan row and drop the ring.
async fn drain_output(ctx: &WatcherContext, scan_uuid: Uuid) {
    let key = keys::scan_output(scan_uuid);
    let lines = ctx.kvb.list_range(&key).await;
    if lines.is_empty() {
        return;
    }

    match scans::set_scan_output(&ctx.db, scan_uuid, &lines.join("\n")).await {
        Ok(()) => {
            ctx.kvb.delete(&key).await;
            info!(%scan_uuid, line_count = lines.len(), "stored final scan output");
        }
        Err(e) => {
            error!(%scan_uuid, error = ?e, "failed to store final scan output");
        }
    }
}

/// Ingest the structured result blob: store it raw, classify findings and
/// commit both in one transaction. Failures leave the scan completed with
/// zero findings.
async fn process_results(ctx: &WatcherContext, scan_uuid: Uuid) {
    let results_key = keys::scan_results(scan_uuid);
    let Some(raw) = ctx.kvb.get_string(&results_key).await else {
        info!(%scan_uuid, "no result blob present");
        return;
    };

    let drafts = match classifier::parse_hosts(&raw) {
        Ok(hosts) => classifier::classify(&hosts),
        Err(e) => {
            error!(%scan_uuid, error = %e, "unreadable result blob, storing raw with zero findings");
            Vec::new()
        }
    };

    match findings::ingest_scan_results(&ctx.db, scan_uuid, &raw, &drafts).await {
        Ok(inserted) => {
            info!(%scan_uuid, inserted, "scan results ingested");
            ctx.kvb.delete(&results_key).await;
        }
        Err(e) => {
            error!(%scan_uuid, error = ?e, "failed to ingest scan results");
        }
    }
}

async fn publish_status(ctx: &WatcherContext, scan_uuid: Uuid, scan: &Scan) {
    let event = StatusEvent {
        status: scan.status,
        started_at: scan.started_at,
        finished_at: scan.finished_at,
    };
    let payload = match serde_json::to_string(&event) {
        Ok(payload) => payload,
        Err(e) => {
            error!(%scan_uuid, error = %e, "failed to serialize status event");
            return;
        }
    };

    if let Err(e) = ctx
        .kvb
        .publish(&keys::status_channel(scan_uuid), &payload)
        .await
    {
        warn!(%scan_uuid, error = ?e, "failed to publish status event");
    }
}
