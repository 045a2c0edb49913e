//! Live-stream fan-out for connected WebSocket clients.
//!
//! The per-scan stream subscribes to a scan's three bus channels and relays
//! tagged frames to the client, deduplicating output and flushing buffered
//! output lines to the scan row. The scan-list stream is a heartbeat loop
//! that aggregates lightweight status for the scan-list page.
//!
//! Gateways never transition scan status, and never write output once the
//! scan is terminal; the watcher owns the final flush.

pub(crate) mod dedupe;

use std::time::Duration;

use actix_ws::{Message, MessageStream, Session};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use sqlx::{Pool, Postgres};
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::scans::models::{ScanStateEnvelope, ScanStatus, StatusEvent};
use crate::storage::kvb::{KvbClient, keys};
use crate::storage::postgres::scans;
use dedupe::DedupeWindow;

/// Buffered output is flushed at this many lines, or on the flush tick,
/// whichever comes first.
const OUTPUT_FLUSH_MAX_LINES: usize = 20;
const OUTPUT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Refresh cadence of the scan-list stream.
const LIST_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub(crate) struct GatewayContext {
    pub db: Pool<Postgres>,
    pub kvb: KvbClient,
}

/// Server→client frame envelope. Exactly one variant per message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamFrame {
    Progress {
        value: f64,
    },
    Status {
        value: ScanStatus,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    },
    Output {
        value: String,
    },
    ScanUpdate {
        scan_uuid: Uuid,
        status: Option<String>,
        progress: Option<f64>,
        finished_at: Option<String>,
        started_at: Option<DateTime<Utc>>,
        name: String,
    },
}

/// Relay one scan's bus channels to a connected client until it hangs up.
pub(crate) async fn run_scan_stream(
    mut session: Session,
    mut msg_stream: MessageStream,
    ctx: GatewayContext,
    scan_uuid: Uuid,
) {
    let channels = vec![
        keys::output_channel(scan_uuid),
        keys::progress_channel(scan_uuid),
        keys::status_channel(scan_uuid),
    ];
    let mut pubsub = match ctx.kvb.subscribe(&channels).await {
        Ok(pubsub) => pubsub,
        Err(e) => {
            error!(%scan_uuid, error = ?e, "failed to subscribe stream client");
            let _ = session.close(None).await;
            return;
        }
    };
    info!(%scan_uuid, "stream client subscribed");

    let progress_channel = keys::progress_channel(scan_uuid);
    let status_channel = keys::status_channel(scan_uuid);

    let mut dedupe = DedupeWindow::default();
    let mut buffer: Vec<String> = Vec::new();
    let mut flush_timer = interval(OUTPUT_FLUSH_INTERVAL);

    {
        let mut bus = pubsub.on_message();
        loop {
            tokio::select! {
                bus_msg = bus.next() => {
                    let Some(msg) = bus_msg else { break };
                    let channel = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(_) => continue,
                    };

                    let frame = if channel == progress_channel {
                        parse_progress_frame(scan_uuid, &payload)
                    } else if channel == status_channel {
                        parse_status_frame(scan_uuid, &payload)
                    } else {
                        if !dedupe.insert(&payload) {
                            continue;
                        }
                        buffer.push(payload.clone());
                        if buffer.len() >= OUTPUT_FLUSH_MAX_LINES {
                            flush_output(&ctx, scan_uuid, &mut buffer).await;
                            flush_timer.reset();
                        }
                        Some(StreamFrame::Output { value: payload })
                    };

                    if let Some(frame) = frame {
                        if send_frame(&mut session, &frame).await.is_err() {
                            break;
                        }
                    }
                }
                client_msg = msg_stream.recv() => {
                    match client_msg {
                        Some(Ok(Message::Ping(bytes))) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(%scan_uuid, error = %e, "websocket protocol error");
                            break;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    flush_output(&ctx, scan_uuid, &mut buffer).await;
                }
            }
        }
    }

    flush_output(&ctx, scan_uuid, &mut buffer).await;
    let _ = session.close(None).await;
    info!(%scan_uuid, "stream client disconnected");
}

fn parse_progress_frame(scan_uuid: Uuid, payload: &str) -> Option<StreamFrame> {
    match payload.trim().parse::<f64>() {
        Ok(value) => Some(StreamFrame::Progress { value }),
        Err(_) => {
            warn!(%scan_uuid, payload, "dropping non-numeric progress payload");
            None
        }
    }
}

fn parse_status_frame(scan_uuid: Uuid, payload: &str) -> Option<StreamFrame> {
    match serde_json::from_str::<StatusEvent>(payload) {
        Ok(event) => Some(StreamFrame::Status {
            value: event.status,
            started_at: event.started_at,
            finished_at: event.finished_at,
        }),
        Err(e) => {
            warn!(%scan_uuid, error = %e, "dropping non-JSON status payload");
            None
        }
    }
}

/// Append buffered output lines to the scan row. Skipped entirely once the
/// scan is terminal on the bus or frozen in the database.
async fn flush_output(ctx: &GatewayContext, scan_uuid: Uuid, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }

    let envelope = ctx
        .kvb
        .get_json::<ScanStateEnvelope>(&keys::scan_state(scan_uuid))
        .await;
    if let Some(envelope) = envelope {
        let terminal = envelope
            .status
            .parse::<ScanStatus>()
            .map(ScanStatus::is_terminal)
            .unwrap_or(false);
        if terminal {
            buffer.clear();
            return;
        }
    }

    let mut chunk = buffer.join("\n");
    chunk.push('\n');
    match scans::append_scan_output(&ctx.db, scan_uuid, &chunk).await {
        Ok(_) => buffer.clear(),
        Err(e) => {
            // Keep the buffer; the next tick retries.
            warn!(%scan_uuid, error = ?e, "output flush failed");
        }
    }
}

/// Emit periodic `scan_update` frames for the user's non-pending,
/// non-completed scans. Read-only: no subscriptions, no database writes.
pub(crate) async fn run_scan_list_stream(
    mut session: Session,
    mut msg_stream: MessageStream,
    ctx: GatewayContext,
    oidc_sub: String,
) {
    let mut refresh = interval(LIST_REFRESH_INTERVAL);

    'stream: loop {
        tokio::select! {
            _ = refresh.tick() => {
                let scans = match scans::get_streaming_scans(&ctx.db, &oidc_sub).await {
                    Ok(scans) => scans,
                    Err(e) => {
                        warn!(error = ?e, "scan list query failed");
                        continue;
                    }
                };

                for scan in scans {
                    let envelope = ctx
                        .kvb
                        .get_json::<ScanStateEnvelope>(&keys::scan_state(scan.uuid))
                        .await;
                    let progress = ctx
                        .kvb
                        .get_string(&keys::scan_progress(scan.uuid))
                        .await
                        .and_then(|p| p.parse::<f64>().ok());

                    let frame = StreamFrame::ScanUpdate {
                        scan_uuid: scan.uuid,
                        status: envelope.as_ref().map(|e| e.status.clone()),
                        progress,
                        finished_at: envelope.and_then(|e| e.finished_at),
                        started_at: scan.started_at,
                        name: scan.name,
                    };
                    if send_frame(&mut session, &frame).await.is_err() {
                        break 'stream;
                    }
                }
            }
            client_msg = msg_stream.recv() => {
                match client_msg {
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break 'stream;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break 'stream,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket protocol error");
                        break 'stream;
                    }
                }
            }
        }
    }

    let _ = session.close(None).await;
}

async fn send_frame(session: &mut Session, frame: &StreamFrame) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(frame) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            error!(error = %e, "failed to serialize stream frame");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_frame_shape() {
        let frame = parse_progress_frame(Uuid::nil(), "42.5").unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["value"], 42.5);
    }

    #[test]
    fn test_non_numeric_progress_dropped() {
        assert!(parse_progress_frame(Uuid::nil(), "almost done").is_none());
    }

    #[test]
    fn test_progress_boundaries_accepted() {
        assert!(parse_progress_frame(Uuid::nil(), "0").is_some());
        assert!(parse_progress_frame(Uuid::nil(), "100").is_some());
    }

    #[test]
    fn test_status_frame_shape() {
        let payload =
            r#"{"status":"running","started_at":"2024-01-01T00:00:00Z","finished_at":null}"#;
        let frame = parse_status_frame(Uuid::nil(), payload).unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["value"], "running");
        assert!(
            json["started_at"]
                .as_str()
                .unwrap()
                .starts_with("2024-01-01T00:00:00")
        );
        assert!(json["finished_at"].is_null());
    }

    #[test]
    fn test_non_json_status_dropped() {
        assert!(parse_status_frame(Uuid::nil(), "running").is_none());
    }

    #[test]
    fn test_output_frame_shape() {
        let frame = StreamFrame::Output {
            value: "Scanning 80/tcp".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "output");
        assert_eq!(json["value"], "Scanning 80/tcp");
    }

    #[test]
    fn test_scan_update_frame_shape() {
        let frame = StreamFrame::ScanUpdate {
            scan_uuid: Uuid::nil(),
            status: Some("running".to_string()),
            progress: Some(55.0),
            finished_at: None,
            started_at: None,
            name: "Assessment no. 3".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "scan_update");
        assert_eq!(json["status"], "running");
        assert_eq!(json["progress"], 55.0);
        assert_eq!(json["name"], "Assessment no. 3");
    }
}
