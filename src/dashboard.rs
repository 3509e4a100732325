//! `warp` integration for serving the Inspector dashboard over HTTP and websocket.

use std::borrow::Cow;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use http::StatusCode;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::inspector::Inspector;

const RECENT_MESSAGES_LIMIT: usize = 100;
const INDEX_HTML: &str = include_str!("../static/dashboard.html");

/// Converts the inspector into a [`warp`](https://docs.rs/warp) filter serving the
/// dashboard's static page, its JSON polling endpoints, and the `/ws` live feed.
pub fn to_filter(inspector: Arc<Inspector>) -> impl Filter<Extract = impl Reply> + Clone + 'static {
    let inspector = warp::any().map(move || inspector.clone());

    let index = warp::get()
        .and(warp::path::end())
        .map(|| warp::reply::html(INDEX_HTML));

    let messages = warp::get()
        .and(warp::path!("api" / "messages"))
        .and(inspector.clone())
        .and_then(|insp: Arc<Inspector>| async move {
            let (messages, metrics) = insp.recent_messages(RECENT_MESSAGES_LIMIT).await;
            Ok::<_, Rejection>(warp::reply::json(&MessagesResponse { messages, metrics }))
        });

    let metrics = warp::get()
        .and(warp::path!("api" / "metrics"))
        .and(inspector.clone())
        .and_then(|insp: Arc<Inspector>| async move {
            let mcp_metrics = insp.get_metrics().await;
            let system_metrics = insp.get_system_metrics();
            Ok::<_, Rejection>(warp::reply::json(&MetricsResponse { mcp_metrics, system_metrics }))
        });

    let clear = warp::post()
        .and(warp::path!("api" / "clear"))
        .and(inspector.clone())
        .and_then(|insp: Arc<Inspector>| async move {
            insp.clear().await;
            Ok::<_, Rejection>(warp::reply::json(&StatusResponse { status: "cleared" }))
        });

    let toggle_recording = warp::post()
        .and(warp::path!("api" / "toggle_recording"))
        .and(inspector.clone())
        .and_then(|insp: Arc<Inspector>| async move {
            let recording = insp.toggle_recording().await;
            Ok::<_, Rejection>(warp::reply::json(&RecordingResponse { recording }))
        });

    let ws = warp::path("ws")
        .and(warp::ws())
        .and(inspector.clone())
        .map(|ws: warp::ws::Ws, insp: Arc<Inspector>| {
            ws.on_upgrade(move |socket| handle_socket(socket, insp))
        });

    (index.or(messages).or(metrics).or(clear).or(toggle_recording).or(ws)).recover(handle_rejection)
}

/// Streams every subsequent `Inspector::log` event to `socket` until the client disconnects.
/// Nothing is replayed on connect; `/api/messages` covers backfill.
async fn handle_socket(socket: WebSocket, inspector: Arc<Inspector>) {
    let (mut tx, mut rx) = socket.split();
    let (feed_tx, feed_rx) = mpsc::unbounded_channel::<String>();
    inspector.subscribe(feed_tx).await;

    let mut feed_rx = UnboundedReceiverStream::new(feed_rx);
    let forward = async {
        while let Some(text) = feed_rx.next().await {
            if tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    };

    // Drain and discard anything the client sends; this is a read-only broadcast feed, but
    // the socket must still be polled or the connection never registers a client-initiated
    // close.
    let drain = async {
        while rx.next().await.is_some() {}
    };

    tokio::select! {
        _ = forward => {}
        _ = drain => {}
    }
}

#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<crate::types::RpcEvent>,
    metrics: crate::types::PerformanceMetrics,
}

#[derive(Serialize)]
struct MetricsResponse {
    mcp_metrics: crate::types::PerformanceMetrics,
    system_metrics: crate::types::SystemMetrics,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct RecordingResponse {
    recording: bool,
}

#[derive(Serialize)]
struct ErrorMsg<'a> {
    code: u16,
    message: Cow<'a, str>,
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let code;
    let message;

    if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = Cow::from("Not found");
    } else {
        tracing::warn!(?err, "unhandled dashboard rejection");
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = Cow::from("UNHANDLED_REJECTION");
    }

    let json = warp::reply::json(&ErrorMsg {
        code: code.as_u16(),
        message,
    });

    Ok(warp::reply::with_status(json, code))
}
