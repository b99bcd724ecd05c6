use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{instrument, warn};

use lasca_core::{AckNackRequest, BackoffStrategy, EnqueueRequest, Id, Message};

use crate::error::ApiError;
use crate::state::AppState;

/// How long an enqueue handler waits for its worker reply.
const ENQUEUE_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

// Local backoff between buffer polls while a dequeue request waits for
// messages to show up.
const DEQUEUE_POLL_BASE: Duration = Duration::from_millis(50);
const DEQUEUE_POLL_CAP: Duration = Duration::from_secs(1);
const DEQUEUE_POLL_FACTOR: f32 = 2.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnqueueBody {
    namespace: String,
    topic: String,
    #[serde(default)]
    priority: u32,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    deliver_after_seconds: u64,
    #[serde(default)]
    ttl_seconds: u64,
}

/// `POST /message/enqueue` — resolve the namespace, hand the message to
/// the worker mesh through the shared channel, and wait for the reply.
#[instrument(skip_all, fields(topic = %body.topic))]
pub(crate) async fn enqueue(
    State(state): State<AppState>,
    Json(body): Json<EnqueueBody>,
) -> Result<Response, ApiError> {
    let namespace = state
        .namespaces
        .cached_find_by_string_id(&state.main_shard, &body.namespace)
        .await?
        .ok_or(ApiError::InvalidNamespace)?;

    let message = Message {
        id: Id::default(),
        topic: body.topic,
        priority: body.priority,
        namespace_id: namespace.id,
        payload: body.payload.into_bytes(),
        metadata: body.metadata.into_bytes(),
        deliver_after: Duration::from_secs(body.deliver_after_seconds),
        ttl: Duration::from_secs(body.ttl_seconds),
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .enqueue_tx
        .send(EnqueueRequest {
            message,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ApiError::Internal("enqueue channel is closed".to_string()))?;

    match tokio::time::timeout(ENQUEUE_REPLY_TIMEOUT, reply_rx).await {
        Err(_) => Err(ApiError::Timeout),
        Ok(Err(_)) => Err(ApiError::Internal(
            "enqueue worker dropped the reply".to_string(),
        )),
        Ok(Ok(Err(e))) => Err(ApiError::from(e)),
        Ok(Ok(Ok(msg_id))) => Ok((
            StatusCode::CREATED,
            Json(json!({"status": "created", "msgId": msg_id})),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DequeueBody {
    namespace: String,
    topic: String,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    timeout_seconds: u64,
}

#[derive(Debug, Serialize)]
struct MessageDto {
    id: Id,
    topic: String,
    namespace: String,
    priority: u32,
    payload: String,
    metadata: String,
}

/// `POST /message/dequeue` — poll the prefetch buffer until at least one
/// message arrives or the client deadline elapses.
#[instrument(skip_all, fields(topic = %body.topic))]
pub(crate) async fn dequeue(
    State(state): State<AppState>,
    Json(body): Json<DequeueBody>,
) -> Result<Response, ApiError> {
    let timeout = match body.timeout_seconds {
        0 => DEFAULT_DEQUEUE_TIMEOUT,
        secs => Duration::from_secs(secs).max(MIN_DEQUEUE_TIMEOUT),
    };
    let deadline = Instant::now() + timeout;
    let limit = (body.limit > 0).then_some(body.limit);

    let mut poll_backoff =
        BackoffStrategy::new(DEQUEUE_POLL_BASE, DEQUEUE_POLL_FACTOR, DEQUEUE_POLL_CAP);
    loop {
        let messages = state.prefetch_buf.get_items(&body.topic, limit).await?;
        if !messages.is_empty() {
            let messages: Vec<MessageDto> = messages
                .into_iter()
                .map(|m| message_dto(m, &body.namespace))
                .collect();
            return Ok(Json(json!({"messages": messages})).into_response());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok((StatusCode::NOT_FOUND, Json(json!({"messages": []}))).into_response());
        }
        poll_backoff.backoff();
        tokio::time::sleep(poll_backoff.delay().min(remaining)).await;
    }
}

fn message_dto(message: Message, namespace: &str) -> MessageDto {
    MessageDto {
        id: message.id,
        topic: message.topic,
        namespace: namespace.to_string(),
        priority: message.priority,
        payload: String::from_utf8_lossy(&message.payload).into_owned(),
        metadata: String::from_utf8_lossy(&message.metadata).into_owned(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AckItemBody {
    id: String,
    ack: bool,
}

/// `POST /message/ack` — route each acknowledgement to the worker owning
/// the message's shard. Per-id parse and routing failures are logged and
/// skipped.
#[instrument(skip_all, fields(count = items.len()))]
pub(crate) async fn ack(
    State(state): State<AppState>,
    Json(items): Json<Vec<AckItemBody>>,
) -> StatusCode {
    for item in items {
        let id = match Id::parse(&item.id) {
            Ok(id) => id,
            Err(e) => {
                warn!(id = %item.id, error = %e, "skipping unparsable ack id");
                continue;
            }
        };
        if let Err(e) = state
            .acknack_router
            .route(AckNackRequest { id, ack: item.ack })
            .await
        {
            warn!(id = %item.id, error = %e, "could not route ack/nack request");
        }
    }
    StatusCode::OK
}
