use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use lasca_core::{Id, Namespace};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateNamespaceBody {
    name: String,
}

/// `POST /ns` — create a namespace on the main shard.
#[instrument(skip_all)]
pub(crate) async fn create_namespace(
    State(state): State<AppState>,
    Json(body): Json<CreateNamespaceBody>,
) -> Result<Response, ApiError> {
    let mut item = Namespace {
        id: Id::default(),
        name: body.name,
    };
    state.namespaces.save(&state.main_shard, &mut item).await?;

    Ok(Json(json!({"id": item.id, "name": item.name})).into_response())
}

/// `GET /ns` — list namespaces (bounded).
#[instrument(skip_all)]
pub(crate) async fn get_namespaces(State(state): State<AppState>) -> Result<Response, ApiError> {
    let items = state.namespaces.find_all(&state.main_shard, None).await?;

    let namespaces: Vec<_> = items
        .iter()
        .map(|ns| json!({"namespace": ns.id, "name": ns.name}))
        .collect();
    Ok(Json(json!({"namespaces": namespaces})).into_response())
}
