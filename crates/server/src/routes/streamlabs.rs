//! Remote-control routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use scenerelay_client::ConnectorError;
use serde::Deserialize;

use crate::state::AppState;

pub const RUNNING_TEXT: &str = "Scene relay running";

#[derive(Debug, Default, Deserialize)]
pub struct ActivateSceneRequest {
    #[serde(default)]
    pub scene: Option<String>,
}

/// Map a connector failure onto an HTTP status with a plain-text body.
fn error_response(err: ConnectorError) -> (StatusCode, String) {
    if err.is_not_found() {
        return (StatusCode::NOT_FOUND, err.to_string());
    }
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Ensure the connector is connected
pub async fn status(State(state): State<AppState>) -> Result<&'static str, (StatusCode, String)> {
    state.connector.connect().await.map_err(|e| {
        tracing::error!("Failed to connect to the remote: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to connect to the remote: {}", e),
        )
    })?;
    Ok(RUNNING_TEXT)
}

/// Names of the mirrored scenes, in remote order
pub async fn get_scenes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.connector.scene_names())
}

/// A request without a JSON body is treated as naming no scene
pub async fn activate_scene(
    State(state): State<AppState>,
    payload: Option<Json<ActivateSceneRequest>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let scene = payload.and_then(|Json(payload)| payload.scene);
    switch_to(&state, scene).await
}

/// Same as [`activate_scene`] with the name in `?scene=`
pub async fn activate_scene_query(
    State(state): State<AppState>,
    Query(query): Query<ActivateSceneRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    switch_to(&state, query.scene).await
}

async fn switch_to(state: &AppState, scene: Option<String>) -> Result<StatusCode, (StatusCode, String)> {
    let scene = scene.unwrap_or_default();
    match state.connector.switch_scene(&scene).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => {
            if e.is_not_found() {
                tracing::debug!("No scene named {:?}", scene);
            } else {
                tracing::error!("Failed to activate scene {:?}: {}", scene, e);
            }
            Err(error_response(e))
        }
    }
}
