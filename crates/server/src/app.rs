//! HTTP router.

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/streamlabs", get(routes::streamlabs::status))
        .route("/streamlabs/getScenes", get(routes::streamlabs::get_scenes))
        .route(
            "/streamlabs/activateScene",
            get(routes::streamlabs::activate_scene_query).post(routes::streamlabs::activate_scene),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use scenerelay_client::testing::FakeStudio;
    use scenerelay_client::{Connector, ConnectorConfig};
    use scenerelay_shared::{MAKE_SCENE_ACTIVE, STUDIO_MODE_TRANSITION};
    use serde_json::json;
    use tower::ServiceExt;

    const TOKEN: &str = "secret";

    fn studio() -> FakeStudio {
        let studio = FakeStudio::new(TOKEN);
        studio.add_scene(1, "A");
        studio.add_scene(2, "B");
        studio.set_active_scene(1);
        studio
    }

    fn connector(studio: &FakeStudio) -> Connector {
        Connector::new(ConnectorConfig::default().with_token(TOKEN), studio.clone())
    }

    async fn connected(studio: &FakeStudio) -> Router {
        let connector = connector(studio);
        connector.connect().await.unwrap();
        router(AppState::new(connector))
    }

    async fn send(app: Router, request: Request<Body>) -> Response {
        app.oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn get_scenes_lists_names_in_order() {
        let studio = studio();
        let app = connected(&studio).await;

        let response = send(app, get("/streamlabs/getScenes")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let names: Vec<String> = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn get_scenes_is_empty_while_disconnected() {
        let studio = studio();
        let app = router(AppState::new(connector(&studio)));

        let response = send(app, get("/streamlabs/getScenes")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "[]");
    }

    #[tokio::test]
    async fn activate_unknown_scene_is_not_found() {
        let studio = studio();
        let app = connected(&studio).await;

        let response = send(app, post_json("/streamlabs/activateScene", json!({"scene": "Z"}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(studio.requests_for(MAKE_SCENE_ACTIVE).is_empty());
    }

    #[tokio::test]
    async fn activate_scene_issues_switch_then_transition() {
        let studio = studio();
        let app = connected(&studio).await;
        let before = studio.requests().len();

        let response = send(app, post_json("/streamlabs/activateScene", json!({"scene": "B"}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");

        let methods: Vec<String> = studio.requests()[before..]
            .iter()
            .map(|r| r.method.clone())
            .filter(|m| m == MAKE_SCENE_ACTIVE || m == STUDIO_MODE_TRANSITION)
            .collect();
        assert_eq!(methods, vec![MAKE_SCENE_ACTIVE, STUDIO_MODE_TRANSITION]);
        assert_eq!(studio.active_scene_id(), json!(2));
    }

    #[tokio::test]
    async fn activate_scene_without_body_is_not_found() {
        let studio = studio();
        let app = connected(&studio).await;

        let request = Request::builder()
            .method("POST")
            .uri("/streamlabs/activateScene")
            .body(Body::empty())
            .unwrap();
        let response = send(app.clone(), request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(app, post_json("/streamlabs/activateScene", json!({}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(studio.requests_for(MAKE_SCENE_ACTIVE).is_empty());
    }

    #[tokio::test]
    async fn activate_scene_accepts_query_parameter() {
        let studio = studio();
        let app = connected(&studio).await;

        let response = send(app.clone(), get("/streamlabs/activateScene?scene=B")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(studio.requests_for(MAKE_SCENE_ACTIVE).len(), 1);

        let response = send(app, get("/streamlabs/activateScene")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn activate_scene_reports_remote_failure() {
        let studio = studio();
        studio.fail(MAKE_SCENE_ACTIVE, json!({"code": -32000, "message": "busy"}));
        let app = connected(&studio).await;

        let response = send(app, post_json("/streamlabs/activateScene", json!({"scene": "B"}))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("busy"));
        assert!(studio.requests_for(STUDIO_MODE_TRANSITION).is_empty());
    }

    #[tokio::test]
    async fn status_connects_on_demand() {
        let studio = studio();
        studio.refuse_connections(true);
        let connector = connector(&studio);
        let app = router(AppState::new(connector.clone()));

        let response = send(app.clone(), get("/streamlabs")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        studio.refuse_connections(false);
        let response = send(app, get("/streamlabs")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, routes::streamlabs::RUNNING_TEXT);
        assert!(connector.state().is_connected());
    }
}
