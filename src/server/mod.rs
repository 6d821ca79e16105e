pub mod api;
pub mod handlers;
pub mod state;

use axum::{http::Method, response::Redirect, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::layout::ProjectLayout;
use crate::server::state::AppState;

/// Dashboard routes: the JSON API under `/api`, everything else served
/// from the base directory
pub fn router(layout: ProjectLayout) -> Router {
    let serve_dir = ServeDir::new(layout.base_dir());
    let state = Arc::new(AppState::new(layout));

    let api_routes = Router::new()
        .route("/candidates", get(handlers::get_candidates))
        .route("/verified", get(handlers::get_verified))
        .route("/manifest", get(handlers::get_manifest))
        .with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/web/index.html") }))
        .nest("/api", api_routes)
        .fallback_service(serve_dir)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

pub async fn run_server(layout: ProjectLayout, host: String, port: u16) -> anyhow::Result<()> {
    let base_dir = layout.base_dir().display().to_string();
    let app = router(layout);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;

    tracing::info!("Server listening on http://{}:{}", host, port);
    tracing::info!("Serving files from: {}", base_dir);
    println!("Dashboard: http://{}:{}/web/index.html", host, port);
    println!("Press Ctrl+C to stop the server");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ManifestRow;
    use crate::tables::write_table;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_redirects_to_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(ProjectLayout::new(dir.path()))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/web/index.html");
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(ProjectLayout::new(dir.path()));
        let (status, body) = get_json(app, "/api/candidates").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("ranked_candidates.csv"));
    }

    #[tokio::test]
    async fn test_manifest_is_served_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let rows = vec![ManifestRow {
            file: "data/products/a_i2d.fits".into(),
            obs_id: "jw01".into(),
            instrument: "NIRCAM".into(),
            filter: "F200W".into(),
            product_type: "I2D".into(),
            calib_level: 3,
            size_gb: 0.25,
        }];
        write_table(&layout.manifest_path(), &rows).unwrap();

        let (status, body) = get_json(router(layout), "/api/manifest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][0]["obs_id"], "jw01");
    }

    #[tokio::test]
    async fn test_static_files_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("web")).unwrap();
        std::fs::write(dir.path().join("web/index.html"), "<h1>dash</h1>").unwrap();
        let response = router(ProjectLayout::new(dir.path()))
            .oneshot(Request::builder().uri("/web/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
