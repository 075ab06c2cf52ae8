// Admin HTTP surface
//
// Thin translator from /api/<namespace> to the Administrable contract.
// GET with an empty or global path returns the whole service config;
// POST/PUT/DELETE map to add/update/delete. Engine rejections surface as
// JSON {error, status}.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::config::{NamespaceConfig, GLOBAL_NAMESPACE};
use crate::service::Administrable;

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
    status: u16,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(ApiError {
            error,
            status: status.as_u16(),
        }),
    )
        .into_response()
}

/// Build the admin router for any [`Administrable`] implementation.
pub fn router<A: Administrable>(admin: Arc<A>) -> Router {
    Router::new()
        .route("/api", any(handle_root::<A>))
        .route("/api/", any(handle_root::<A>))
        .route("/api/:namespace", any(handle_namespace::<A>))
        .with_state(admin)
}

/// Start the admin HTTP server.
pub async fn start_admin_server<A: Administrable>(admin: Arc<A>, port: u16) -> Result<()> {
    let app = router(admin);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting admin server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind admin server")?;

    axum::serve(listener, app)
        .await
        .context("Admin server error")?;

    Ok(())
}

async fn handle_root<A: Administrable>(
    State(admin): State<Arc<A>>,
    method: Method,
    body: Bytes,
) -> Response {
    serve(admin, method, String::new(), body).await
}

async fn handle_namespace<A: Administrable>(
    State(admin): State<Arc<A>>,
    method: Method,
    Path(namespace): Path<String>,
    body: Bytes,
) -> Response {
    serve(admin, method, namespace, body).await
}

async fn serve<A: Administrable>(
    admin: Arc<A>,
    method: Method,
    namespace: String,
    body: Bytes,
) -> Response {
    if method == Method::GET {
        let configs = admin.configs().await;
        if namespace.is_empty() || namespace == GLOBAL_NAMESPACE {
            return Json(configs).into_response();
        }
        match configs.namespaces.get(&namespace) {
            Some(ns) => Json(ns).into_response(),
            None => error_response(
                StatusCode::NOT_FOUND,
                format!("Unable to locate namespace {namespace}"),
            ),
        }
    } else if method == Method::DELETE {
        match admin.delete_namespace(&namespace).await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    } else if method == Method::POST || method == Method::PUT {
        let cfg: NamespaceConfig = match serde_json::from_slice(&body) {
            Ok(cfg) => cfg,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        let result = if method == Method::POST {
            admin.add_namespace(&namespace, cfg).await
        } else {
            admin.update_namespace(&namespace, cfg).await
        };
        match result {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    } else {
        error_response(StatusCode::BAD_REQUEST, format!("Unknown method {method}"))
    }
}
