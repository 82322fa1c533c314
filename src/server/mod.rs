//! HTTP personality (§6): `POST /add`, `GET /checkpoint`, `GET
//! /tile/{level}/{index...}`, `GET /tile/entries/{index...}`, plus
//! `/metrics`, mounted on shared [`App`] state.

pub mod data;
pub mod error;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::layout::{self, TileId};

use self::data::parse_index_path;
use self::error::Error;

/// Builds the router; callers bind it to a listener and drive it with
/// `axum::serve(..).with_graceful_shutdown(..)`.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/add", post(add_entry))
        .route("/checkpoint", get(checkpoint))
        .route("/tile/entries/{*index}", get(entry_bundle))
        .route("/tile/{level}/{*index}", get(hash_tile))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(app)
}

async fn add_entry(State(app): State<Arc<App>>, body: Bytes) -> Result<String, Error> {
    let (index, _duplicate) = app.add(body.to_vec()).await?;
    Ok(index.to_string())
}

async fn checkpoint(State(app): State<Arc<App>>) -> Result<Response, Error> {
    let checkpoint = app.storage.read_checkpoint().await?;
    Ok(([(header::CACHE_CONTROL, "no-cache")], checkpoint.note).into_response())
}

async fn hash_tile(
    State(app): State<Arc<App>>,
    Path((level, index)): Path<(u8, String)>,
) -> Result<Response, Error> {
    let (tile_index, partial) = parse_index_path(&index)?;
    let requested = partial.unwrap_or(layout::TILE_WIDTH);
    let tile = app
        .storage
        .read_tile(TileId::new(level, tile_index), requested)
        .await?;

    let mut bytes = Vec::with_capacity(tile.bottom_row().len() * 32);
    for hash in tile.bottom_row() {
        bytes.extend_from_slice(hash.as_bytes());
    }
    Ok(immutable_response(bytes))
}

async fn entry_bundle(State(app): State<Arc<App>>, Path(index): Path<String>) -> Result<Response, Error> {
    let (bundle_index, partial) = parse_index_path(&index)?;
    let requested = partial.unwrap_or(layout::ENTRY_BUNDLE_WIDTH);
    let bundle = app.storage.read_entry_bundle(bundle_index, requested).await?;
    Ok(immutable_response(bundle.as_bytes().to_vec()))
}

async fn metrics(State(app): State<Arc<App>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        app.metrics.render(),
    )
}

/// Sealed tiles and bundles never change content for a given index; once a
/// client has one it can cache it forever.
fn immutable_response(bytes: Vec<u8>) -> Response {
    ([(header::CACHE_CONTROL, "public, max-age=31536000, immutable")], bytes).into_response()
}
