//! Admin listener: list all mappings and set a single one.
//!
//! `GET /stems` returns every mapping as a JSON object.
//! `PUT /stems/<stem>` stores the trimmed request body as the destination.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::blocking;
use crate::error::ServerError;
use crate::store::StemStore;

/// Shortest destination accepted, in characters after trimming
pub const MIN_DESTINATION_LEN: usize = 4;

/// Mappings buffered between the scanning thread and the handler
const SCAN_BUFFER: usize = 64;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Build the admin router
pub fn router(store: Arc<StemStore>) -> Router {
    Router::new()
        .route("/stems", get(list_stems))
        .route("/stems/*stem", put(set_stem))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn list_stems(State(store): State<Arc<StemStore>>) -> Response {
    let (tx, rx) = mpsc::channel(SCAN_BUFFER);
    let producer = tokio::task::spawn_blocking(move || store.get_stems(tx));

    // The scan keeps its snapshot open until this loop has drained it
    let mut mappings = ReceiverStream::new(rx);
    let mut stems = BTreeMap::new();
    while let Some(mapping) = mappings.next().await {
        stems.insert(mapping.stem, mapping.destination);
    }

    let scanned = match producer.await {
        Ok(result) => result.map_err(ServerError::from),
        Err(e) => Err(ServerError::from(e)),
    };
    if let Err(e) = scanned {
        error!(error = %e, "error listing stems");
        return internal_error();
    }

    match serde_json::to_vec(&stems) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "error encoding stems");
            internal_error()
        }
    }
}

async fn set_stem(
    State(store): State<Arc<StemStore>>,
    Path(stem): Path<String>,
    body: Body,
) -> Response {
    let body: Bytes = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            error!(stem, error = %e, "error reading body");
            return internal_error();
        }
    };

    let destination = String::from_utf8_lossy(&body).trim().to_string();
    if destination.chars().count() < MIN_DESTINATION_LEN {
        return (
            StatusCode::NOT_ACCEPTABLE,
            "body must contain destination URL",
        )
            .into_response();
    }

    let (key, value) = (stem.clone(), destination.clone());
    match blocking(move || store.set_destination(&key, &value)).await {
        Ok(()) => {
            info!(stem, destination, "destination set");
            (StatusCode::CREATED, "Created").into_response()
        }
        Err(e) => {
            error!(stem, error = %e, "error storing destination");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response()
}
