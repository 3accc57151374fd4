//! Public redirect listener: `/<stem>` answers 302 to the stored destination,
//! or 418 when the stem has no mapping.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use super::blocking;
use crate::store::StemStore;

/// Build the redirector router.
///
/// `read_timeout` bounds receiving the request body (the header deadline is
/// enforced by the listener), `write_timeout` bounds producing the response.
/// The method is not inspected.
pub fn router(store: Arc<StemStore>, read_timeout: Duration, write_timeout: Duration) -> Router {
    Router::new()
        .route("/", any(redirect_root))
        .route("/*stem", any(redirect))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(write_timeout))
        .layer(RequestBodyTimeoutLayer::new(read_timeout))
        .with_state(store)
}

async fn redirect_root(State(store): State<Arc<StemStore>>) -> Response {
    resolve(store, String::new()).await
}

async fn redirect(State(store): State<Arc<StemStore>>, Path(stem): Path<String>) -> Response {
    resolve(store, stem).await
}

async fn resolve(store: Arc<StemStore>, stem: String) -> Response {
    let key = stem.clone();
    match blocking(move || Ok(store.get_destination(&key))).await {
        Ok(Some(destination)) => {
            debug!(stem, destination, "redirecting");
            match location(&destination) {
                Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
                Err(e) => {
                    error!(stem, error = %e, "destination is not a valid header value");
                    teapot()
                }
            }
        }
        Ok(None) => {
            debug!(stem, "no mapping");
            teapot()
        }
        Err(e) => {
            error!(stem, error = %e, "lookup task failed");
            teapot()
        }
    }
}

/// Build the `Location` header, percent-encoding control characters that
/// may not appear in a header value
fn location(destination: &str) -> Result<HeaderValue, header::InvalidHeaderValue> {
    let mut encoded = String::with_capacity(destination.len());
    for c in destination.chars() {
        if c.is_ascii_control() && c != '\t' {
            encoded.push_str(&format!("%{:02X}", c as u32));
        } else {
            encoded.push(c);
        }
    }
    HeaderValue::from_bytes(encoded.as_bytes())
}

fn teapot() -> Response {
    let status = StatusCode::IM_A_TEAPOT;
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_BUCKET;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn app() -> (TempDir, Arc<StemStore>, Router) {
        let dir = TempDir::new().unwrap();
        let store = StemStore::open(dir.path().join("stems.db"), DEFAULT_BUCKET).unwrap();
        store.initialize().unwrap();
        let store = Arc::new(store);
        let app = router(
            Arc::clone(&store),
            Duration::from_secs(5),
            Duration::from_secs(2),
        );
        (dir, store, app)
    }

    async fn send(app: Router, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_redirects_known_stem() {
        let (_dir, store, app) = app();
        store.set_destination("abc", "https://example.com").unwrap();

        let response = send(app, Method::GET, "/abc").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://example.com"
        );
    }

    #[tokio::test]
    async fn test_unknown_stem_answers_teapot() {
        let (_dir, _store, app) = app();

        let response = send(app, Method::GET, "/missing").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"I'm a teapot");
    }

    #[tokio::test]
    async fn test_root_path_answers_teapot() {
        let (_dir, _store, app) = app();
        let response = send(app, Method::GET, "/").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_method_is_ignored() {
        let (_dir, store, app) = app();
        store.set_destination("abc", "https://example.com").unwrap();

        let response = send(app, Method::POST, "/abc").await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_nested_and_encoded_stems() {
        let (_dir, store, app) = app();
        store.set_destination("docs/intro", "https://docs.example").unwrap();
        store.set_destination("hello world", "https://hello.example").unwrap();

        let response = send(app.clone(), Method::GET, "/docs/intro").await;
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://docs.example"
        );

        let response = send(app, Method::GET, "/hello%20world").await;
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://hello.example"
        );
    }

    #[tokio::test]
    async fn test_missing_bucket_looks_like_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StemStore::open(dir.path().join("stems.db"), DEFAULT_BUCKET).unwrap());
        let app = router(store, Duration::from_secs(5), Duration::from_secs(2));

        let response = send(app, Method::GET, "/abc").await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_location_escapes_control_characters() {
        assert_eq!(
            location("https://example.com/a?b=c").unwrap(),
            "https://example.com/a?b=c"
        );
        assert_eq!(
            location("https://a.example/\r\nx\u{7f}").unwrap(),
            "https://a.example/%0D%0Ax%7F"
        );
        assert_eq!(
            location("https://caf\u{e9}.example").unwrap().as_bytes(),
            "https://caf\u{e9}.example".as_bytes()
        );
    }

    #[tokio::test]
    async fn test_destination_with_newline_still_redirects() {
        let (_dir, store, app) = app();
        store.set_destination("nl", "https://a.example/\nx").unwrap();

        let response = send(app, Method::GET, "/nl").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://a.example/%0Ax"
        );
    }
}
