//! Middlewares feeding the counter store.

use axum::extract::{MatchedPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use super::Metrics;

/// Count every routed request by method and path template.
///
/// Install with `route_layer` so [`MatchedPath`] is populated; raw paths
/// would put IDs into the counter keys.
pub async fn track_requests(
    State(metrics): State<Metrics>,
    req: Request,
    next: Next,
) -> Response {
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    metrics.record_request(req.method().as_str(), &path);

    next.run(req).await
}

/// Classify the final auth response: `200` is a success, anything else a
/// failure. The response goes back unchanged.
pub async fn track_auth(
    State(metrics): State<Metrics>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    metrics.record_auth_outcome(response.status() == StatusCode::OK);

    response
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::{get, put};
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    use super::*;
    use crate::telemetry::Endpoint;

    async fn call(app: Router, method: Method, path: &str) -> Response {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    fn tracked(metrics: &Metrics) -> Router {
        Router::new()
            .route("/api/order/{id}", get(|| async { "pepperoni" }))
            .route("/api/franchise", get(|| async { "[]" }).post(|| async { "{}" }))
            .route_layer(from_fn_with_state(metrics.clone(), track_requests))
    }

    #[tokio::test]
    async fn test_requests_use_template() {
        let metrics = Metrics::new();
        let app = tracked(&metrics);

        for id in 1..=3 {
            let response =
                call(app.clone(), Method::GET, &format!("/api/order/{id}")).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        call(app.clone(), Method::POST, "/api/franchise").await;

        assert_eq!(
            metrics.snapshot().requests,
            vec![
                (Endpoint::new("GET", "/api/order/{id}"), 3),
                (Endpoint::new("POST", "/api/franchise"), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_unrouted_requests_are_ignored() {
        let metrics = Metrics::new();
        let response = call(tracked(&metrics), Method::GET, "/nope").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(metrics.snapshot().requests.is_empty());
    }

    fn auth_app(metrics: &Metrics) -> Router {
        Router::new()
            .route(
                "/api/auth",
                put(|| async { (StatusCode::OK, "token") })
                    .delete(|| async { (StatusCode::UNAUTHORIZED, "unauthorized") })
                    .post(|| async { (StatusCode::CREATED, "created") }),
            )
            .route_layer(from_fn_with_state(metrics.clone(), track_auth))
    }

    #[tokio::test]
    async fn test_auth_success() {
        let metrics = Metrics::new();
        let response = call(auth_app(&metrics), Method::PUT, "/api/auth").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"token");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.auth_success, 1);
        assert_eq!(snapshot.auth_failure, 0);
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let metrics = Metrics::new();
        let app = auth_app(&metrics);

        let response = call(app.clone(), Method::DELETE, "/api/auth").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"unauthorized");

        // only `200` counts as a success.
        let response = call(app, Method::POST, "/api/auth").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.auth_success, 0);
        assert_eq!(snapshot.auth_failure, 2);
    }
}
