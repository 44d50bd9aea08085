use crate::socket::{BindTarget, Listener};
use anyhow::Result;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

pub mod handlers;

/// Listen target as shown by `/health`.
#[derive(Debug, Clone)]
pub struct ListenAddr(pub String);

#[must_use]
pub fn router(target: &BindTarget) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(ListenAddr(target.to_string()))),
        )
}

/// Serve `app` until the listener fails.
///
/// # Errors
/// Returns an error if accepting connections fails.
pub async fn serve(listener: Listener, app: Router) -> Result<()> {
    match listener {
        Listener::Tcp(listener) => {
            info!("Listening on {}", listener.local_addr()?);
            axum::serve(listener, app.into_make_service()).await?;
        }
        Listener::Unix(listener) => {
            info!("Listening on {:?}", listener.local_addr()?);
            axum::serve(listener, app.into_make_service()).await?;
        }
    }

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
