use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    opened_at: Instant,
    admitted: u32,
}

/// Fixed one-second window shared by every request passing through the layer.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    rps: u32,
    window: Arc<Mutex<Window>>,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            window: Arc::new(Mutex::new(Window {
                opened_at: Instant::now(),
                admitted: 0,
            })),
        }
    }

    /// Admits a request at `now`, or returns how long until the window reopens.
    fn admit(&self, now: Instant) -> Result<(), Duration> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(window.opened_at);
        if elapsed >= WINDOW {
            window.opened_at = now;
            window.admitted = 0;
        }
        if window.admitted >= self.rps {
            return Err(WINDOW.saturating_sub(elapsed));
        }
        window.admitted += 1;
        Ok(())
    }
}

fn too_many_requests(wait: Duration) -> Response {
    // Retry-After is whole seconds; never advertise zero while still limited.
    let retry_after = wait.as_secs().max(1);
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(json!({ "success": false, "message": "Too many requests" })),
    )
        .into_response()
}

pub async fn rps_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match limiter.admit(Instant::now()) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            tracing::warn!(
                method = %req.method(),
                path = %req.uri().path(),
                rps = limiter.rps,
                "rate limit exceeded"
            );
            too_many_requests(wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn admits_up_to_rps_then_reports_wait() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        assert!(limiter.admit(start).is_ok());
        assert!(limiter.admit(start).is_ok());
        let wait = limiter
            .admit(start + Duration::from_millis(300))
            .unwrap_err();
        assert_eq!(wait, Duration::from_millis(700));
    }

    #[test]
    fn window_reopens_after_a_second() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        assert!(limiter.admit(start).is_ok());
        assert!(limiter.admit(start).is_err());
        assert!(limiter.admit(start + WINDOW).is_ok());
    }

    #[test]
    fn zero_rps_still_admits_one_request() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        assert!(limiter.admit(start).is_ok());
        assert!(limiter.admit(start).is_err());
    }

    #[tokio::test]
    async fn limited_request_gets_envelope_and_retry_after() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(RateLimiter::new(1), rps_middleware));

        let first = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "1");
    }
}
