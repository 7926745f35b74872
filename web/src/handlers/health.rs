//! Health check endpoint.
//!
//! Used by load balancers and orchestrators to verify the process is up.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK while the process serves requests. It does NOT check the
/// broker: an unreachable broker shows up as 503s on the command endpoints
/// and as poll errors on the query side.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_is_ok() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
