//! Custom Axum extractors.
//!
//! - [`JsonBody`]: JSON request body whose rejections use the plain-text
//!   [`AppError`] shape, so a malformed request and an invalid one look the
//!   same to the client.
//!
//! # Examples
//!
//! ```ignore
//! use order_pipeline_web::extractors::JsonBody;
//!
//! async fn create(JsonBody(request): JsonBody<CreateOrderRequest>) -> Result<Json<Order>, AppError> {
//!     // ...
//! }
//! ```

use crate::error::AppError;
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

/// JSON request body.
///
/// Any rejection (missing content type, syntax error, wrong field types)
/// becomes `400 Bad Request` with the parser's reason as the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use axum_test::TestServer;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Payload {
        quantity: i64,
    }

    async fn echo(JsonBody(payload): JsonBody<Payload>) -> String {
        payload.quantity.to_string()
    }

    fn server() -> TestServer {
        TestServer::new(Router::new().route("/echo", post(echo))).expect("test server")
    }

    #[tokio::test]
    async fn accepts_valid_json() {
        let response = server()
            .post("/echo")
            .json(&serde_json::json!({ "quantity": 3 }))
            .await;
        response.assert_status_ok();
        response.assert_text("3");
    }

    #[tokio::test]
    async fn wrong_field_type_is_400() {
        let response = server()
            .post("/echo")
            .json(&serde_json::json!({ "quantity": "three" }))
            .await;
        response.assert_status_bad_request();
        assert!(!response.text().is_empty());
    }

    #[tokio::test]
    async fn syntax_error_is_400() {
        let response = server()
            .post("/echo")
            .content_type("application/json")
            .text("{not json")
            .await;
        response.assert_status_bad_request();
    }
}
