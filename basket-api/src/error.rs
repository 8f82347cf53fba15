use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use basket_core::BasketError;

/// Handler error. Internal ids and storage details never reach the body.
#[derive(Debug)]
pub struct ApiError(pub BasketError);

impl From<BasketError> for ApiError {
    fn from(e: BasketError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BasketError::NotFound { .. } | BasketError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            BasketError::InvalidStatus(_) | BasketError::InvalidSettings(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BasketError::Allocation { .. } | BasketError::ExhaustedRetries { .. } => StatusCode::CONFLICT,
            BasketError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            BasketError::OrderNotFound(_) => "order not found".to_string(),
            BasketError::Transient(_) => "temporarily unavailable, retry later".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        }

        let body = serde_json::json!({
            "error": self.message(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_core::EntityType;

    #[test]
    fn status_mapping() {
        let cases = [
            (BasketError::not_found(EntityType::Order, "x"), StatusCode::NOT_FOUND),
            (BasketError::OrderNotFound(10_000_001), StatusCode::NOT_FOUND),
            (BasketError::InvalidStatus("lost".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (BasketError::InvalidSettings("0 days".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                BasketError::ExhaustedRetries {
                    entity: EntityType::Cart,
                    attempts: 3,
                },
                StatusCode::CONFLICT,
            ),
            (BasketError::Transient("pool".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }

    #[test]
    fn internal_details_are_hidden() {
        let message = ApiError(BasketError::OrderNotFound(10_000_001)).message();
        assert!(!message.contains("10000001"));

        let message = ApiError(BasketError::Transient("password authentication failed".into())).message();
        assert!(!message.contains("password"));
    }
}
